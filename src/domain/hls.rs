use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    pub duration: f64,
    pub uri: String,
}

/// A media playlist as written by ffmpeg's HLS muxer.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub version: u8,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub segments: Vec<MediaSegment>,
    pub end_list: bool,
    pub playlist_type: Option<String>,
}

impl MediaPlaylist {
    pub fn add_segment(&mut self, duration: f64, uri: String) {
        self.segments.push(MediaSegment { duration, uri });
    }

    /// Parse the subset of tags the packager emits. Unknown tags are ignored.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some("#EXTM3U") {
            return Err("missing #EXTM3U header".to_string());
        }

        let mut playlist = MediaPlaylist {
            version: 3,
            target_duration: 0,
            media_sequence: 0,
            segments: Vec::new(),
            end_list: false,
            playlist_type: None,
        };
        let mut pending_duration: Option<f64> = None;

        for line in lines {
            if let Some(value) = line.strip_prefix("#EXT-X-VERSION:") {
                playlist.version = value.parse().map_err(|_| format!("bad version: {}", value))?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                playlist.target_duration = value
                    .parse()
                    .map_err(|_| format!("bad target duration: {}", value))?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                playlist.media_sequence = value
                    .parse()
                    .map_err(|_| format!("bad media sequence: {}", value))?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-PLAYLIST-TYPE:") {
                playlist.playlist_type = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("#EXTINF:") {
                let duration = value.split(',').next().unwrap_or_default();
                pending_duration = Some(
                    duration
                        .parse()
                        .map_err(|_| format!("bad segment duration: {}", duration))?,
                );
            } else if line == "#EXT-X-ENDLIST" {
                playlist.end_list = true;
            } else if line.starts_with('#') {
                continue;
            } else {
                let duration = pending_duration
                    .take()
                    .ok_or_else(|| format!("segment without #EXTINF: {}", line))?;
                playlist.add_segment(duration, line.to_string());
            }
        }

        Ok(playlist)
    }

    pub async fn read_from(path: &Path) -> Result<Self, std::io::Error> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}
