//! Chunks of a job's source media.
//!
//! A segment never outlives the job execution that produced it. Its index is
//! carried explicitly; file and key names are only zero-padded for humans.

use super::jobs::JobId;
use regex::Regex;
use std::sync::OnceLock;

/// Width of the zero padded index in chunk file names and keys.
pub const INDEX_WIDTH: usize = 5;

/// Output pattern handed to the segment muxer.
pub const SPLIT_PATTERN: &str = "segment%05d.ts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub job_id: JobId,
    pub index: usize,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodedSegment {
    pub job_id: JobId,
    pub index: usize,
    pub key: String,
}

pub fn padded(index: usize) -> String {
    format!("{:0width$}", index, width = INDEX_WIDTH)
}

pub fn segment_key(segments_prefix: &str, index: usize) -> String {
    format!("{}segment_{}.ts", segments_prefix, padded(index))
}

pub fn transcoded_key(segments_prefix: &str, index: usize) -> String {
    format!("{}transcoded_{}.ts", segments_prefix, padded(index))
}

/// Index of a file written by the segment muxer, e.g. `segment00042.ts`.
///
/// Parsed as an integer so ordering holds past the padding width.
pub fn parse_split_index(file_name: &str) -> Option<usize> {
    static SPLIT_FILE: OnceLock<Regex> = OnceLock::new();
    let re = SPLIT_FILE.get_or_init(|| Regex::new(r"^segment(\d+)\.ts$").unwrap());
    re.captures(file_name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_split_index() {
        assert_eq!(parse_split_index("segment00000.ts"), Some(0));
        assert_eq!(parse_split_index("segment00042.ts"), Some(42));
        assert_eq!(parse_split_index("segment123456.ts"), Some(123456));
        assert_eq!(parse_split_index("segment.ts"), None);
        assert_eq!(parse_split_index("transcoded_00001.ts"), None);
        assert_eq!(parse_split_index("segment00001.ts.part"), None);
    }

    #[test]
    fn test_numeric_order_beyond_padding() {
        let mut names = vec!["segment100000.ts", "segment99999.ts", "segment00002.ts"];
        names.sort_by_key(|n| parse_split_index(n));
        assert_eq!(
            names,
            vec!["segment00002.ts", "segment99999.ts", "segment100000.ts"]
        );
    }

    #[test]
    fn test_keys() {
        assert_eq!(
            segment_key("transcoded/segments/j1/", 7),
            "transcoded/segments/j1/segment_00007.ts"
        );
        assert_eq!(
            transcoded_key("transcoded/segments/j1/", 1234),
            "transcoded/segments/j1/transcoded_01234.ts"
        );
    }
}
