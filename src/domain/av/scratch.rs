//! Local scratch space checks.

use std::path::Path;
use sysinfo::Disks;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchSpace {
    Sufficient { available_bytes: u64 },
    Insufficient { available_bytes: u64, required_bytes: u64 },
}

/// Compare the free space of the disk holding `path` with `required_bytes`.
///
/// A requirement of 0 skips the lookup. When no mounted disk contains the
/// path the available space is reported as 0. Enumerating mounts reads
/// `/proc` and statfs's every disk, so it runs on the blocking pool.
pub async fn check_scratch_space(path: &Path, required_bytes: u64) -> ScratchSpace {
    if required_bytes == 0 {
        return ScratchSpace::Sufficient { available_bytes: 0 };
    }

    let lookup = path.to_path_buf();
    let available = tokio::task::spawn_blocking(move || available_space_for(&lookup))
        .await
        .unwrap_or_else(|e| {
            warn!("Disk space lookup did not finish: {}", e);
            None
        });
    let available_bytes = available.unwrap_or_else(|| {
        warn!("Could not determine disk space for {}", path.display());
        0
    });

    if available_bytes >= required_bytes {
        debug!(
            "Scratch space OK at {}: {} bytes available",
            path.display(),
            available_bytes
        );
        ScratchSpace::Sufficient { available_bytes }
    } else {
        warn!(
            "Low scratch space at {}: {} bytes available, {} required",
            path.display(),
            available_bytes,
            required_bytes
        );
        ScratchSpace::Insufficient {
            available_bytes,
            required_bytes,
        }
    }
}

fn available_space_for(path: &Path) -> Option<u64> {
    let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    // The most specific mount point containing the path wins.
    let mut best: Option<(u64, usize)> = None;
    for disk in disks.list() {
        let mount_point = disk.mount_point();
        if path.starts_with(mount_point) {
            let depth = mount_point.components().count();
            if best.map(|(_, d)| depth > d).unwrap_or(true) {
                best = Some((disk.available_space(), depth));
            }
        }
    }
    best.map(|(available, _)| available)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_requirement_skips_check() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            check_scratch_space(dir.path(), 0).await,
            ScratchSpace::Sufficient { .. }
        ));
    }

    #[tokio::test]
    async fn test_impossible_requirement_is_insufficient() {
        let dir = tempfile::tempdir().unwrap();
        match check_scratch_space(dir.path(), u64::MAX).await {
            ScratchSpace::Insufficient { required_bytes, .. } => {
                assert_eq!(required_bytes, u64::MAX)
            }
            other => panic!("expected insufficient space, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_lookup_leaves_runtime_thread_free() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        // With a single runtime thread the other task can only run while the
        // check is parked on the blocking pool.
        check_scratch_space(dir.path(), 1).await;
        assert!(ran.load(Ordering::SeqCst));
    }
}
