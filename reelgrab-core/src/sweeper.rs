//! Time-based retention for the output directory.
//!
//! Finished artifacts are served straight off disk, so without a sweeper the
//! directory grows forever. Files older than the configured age are removed
//! on a fixed interval.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RetentionSection;

#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    dir: PathBuf,
    max_age: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(dir: PathBuf, config: &RetentionSection) -> Self {
        Self {
            dir,
            max_age: config.max_age(),
            interval: config.sweep_interval(),
        }
    }

    /// Removes every regular file whose mtime is older than the retention
    /// window. Returns the number of files removed. A missing directory is
    /// not an error; there is simply nothing to sweep.
    pub fn sweep_once(&self) -> std::io::Result<usize> {
        let now = SystemTime::now();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to read file metadata");
                    continue;
                }
            };
            if let Ok(modified) = metadata.modified() {
                if now.duration_since(modified).unwrap_or(Duration::ZERO) > self.max_age {
                    match std::fs::remove_file(&path) {
                        Ok(()) => {
                            debug!(path = %path.display(), "Removed expired artifact");
                            removed += 1;
                        }
                        Err(err) => {
                            warn!(path = %path.display(), error = %err, "Failed to remove expired artifact");
                        }
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Runs the sweep on its interval until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick fires immediately; skip it so a fresh start does
            // not race files still being written.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.sweep_once() {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, dir = %self.dir.display(), "Retention sweep"),
                    Err(err) => warn!(error = %err, "Retention sweep failed"),
                }
            }
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweeper(dir: PathBuf, max_age_seconds: u64) -> RetentionSweeper {
        RetentionSweeper::new(
            dir,
            &RetentionSection {
                sweep_interval_seconds: 3600,
                max_age_seconds,
            },
        )
    }

    #[test]
    fn removes_files_past_max_age() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1700000000000.mp4"), b"stale").unwrap();
        std::fs::write(dir.path().join("1700000000001.mp4"), b"stale").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let removed = sweeper(dir.path().to_path_buf(), 0).sweep_once().unwrap();
        assert_eq!(removed, 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn keeps_recent_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fresh.mp4"), b"fresh").unwrap();
        let removed = sweeper(dir.path().to_path_buf(), 3600)
            .sweep_once()
            .unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join("fresh.mp4").exists());
    }

    #[test]
    fn missing_directory_is_empty_sweep() {
        let removed = sweeper(PathBuf::from("/nonexistent/reelgrab-sweep"), 0)
            .sweep_once()
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn skips_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let removed = sweeper(dir.path().to_path_buf(), 0).sweep_once().unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join("nested").exists());
    }
}
