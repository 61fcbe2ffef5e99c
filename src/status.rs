//! Stage completion markers.
//!
//! Each pipeline stage persists a small key-value status file once it
//! finishes. On restart a stage whose marker says `IsComplete=1` skips its
//! external alignment invocations and reruns only the post-processing of
//! artifacts already on disk. A marker whose recorded split count disagrees
//! with the artifacts found on disk is a fatal resume error, never a silent
//! reprocess.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageMarker {
    pub complete: bool,
    pub num_splits: usize,
}

impl StageMarker {
    pub fn completed(num_splits: usize) -> Self {
        StageMarker {
            complete: true,
            num_splits,
        }
    }

    /// Load a marker; `Ok(None)` means the stage has never run.
    pub fn load(path: &Path) -> Result<Option<StageMarker>, Error> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
        let mut marker = StageMarker::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Record(format!("bad status line '{line}' in {}", path.display()))
            })?;
            match key {
                "IsComplete" => marker.complete = value == "1",
                "NumSplits" => {
                    marker.num_splits = value.parse().map_err(|_| {
                        Error::Record(format!("bad NumSplits '{value}' in {}", path.display()))
                    })?
                }
                _ => {}
            }
        }
        Ok(Some(marker))
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::io(e, dir))?;
        }
        let mut file = fs::File::create(path).map_err(|e| Error::io(e, path))?;
        writeln!(file, "IsComplete={}", if self.complete { 1 } else { 0 })
            .and_then(|_| writeln!(file, "NumSplits={}", self.num_splits))
            .map_err(|e| Error::io(e, path))?;
        Ok(())
    }

    /// Check a resumed marker against the split count planned for this run.
    pub fn check_resume(&self, planned_splits: usize, stage: &str) -> Result<(), Error> {
        if self.complete && self.num_splits != planned_splits {
            return Err(Error::Resume(format!(
                "stage '{stage}' completed with {} splits but this run planned {}; \
                 remove the status file to force a rerun",
                self.num_splits, planned_splits
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_marker_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status").join("clusters.status");

        let marker = StageMarker::completed(4);
        marker.save(&path).unwrap();

        let loaded = StageMarker::load(&path).unwrap().unwrap();
        assert_eq!(loaded, marker);
    }

    #[test]
    fn test_missing_marker_means_not_run() {
        let dir = tempdir().unwrap();
        let loaded = StageMarker::load(&dir.path().join("absent.status")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_incomplete_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stage.status");
        StageMarker {
            complete: false,
            num_splits: 2,
        }
        .save(&path)
        .unwrap();

        let loaded = StageMarker::load(&path).unwrap().unwrap();
        assert!(!loaded.complete);
        assert_eq!(loaded.num_splits, 2);
    }

    #[test]
    fn test_resume_split_mismatch_is_fatal() {
        let marker = StageMarker::completed(4);
        assert!(marker.check_resume(4, "junctions").is_ok());
        let err = marker.check_resume(2, "junctions").unwrap_err();
        assert!(err.to_string().contains("junctions"));
    }

    #[test]
    fn test_malformed_marker_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.status");
        std::fs::write(&path, "IsComplete=1\nNumSplits=abc\n").unwrap();
        assert!(StageMarker::load(&path).is_err());
    }
}
