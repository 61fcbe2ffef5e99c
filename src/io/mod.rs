//! FASTQ input and small run artifacts.

pub mod fastq;
pub mod sam;

use std::fs;
use std::path::Path;

use crate::error::Error;

/// Persist the library read-pair count so later runs can skip the scan.
pub fn save_readcount(path: &Path, count: u64) -> Result<(), Error> {
    fs::write(path, format!("{count}\n")).map_err(|e| Error::io(e, path))
}

/// Load a previously persisted read-pair count.
pub fn load_readcount(path: &Path) -> Result<u64, Error> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
    text.trim()
        .parse()
        .map_err(|_| Error::Record(format!("{}: malformed read count", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readcount_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readcount");
        save_readcount(&path, 123_456_789).unwrap();
        assert_eq!(load_readcount(&path).unwrap(), 123_456_789);
    }

    #[test]
    fn test_readcount_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readcount");
        std::fs::write(&path, "not a number\n").unwrap();
        assert!(load_readcount(&path).is_err());
    }
}
