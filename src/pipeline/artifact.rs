//! Staged artifacts: temporary files owned by exactly one run.
//!
//! An artifact is written through a `NamedTempFile` and immediately turned
//! into a `TempPath`, so no handle stays open between stages and the file is
//! removed when the artifact is dropped, on success, on `?` and on panic.

use crate::error::IngestError;
use std::io::Write;
use std::path::Path;
use tempfile::{Builder, TempPath};

const PREFIX: &str = "einvoice-";

#[derive(Debug)]
pub struct StagedArtifact {
    path: TempPath,
}

impl StagedArtifact {
    /// Write `bytes` to a new artifact in `dir`.
    pub fn write_in(dir: &Path, suffix: &str, bytes: &[u8]) -> Result<Self, IngestError> {
        let mut file = Builder::new()
            .prefix(PREFIX)
            .suffix(suffix)
            .tempfile_in(dir)
            .map_err(|e| IngestError::io(dir, e))?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|e| IngestError::io(file.path(), e))?;
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    /// Reserve an empty artifact for an external process to fill.
    pub fn reserve_in(dir: &Path, suffix: &str) -> Result<Self, IngestError> {
        let file = Builder::new()
            .prefix(PREFIX)
            .suffix(suffix)
            .tempfile_in(dir)
            .map_err(|e| IngestError::io(dir, e))?;
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size on disk in bytes.
    pub fn size(&self) -> Result<u64, IngestError> {
        std::fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|e| IngestError::io(self.path(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = StagedArtifact::write_in(dir.path(), ".pdf", b"%PDF-1.4").unwrap();
        let path = artifact.path().to_path_buf();
        assert_eq!(artifact.size().unwrap(), 8);
        assert!(path.extension().is_some_and(|e| e == "pdf"));
        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn reserved_artifact_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = StagedArtifact::reserve_in(dir.path(), ".html").unwrap();
        assert_eq!(artifact.size().unwrap(), 0);
    }

    #[test]
    fn missing_scratch_dir_is_an_io_error() {
        let err =
            StagedArtifact::write_in(Path::new("/definitely/not/here"), "", b"x").unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }
}
