//! Directory-backed [`DocumentStore`].
//!
//! Layout under the root:
//!
//! ```text
//! <root>/<id>/record.json
//! <root>/<id>/v<version>/<file_name>
//! ```
//!
//! Older versions stay on disk; a supersede only adds a directory.

use super::{DocumentRecord, DocumentStore, NewDocument};
use crate::error::IngestError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the file of `record`'s current version lives.
    pub fn file_path(&self, record: &DocumentRecord) -> PathBuf {
        self.record_dir(record.id)
            .join(format!("v{}", record.version))
            .join(&record.file_name)
    }

    fn record_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn record_json(&self, id: Uuid) -> PathBuf {
        self.record_dir(id).join("record.json")
    }

    /// Atomic write: temp file + rename, so readers never see half a record.
    async fn write_record(&self, record: &DocumentRecord) -> Result<(), IngestError> {
        let dir = self.record_dir(record.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| IngestError::io(&dir, e))?;

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| IngestError::Internal(format!("record serialisation: {e}")))?;

        let path = self.record_json(record.id);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| IngestError::io(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| IngestError::io(&path, e))
    }
}

#[async_trait]
impl DocumentStore for DirectoryStore {
    async fn create_document(&self, new: NewDocument) -> Result<DocumentRecord, IngestError> {
        new.validate()?;
        let record = DocumentRecord::from_new(new);
        self.write_record(&record).await?;
        debug!(id = %record.id, "created record");
        Ok(record)
    }

    async fn save(&self, record: &DocumentRecord) -> Result<(), IngestError> {
        if !self.record_json(record.id).exists() {
            return Err(IngestError::Validation(format!(
                "document {} does not exist",
                record.id
            )));
        }
        let mut record = record.clone();
        record.updated_at = chrono::Utc::now();
        self.write_record(&record).await
    }

    async fn store_file(
        &self,
        record: &DocumentRecord,
        artifact: &Path,
    ) -> Result<(), IngestError> {
        let dest = self.file_path(record);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IngestError::io(parent, e))?;
        }
        let bytes = tokio::fs::copy(artifact, &dest)
            .await
            .map_err(|e| IngestError::io(artifact, e))?;
        debug!(id = %record.id, version = record.version, bytes, "stored file");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DocumentRecord>, IngestError> {
        let path = self.record_json(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IngestError::io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| IngestError::Internal(format!("corrupt record {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_doc(name: &str) -> NewDocument {
        NewDocument {
            owner: Some("admin".into()),
            title: name.into(),
            size: 5,
            lang: Some("ita".into()),
            file_name: name.into(),
            parent_id: Some("inbox".into()),
            page_count: 1,
            notes: Some("from test".into()),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());

        let rec = store.create_document(new_doc("invoice.pdf")).await.unwrap();
        let loaded = store.get(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.file_name, "invoice.pdf");
        assert_eq!(loaded.notes.as_deref(), Some("from test"));
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn versions_get_their_own_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"hello").unwrap();

        let mut rec = store.create_document(new_doc("invoice")).await.unwrap();
        store.store_file(&rec, &src).await.unwrap();
        let v1 = store.file_path(&rec);

        rec.version += 1;
        store.save(&rec).await.unwrap();
        store.store_file(&rec, &src).await.unwrap();
        let v2 = store.file_path(&rec);

        assert_ne!(v1, v2);
        assert_eq!(std::fs::read(&v1).unwrap(), b"hello");
        assert_eq!(std::fs::read(&v2).unwrap(), b"hello");
        assert!(src.exists(), "store_file must copy, not move");
        assert_eq!(store.get(rec.id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn invalid_metadata_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        let err = store.create_document(new_doc("a/b")).await.unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }
}
