//! In-memory [`DocumentStore`] that records every call.
//!
//! Used by the test suite to assert what a run did (and did not) hand to the
//! persistence layer, and in which order.

use super::{DocumentRecord, DocumentStore, NewDocument};
use crate::error::IngestError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// One call observed by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Created { id: Uuid },
    Saved { id: Uuid, version: u32 },
    FileStored { id: Uuid, bytes: u64 },
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Uuid, DocumentRecord>>,
    files: Mutex<HashMap<Uuid, Vec<u8>>>,
    events: Mutex<Vec<StoreEvent>>,
    reject: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `create_document` always fails with `Validation(reason)`.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            reject: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Every call in order.
    pub fn events(&self) -> Vec<StoreEvent> {
        lock(&self.events).clone()
    }

    pub fn create_calls(&self) -> usize {
        self.count(|e| matches!(e, StoreEvent::Created { .. }))
    }

    pub fn store_calls(&self) -> usize {
        self.count(|e| matches!(e, StoreEvent::FileStored { .. }))
    }

    pub fn save_calls(&self) -> usize {
        self.count(|e| matches!(e, StoreEvent::Saved { .. }))
    }

    pub fn record_count(&self) -> usize {
        lock(&self.records).len()
    }

    /// Bytes most recently stored for `id`.
    pub fn file_contents(&self, id: Uuid) -> Option<Vec<u8>> {
        lock(&self.files).get(&id).cloned()
    }

    fn count(&self, pred: impl Fn(&StoreEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: StoreEvent) {
        lock(&self.events).push(event);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_document(&self, new: NewDocument) -> Result<DocumentRecord, IngestError> {
        if let Some(ref reason) = self.reject {
            return Err(IngestError::Validation(reason.clone()));
        }
        new.validate()?;
        let record = DocumentRecord::from_new(new);
        lock(&self.records).insert(record.id, record.clone());
        self.push(StoreEvent::Created { id: record.id });
        Ok(record)
    }

    async fn save(&self, record: &DocumentRecord) -> Result<(), IngestError> {
        let mut records = lock(&self.records);
        if !records.contains_key(&record.id) {
            return Err(IngestError::Validation(format!(
                "document {} does not exist",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        drop(records);
        self.push(StoreEvent::Saved {
            id: record.id,
            version: record.version,
        });
        Ok(())
    }

    async fn store_file(
        &self,
        record: &DocumentRecord,
        artifact: &Path,
    ) -> Result<(), IngestError> {
        let bytes = tokio::fs::read(artifact)
            .await
            .map_err(|e| IngestError::io(artifact, e))?;
        let len = bytes.len() as u64;
        lock(&self.files).insert(record.id, bytes);
        self.push(StoreEvent::FileStored {
            id: record.id,
            bytes: len,
        });
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DocumentRecord>, IngestError> {
        Ok(lock(&self.records).get(&id).cloned())
    }
}

/// Critical sections are single inserts or reads, so a poisoned map is
/// still consistent.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_doc() -> NewDocument {
        NewDocument {
            owner: None,
            title: "invoice".into(),
            size: 3,
            lang: None,
            file_name: "invoice".into(),
            parent_id: None,
            page_count: 1,
            notes: None,
        }
    }

    #[tokio::test]
    async fn create_save_and_store_are_recorded_in_order() {
        let store = MemoryStore::new();
        let mut rec = store.create_document(new_doc()).await.unwrap();

        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"abc").unwrap();
        store.store_file(&rec, tmp.path()).await.unwrap();

        rec.version += 1;
        store.save(&rec).await.unwrap();

        assert_eq!(
            store.events(),
            vec![
                StoreEvent::Created { id: rec.id },
                StoreEvent::FileStored { id: rec.id, bytes: 3 },
                StoreEvent::Saved { id: rec.id, version: 2 },
            ]
        );
        assert_eq!(store.file_contents(rec.id).unwrap(), b"abc");
        assert_eq!(store.get(rec.id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn rejecting_store_fails_validation() {
        let store = MemoryStore::rejecting("quota exceeded");
        let err = store.create_document(new_doc()).await.unwrap_err();
        assert!(matches!(err, IngestError::Validation(ref m) if m == "quota exceeded"));
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn poisoned_lock_does_not_panic() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let s = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = s.events.lock().unwrap();
            panic!("poison the event log");
        })
        .join();
        assert!(store.events.is_poisoned());

        let rec = store.create_document(new_doc()).await.unwrap();
        assert_eq!(store.events(), vec![StoreEvent::Created { id: rec.id }]);
    }

    #[tokio::test]
    async fn saving_unknown_record_fails() {
        let store = MemoryStore::new();
        let rec = DocumentRecord::from_new(new_doc());
        assert!(store.save(&rec).await.is_err());
    }
}
