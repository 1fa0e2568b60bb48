//! Persistence and user-resolution collaborators.
//!
//! The pipeline core never embeds storage logic. It talks to a
//! [`DocumentStore`] and a [`UserDirectory`] through the narrow contracts
//! below; hosts plug in their own database-backed implementations.
//!
//! Two reference stores ship with the crate:
//! * [`memory::MemoryStore`] - in-process, records every call (tests)
//! * [`fs::DirectoryStore`] - JSON records and files under a root directory (CLI)

pub mod fs;
pub mod memory;

pub use fs::DirectoryStore;
pub use memory::MemoryStore;

use crate::error::IngestError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// Metadata for a record about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub owner: Option<String>,
    pub title: String,
    pub size: u64,
    pub lang: Option<String>,
    pub file_name: String,
    pub parent_id: Option<String>,
    pub page_count: u32,
    pub notes: Option<String>,
}

impl NewDocument {
    /// Checks shared by the reference stores.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.title.trim().is_empty() {
            return Err(IngestError::Validation("title must not be empty".into()));
        }
        if self.file_name.trim().is_empty() {
            return Err(IngestError::Validation("file name must not be empty".into()));
        }
        if self.file_name.contains(['/', '\\']) || self.file_name == "." || self.file_name == ".." {
            return Err(IngestError::Validation(format!(
                "file name '{}' must not contain path separators",
                self.file_name
            )));
        }
        if self.page_count == 0 {
            return Err(IngestError::Validation("page count must be at least 1".into()));
        }
        Ok(())
    }
}

/// A persisted document.
///
/// `version` starts at 1 and only ever grows by one per supersede.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub owner: Option<String>,
    pub title: String,
    pub file_name: String,
    pub size: u64,
    pub page_count: u32,
    pub lang: Option<String>,
    pub parent_id: Option<String>,
    pub version: u32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// A fresh version-1 record with a new id.
    pub fn from_new(new: NewDocument) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: new.owner,
            title: new.title,
            file_name: new.file_name,
            size: new.size,
            page_count: new.page_count,
            lang: new.lang,
            parent_id: new.parent_id,
            version: 1,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The document store the pipelines hand finished files to.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a record from `new`. Rejected metadata fails with
    /// [`IngestError::Validation`].
    async fn create_document(&self, new: NewDocument) -> Result<DocumentRecord, IngestError>;

    /// Commit changes made to an existing record.
    async fn save(&self, record: &DocumentRecord) -> Result<(), IngestError>;

    /// Copy `artifact` into the location owned by `record`'s current version.
    /// The caller keeps ownership of `artifact`.
    async fn store_file(&self, record: &DocumentRecord, artifact: &Path) -> Result<(), IngestError>;

    async fn get(&self, id: Uuid) -> Result<Option<DocumentRecord>, IngestError>;
}

/// Owner, language and inbox of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProperties {
    pub user: String,
    pub lang: Option<String>,
    pub inbox_id: String,
}

/// Resolves the owner of files that arrive without a logged-in user.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `None` asks for the directory's default user.
    async fn resolve_user_properties(
        &self,
        user: Option<&str>,
    ) -> Result<UserProperties, IngestError>;
}

/// A fixed user table.
#[derive(Debug, Clone)]
pub struct StaticDirectory {
    default: UserProperties,
    users: HashMap<String, UserProperties>,
}

impl StaticDirectory {
    pub fn new(default: UserProperties) -> Self {
        let mut users = HashMap::new();
        users.insert(default.user.clone(), default.clone());
        Self { default, users }
    }

    pub fn with_user(mut self, props: UserProperties) -> Self {
        self.users.insert(props.user.clone(), props);
        self
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn resolve_user_properties(
        &self,
        user: Option<&str>,
    ) -> Result<UserProperties, IngestError> {
        match user {
            None => Ok(self.default.clone()),
            Some(name) => self
                .users
                .get(name)
                .cloned()
                .ok_or_else(|| IngestError::UserNotFound { user: name.to_string() }),
        }
    }
}
