//! Ingestion requests: where a payload came from and what to do with it.
//!
//! A request is split the same way a pipeline is driven. [`PipelineInput`]
//! is what a pipeline is *constructed* with (source, payload, optional
//! document to supersede); [`IngestOptions`] is what `apply` is *called*
//! with. Keeping the halves apart is what lets a finished pipeline hand a
//! follow-up stage a fresh pair through `init_args` / `apply_args`.

use crate::store::DocumentRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Where an inbound file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// Browser upload; the caller already resolved owner and parent.
    Web,
    /// Mail attachment; the payload must be decoded to disk first.
    Mail,
    /// File picked up from a local directory.
    Local,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Web => "WEB",
            SourceKind::Mail => "MAIL",
            SourceKind::Local => "LOCAL",
        })
    }
}

/// One MIME part handed over by the mail-ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailPart {
    /// `filename` parameter of the part's Content-Disposition, if any.
    pub filename: Option<String>,
    /// Full Content-Type, e.g. `application/pkcs7-mime`.
    pub content_type: String,
    /// Content-Transfer-Encoding; `None` means 7bit.
    pub transfer_encoding: Option<String>,
    /// Raw, still-encoded body.
    pub body: Vec<u8>,
}

impl MailPart {
    pub fn new(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: None,
            content_type: content_type.into(),
            transfer_encoding: None,
            body: body.into(),
        }
    }

    pub fn with_filename(mut self, name: impl Into<String>) -> Self {
        self.filename = Some(name.into());
        self
    }

    pub fn with_transfer_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.transfer_encoding = Some(encoding.into());
        self
    }
}

/// The bytes a run starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A file already on disk (web upload temp file, local file).
    OnDisk(PathBuf),
    /// A mail attachment that has to be materialized first.
    Attachment(MailPart),
}

impl Payload {
    /// Path of the caller's on-disk file, if the payload is one.
    pub fn on_disk_path(&self) -> Option<&Path> {
        match self {
            Payload::OnDisk(p) => Some(p),
            Payload::Attachment(_) => None,
        }
    }
}

/// Arguments a pipeline is constructed with.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineInput {
    pub source: SourceKind,
    pub payload: Payload,
    /// Existing record to supersede when `create_document` is false.
    pub document: Option<DocumentRecord>,
}

impl PipelineInput {
    pub fn web(path: impl Into<PathBuf>) -> Self {
        Self::on_disk(SourceKind::Web, path)
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::on_disk(SourceKind::Local, path)
    }

    pub fn mail(part: MailPart) -> Self {
        Self {
            source: SourceKind::Mail,
            payload: Payload::Attachment(part),
            document: None,
        }
    }

    fn on_disk(source: SourceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            payload: Payload::OnDisk(path.into()),
            document: None,
        }
    }

    pub fn with_document(mut self, document: DocumentRecord) -> Self {
        self.document = Some(document);
        self
    }
}

/// Arguments `apply` is called with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    /// Owning user. For non-WEB sources this is looked up in the user
    /// directory; `None` means the directory's default user.
    pub owner: Option<String>,
    /// Parent container. Replaced by the owner's inbox for non-WEB sources.
    pub parent_id: Option<String>,
    /// Language hint. Replaced by the owner's language for non-WEB sources.
    pub lang: Option<String>,
    /// Display name override; used verbatim as title and file name.
    pub name: Option<String>,
    pub notes: Option<String>,
    /// Accepted for interface compatibility; OCR is not part of this crate.
    pub skip_ocr: bool,
    /// Run on a background task (see [`crate::importer::submit`]).
    pub apply_async: bool,
    /// Remove the caller's on-disk source file after a successful run. The
    /// record is already committed by then, so a failed removal is logged
    /// and the run still succeeds.
    pub delete_after_import: bool,
    /// Create a new record (true) or supersede the pipeline's document (false).
    pub create_document: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            owner: None,
            parent_id: None,
            lang: None,
            name: None,
            notes: None,
            skip_ocr: true,
            apply_async: false,
            delete_after_import: false,
            create_document: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_create_documents() {
        let o = IngestOptions::default();
        assert!(o.create_document);
        assert!(o.skip_ocr);
        assert!(!o.delete_after_import);
        assert!(!o.apply_async);
    }

    #[test]
    fn source_kind_labels() {
        assert_eq!(SourceKind::Web.to_string(), "WEB");
        assert_eq!(SourceKind::Mail.to_string(), "MAIL");
        assert_eq!(SourceKind::Local.to_string(), "LOCAL");
    }

    #[test]
    fn attachment_has_no_disk_path() {
        let input = PipelineInput::mail(MailPart::new("application/octet-stream", b"x".to_vec()));
        assert!(input.payload.on_disk_path().is_none());
        let input = PipelineInput::local("/tmp/a.xml");
        assert_eq!(input.payload.on_disk_path(), Some(Path::new("/tmp/a.xml")));
    }
}
