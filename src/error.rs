//! Error types for the einvoice-ingest library.
//!
//! Every variant of [`IngestError`] is a **hard** failure: the run stops and
//! the error reaches the immediate caller unchanged. Nothing in the pipeline
//! core retries.
//!
//! The one soft outcome, a payload whose sniffed mimetype the pipeline does
//! not accept, is deliberately *not* an error. `apply` returns `Ok(None)` so a
//! dispatcher can offer the same file to the next candidate pipeline.
//!
//! Batch callers ([`crate::importer::ingest_batch`]) catch hard errors per
//! file and record them in the report instead of aborting the batch.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// All hard errors returned by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The on-disk source file does not exist.
    #[error("Source file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// A mail attachment could not be decoded into a file payload.
    #[error("Mail attachment is not a file: {0}")]
    NotAFile(String),

    // ── Format errors ─────────────────────────────────────────────────────
    /// The payload is not a well-formed PKCS#7 signed envelope, or its
    /// signature does not match the enclosed content.
    #[error("'{path}' is not a valid signed envelope: {detail}")]
    MalformedEnvelope { path: PathBuf, detail: String },

    /// Stylesheet, XML parse, XSLT or renderer failure.
    #[error("XML transform failed ({step}): {detail}")]
    TransformFailed { step: TransformStep, detail: String },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The document store rejected the computed metadata.
    #[error("Document rejected by store: {0}")]
    Validation(String),

    /// The user directory has no entry for the requested owner.
    #[error("User '{user}' not found")]
    UserNotFound { user: String },

    /// `create_document` is false but the pipeline was given no existing
    /// document to supersede.
    #[error("Nothing to update: create_document is false and no existing document was supplied")]
    MissingDocument,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading, writing or removing a file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (panicked blocking task, broken store state).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Wrap an `io::Error` with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn transform(step: TransformStep, detail: impl Into<String>) -> Self {
        IngestError::TransformFailed {
            step,
            detail: detail.into(),
        }
    }
}

/// Which part of the XML → HTML → PDF chain failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStep {
    /// Stylesheet file missing or not a valid XSLT document.
    Stylesheet,
    /// Input is not well-formed XML.
    Parse,
    /// Applying the stylesheet failed.
    Transform,
    /// Renderer could not be started, exited non-zero, or wrote nothing.
    Render,
    /// Renderer did not exit within the configured timeout.
    Timeout,
}

impl fmt::Display for TransformStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransformStep::Stylesheet => "stylesheet",
            TransformStep::Parse => "parse",
            TransformStep::Transform => "transform",
            TransformStep::Render => "render",
            TransformStep::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_failed_display_names_step() {
        let e = IngestError::transform(TransformStep::Timeout, "renderer hung");
        let msg = e.to_string();
        assert!(msg.contains("timeout"), "got: {msg}");
        assert!(msg.contains("renderer hung"), "got: {msg}");
    }

    #[test]
    fn malformed_envelope_display() {
        let e = IngestError::MalformedEnvelope {
            path: PathBuf::from("/tmp/invoice.p7m"),
            detail: "asn1 encoding routines".into(),
        };
        assert!(e.to_string().contains("invoice.p7m"));
    }

    #[test]
    fn io_helper_keeps_source() {
        let e = IngestError::io(
            "/nope",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(std::error::Error::source(&e).is_some());
        assert!(e.to_string().contains("/nope"));
    }

    #[test]
    fn user_not_found_display() {
        let e = IngestError::UserNotFound {
            user: "mrossi".into(),
        };
        assert_eq!(e.to_string(), "User 'mrossi' not found");
    }
}
