//! # einvoice-ingest
//!
//! Import electronic invoices into a document store.
//!
//! Two kinds of input are handled:
//!
//! - **Signed envelopes** (`.p7m`): the PKCS#7 signature is verified and the
//!   enclosed payload becomes the stored document.
//! - **Invoice XML**: the XML goes through an XSLT stylesheet to HTML, and a
//!   headless browser prints that to PDF.
//!
//! Input arrives from a web upload, a local file or a mail attachment.
//!
//! ## Pipeline Overview
//!
//! ```text
//! payload
//!  │
//!  ├─ 1. Materialize  decode mail attachments, stat local files
//!  ├─ 2. Sniff        content-based mimetype gate (mismatch → Ok(None))
//!  ├─ 3. Content      unwrap envelope | XSLT + render (spawn_blocking / child process)
//!  ├─ 4. Name         canonical name, create or supersede, version bump
//!  ├─ 5. Persist      create/save the record, hand the file to the store
//!  └─ 6. Clean        staged artifacts removed on drop
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use einvoice_ingest::{
//!     IngestConfig, IngestContext, IngestOptions, PipelineInput, PipelineKind,
//!     store::{DirectoryStore, StaticDirectory, UserProperties},
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::from_env()?;
//!     let users = StaticDirectory::new(UserProperties {
//!         user: "admin".into(),
//!         lang: Some("it".into()),
//!         inbox_id: "inbox".into(),
//!     });
//!     let store = DirectoryStore::new("./store");
//!     let ctx = IngestContext::new(config, Arc::new(store), Arc::new(users));
//!
//!     let input = PipelineInput::local("invoice.xml.p7m");
//!     let mut pipeline = PipelineKind::Envelope.build(input, ctx);
//!     if let Some(outcome) = pipeline.apply(IngestOptions::default()).await? {
//!         println!("{} v{}", outcome.document.file_name, outcome.document.version);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `einvoice-import` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `libxslt` | on      | In-process XSLT through libxml2/libxslt; without it `xsltproc` is spawned |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod importer;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder};
pub use error::{IngestError, TransformStep};
pub use importer::{
    apply_sync, chain, dispatch, ingest_batch, submit, BatchReport, Dispatch, EnvelopePipeline,
    FileOutcome, FileStatus, ImportOutcome, ImportPipeline, IngestContext, IngestJob, PipelineKind,
    RunState, XmlPipeline,
};
pub use pipeline::transform::{ChromeRenderer, Renderer};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use request::{IngestOptions, MailPart, Payload, PipelineInput, SourceKind};
pub use store::{DocumentRecord, DocumentStore, UserDirectory};
