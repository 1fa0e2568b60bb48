//! Progress-callback trait for per-file batch ingestion events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive
//! events as [`crate::importer::ingest_batch`] works through its files.
//!
//! # Example
//!
//! ```rust
//! use einvoice_ingest::{IngestConfig, IngestProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     imported: AtomicUsize,
//! }
//!
//! impl IngestProgressCallback for CountingCallback {
//!     fn on_file_imported(&self, label: &str, _index: usize, _total: usize) {
//!         self.imported.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("imported {label}");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { imported: AtomicUsize::new(0) });
//! let config = IngestConfig::builder()
//!     .progress_callback(cb as Arc<dyn IngestProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch runner as it processes each file.
///
/// Files are ingested concurrently, so implementations must be `Send + Sync`
/// and guard shared mutable state. Every method has a no-op default.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once before any file is attempted.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file is handed to the pipelines.
    ///
    /// # Arguments
    /// * `label` - display name of the file (usually its path)
    /// * `index` - 1-indexed position in the batch
    /// * `total` - number of files in the batch
    fn on_file_start(&self, label: &str, index: usize, total: usize) {
        let _ = (label, index, total);
    }

    /// Called when a file produced a document record.
    fn on_file_imported(&self, label: &str, index: usize, total: usize) {
        let _ = (label, index, total);
    }

    /// Called when no pipeline accepted the file's content type.
    fn on_file_skipped(&self, label: &str, index: usize, total: usize) {
        let _ = (label, index, total);
    }

    /// Called when a pipeline failed hard on the file.
    fn on_file_error(&self, label: &str, index: usize, total: usize, error: &str) {
        let _ = (label, index, total, error);
    }

    /// Called once after every file has been attempted.
    fn on_batch_complete(&self, total_files: usize, imported: usize) {
        let _ = (total_files, imported);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        started: AtomicUsize,
        imported: AtomicUsize,
        skipped: AtomicUsize,
        errors: AtomicUsize,
    }

    impl IngestProgressCallback for TrackingCallback {
        fn on_file_start(&self, _label: &str, _index: usize, _total: usize) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_imported(&self, _label: &str, _index: usize, _total: usize) {
            self.imported.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_skipped(&self, _label: &str, _index: usize, _total: usize) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_error(&self, _label: &str, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(3);
        cb.on_file_start("a.p7m", 1, 3);
        cb.on_file_imported("a.p7m", 1, 3);
        cb.on_file_error("b.p7m", 2, 3, "bad envelope");
        cb.on_batch_complete(3, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_file_start("a.p7m", 1, 3);
        tracker.on_file_imported("a.p7m", 1, 3);
        tracker.on_file_start("b.txt", 2, 3);
        tracker.on_file_skipped("b.txt", 2, 3);
        tracker.on_file_start("c.p7m", 3, 3);
        tracker.on_file_error("c.p7m", 3, 3, "MalformedEnvelope");

        assert_eq!(tracker.started.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.imported.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }
}
