//! Running pipelines: fall-through dispatch, background submission,
//! two-stage chaining and concurrent batches.

use super::{ImportOutcome, ImportPipeline, IngestContext, PipelineKind};
use crate::error::IngestError;
use crate::request::{IngestOptions, PipelineInput};
use crate::store::DocumentRecord;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The pipeline that accepted an input, with what it produced.
pub struct Dispatched {
    pub pipeline: Box<dyn ImportPipeline>,
    pub outcome: ImportOutcome,
}

/// Offer `input` to each kind in order until one accepts it.
///
/// A kind that rejects the mimetype is skipped; the first hard error stops
/// the search. `Ok(None)` means no kind accepted the input.
pub async fn dispatch(
    input: PipelineInput,
    options: IngestOptions,
    kinds: &[PipelineKind],
    ctx: &IngestContext,
) -> Result<Option<Dispatched>, IngestError> {
    for &kind in kinds {
        let mut pipeline = kind.build(input.clone(), ctx.clone());
        if let Some(outcome) = pipeline.apply(options.clone()).await? {
            return Ok(Some(Dispatched { pipeline, outcome }));
        }
        debug!(kind = %kind, "input not accepted, trying next kind");
    }
    Ok(None)
}

/// What [`submit`] did with a run.
pub enum Dispatch {
    /// Ran to completion on the caller's task.
    Completed(Result<Option<ImportOutcome>, IngestError>),
    /// Spawned onto the runtime; the handle yields the run's result.
    Queued(JoinHandle<Result<Option<ImportOutcome>, IngestError>>),
}

/// Run `pipeline` inline, or in the background when `options.apply_async`.
pub async fn submit(mut pipeline: Box<dyn ImportPipeline>, options: IngestOptions) -> Dispatch {
    if options.apply_async {
        let kind = pipeline.kind();
        debug!(kind = %kind, "queued for background import");
        Dispatch::Queued(tokio::spawn(async move { pipeline.apply(options).await }))
    } else {
        Dispatch::Completed(pipeline.apply(options).await)
    }
}

/// Blocking form of [`ImportPipeline::apply`].
///
/// Creates a temporary tokio runtime internally, so it must not be called
/// from inside one.
pub fn apply_sync(
    pipeline: &mut dyn ImportPipeline,
    options: IngestOptions,
) -> Result<Option<ImportOutcome>, IngestError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| IngestError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(pipeline.apply(options))
}

/// Run `first`, then feed what it produced to a `next` pipeline that
/// supersedes the same record.
///
/// Returns the follow-up's outcome when it accepted the artifact, otherwise
/// the first stage's.
pub async fn chain(
    first: &mut dyn ImportPipeline,
    options: IngestOptions,
    next: PipelineKind,
    ctx: &IngestContext,
) -> Result<Option<ImportOutcome>, IngestError> {
    let Some(first_outcome) = first.apply(options).await? else {
        return Ok(None);
    };
    let (Some(input), Some(args)) = (first.init_args(), first.apply_args()) else {
        return Ok(Some(first_outcome));
    };

    let mut follow_up = next.build(input, ctx.clone());
    match follow_up.apply(args).await? {
        Some(outcome) => Ok(Some(outcome)),
        None => {
            debug!(first = %first.kind(), next = %next, "follow-up did not accept the artifact");
            Ok(Some(first_outcome))
        }
    }
}

/// One file of a batch.
#[derive(Debug, Clone)]
pub struct IngestJob {
    /// Display name used in progress events and the report.
    pub label: String,
    pub input: PipelineInput,
    pub options: IngestOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Imported { document: DocumentRecord },
    /// No kind accepted the content type.
    Skipped,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub label: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// In input order.
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn imported(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Imported { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Failed { .. }))
    }

    fn count(&self, f: impl Fn(&FileStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(&o.status)).count()
    }
}

/// Ingest `jobs` with up to `config.concurrency` runs in flight.
///
/// Each job is dispatched across `kinds`. When `follow_up` is set and the
/// winning kind differs from it, the produced artifact is chained into that
/// kind. A failing file never stops the batch.
pub async fn ingest_batch(
    jobs: Vec<IngestJob>,
    kinds: &[PipelineKind],
    follow_up: Option<PipelineKind>,
    ctx: &IngestContext,
) -> BatchReport {
    let total = jobs.len();
    let progress = ctx.config.progress_callback.clone();
    if let Some(ref cb) = progress {
        cb.on_batch_start(total);
    }

    let tasks = jobs.into_iter().enumerate().map(|(idx, job)| {
        let ctx = ctx.clone();
        let progress = progress.clone();
        let kinds = kinds.to_vec();
        async move {
            let index = idx + 1;
            if let Some(ref cb) = progress {
                cb.on_file_start(&job.label, index, total);
            }
            let status = match run_job(job.input, job.options, &kinds, follow_up, &ctx).await {
                Ok(Some(outcome)) => {
                    if let Some(ref cb) = progress {
                        cb.on_file_imported(&job.label, index, total);
                    }
                    FileStatus::Imported {
                        document: outcome.document,
                    }
                }
                Ok(None) => {
                    info!(file = %job.label, "skipped: content type not accepted");
                    if let Some(ref cb) = progress {
                        cb.on_file_skipped(&job.label, index, total);
                    }
                    FileStatus::Skipped
                }
                Err(e) => {
                    warn!(file = %job.label, error = %e, "import failed");
                    if let Some(ref cb) = progress {
                        cb.on_file_error(&job.label, index, total, &e.to_string());
                    }
                    FileStatus::Failed { error: e.to_string() }
                }
            };
            (
                idx,
                FileOutcome {
                    label: job.label,
                    status,
                },
            )
        }
    });
    let mut indexed: Vec<(usize, FileOutcome)> = stream::iter(tasks)
        .buffer_unordered(ctx.config.concurrency)
        .collect()
        .await;

    indexed.sort_by_key(|(idx, _)| *idx);
    let report = BatchReport {
        outcomes: indexed.into_iter().map(|(_, o)| o).collect(),
    };
    if let Some(ref cb) = progress {
        cb.on_batch_complete(total, report.imported());
    }
    report
}

async fn run_job(
    input: PipelineInput,
    options: IngestOptions,
    kinds: &[PipelineKind],
    follow_up: Option<PipelineKind>,
    ctx: &IngestContext,
) -> Result<Option<ImportOutcome>, IngestError> {
    let Some(Dispatched { pipeline, outcome }) = dispatch(input, options, kinds, ctx).await? else {
        return Ok(None);
    };
    let Some(next) = follow_up.filter(|k| *k != outcome.kind) else {
        return Ok(Some(outcome));
    };
    let (Some(input), Some(args)) = (pipeline.init_args(), pipeline.apply_args()) else {
        return Ok(Some(outcome));
    };

    let mut stage = next.build(input, ctx.clone());
    Ok(stage.apply(args).await?.or(Some(outcome)))
}
