//! The ingestion state machine.
//!
//! ```text
//! Received ─▶ Materialized ─▶ Validated ─▶ ContentReady ─▶ Persisted ─▶ Cleaned
//!                  │               │              │             │
//!                  └── Aborted ◀───┘              └── Failed ◀──┘
//! ```
//!
//! [`Pipeline`] drives one run and is written once. The kind-specific work
//! (accepted mimetypes, extraction or transformation, naming rule, page
//! count) comes from a [`Format`]: [`Envelope`] for signed `.p7m` files and
//! [`Xml`] for invoice XML rendered to PDF.
//!
//! A mimetype mismatch ends the run in `Aborted` with `Ok(None)`. Any other
//! problem ends it in `Failed` and the error is returned unchanged. Staged
//! artifacts are RAII-owned, so both paths release them.

mod dispatch;
mod envelope;
mod xml;

pub use dispatch::{
    apply_sync, chain, dispatch, ingest_batch, submit, BatchReport, Dispatch, Dispatched,
    FileOutcome, FileStatus, IngestJob,
};
pub use envelope::Envelope;
pub use xml::Xml;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::pipeline::artifact::StagedArtifact;
use crate::pipeline::materialize::{self, Materialized};
use crate::pipeline::naming::{self, NameRule, NamingDecision, PersistPlan};
use crate::pipeline::sniff;
use crate::pipeline::transform::{ChromeRenderer, Renderer};
use crate::request::{IngestOptions, Payload, PipelineInput, SourceKind};
use crate::store::{DocumentRecord, DocumentStore, NewDocument, UserDirectory};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything a run needs besides its input.
#[derive(Clone)]
pub struct IngestContext {
    pub config: Arc<IngestConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub users: Arc<dyn UserDirectory>,
    pub renderer: Arc<dyn Renderer>,
}

impl IngestContext {
    /// Uses `config.renderer` when set, otherwise a [`ChromeRenderer`]
    /// built from the config.
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn DocumentStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        let renderer = match config.renderer {
            Some(ref r) => Arc::clone(r),
            None => Arc::new(ChromeRenderer::from_config(&config)) as Arc<dyn Renderer>,
        };
        Self {
            config: Arc::new(config),
            store,
            users,
            renderer,
        }
    }
}

/// The two ingestion kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineKind {
    /// PKCS#7 signed envelope (`.p7m`).
    Envelope,
    /// Invoice XML rendered to PDF.
    Xml,
}

impl PipelineKind {
    /// A boxed pipeline of this kind over `input`.
    pub fn build(self, input: PipelineInput, ctx: IngestContext) -> Box<dyn ImportPipeline> {
        match self {
            PipelineKind::Envelope => Box::new(Pipeline::<Envelope>::new(input, ctx)),
            PipelineKind::Xml => Box::new(Pipeline::<Xml>::new(input, ctx)),
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineKind::Envelope => "p7m",
            PipelineKind::Xml => "xml",
        })
    }
}

impl FromStr for PipelineKind {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p7m" | "envelope" | "pkcs7" => Ok(PipelineKind::Envelope),
            "xml" => Ok(PipelineKind::Xml),
            other => Err(IngestError::InvalidConfig(format!(
                "unknown pipeline kind '{other}' (expected p7m or xml)"
            ))),
        }
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Received,
    Materialized,
    Validated,
    ContentReady,
    Persisted,
    Cleaned,
    /// Mimetype not accepted; nothing was persisted.
    Aborted,
    /// A hard error was returned.
    Failed,
}

/// Result of a run that produced or updated a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub kind: PipelineKind,
    pub document: DocumentRecord,
}

/// Kind-specific behaviour plugged into [`Pipeline`].
#[async_trait]
pub trait Format: Default + Send + Sync + 'static {
    const KIND: PipelineKind;

    /// Mimetypes this kind accepts.
    fn accepted_mimetypes(&self) -> &'static [&'static str];

    fn name_rule(&self) -> NameRule;

    fn page_count(&self) -> u32 {
        1
    }

    fn check_mimetype(&self, path: &Path) -> Result<bool, IngestError> {
        sniff::accepts(path, self.accepted_mimetypes())
    }

    /// `Validated → ContentReady`. The returned artifact (if any) is what gets
    /// sized and handed to the store; `None` means the materialized file is.
    async fn content_ready(
        &self,
        materialized: &Path,
        ctx: &IngestContext,
    ) -> Result<Option<StagedArtifact>, IngestError>;

    /// Runs after the record exists and its file was handed off. A returned
    /// artifact is attached to the record as its final file.
    async fn after_handoff(
        &self,
        materialized: &Path,
        ctx: &IngestContext,
    ) -> Result<Option<StagedArtifact>, IngestError> {
        let _ = (materialized, ctx);
        Ok(None)
    }
}

/// Object-safe face of a pipeline, used by dispatchers and batch runners.
#[async_trait]
pub trait ImportPipeline: Send {
    fn kind(&self) -> PipelineKind;

    fn state(&self) -> RunState;

    /// Record created or updated by the last successful run.
    fn document(&self) -> Option<&DocumentRecord>;

    /// Run the state machine once.
    async fn apply(&mut self, options: IngestOptions) -> Result<Option<ImportOutcome>, IngestError>;

    /// Construction arguments for a follow-up stage over the artifact this
    /// run produced. `None` until a record exists.
    fn init_args(&self) -> Option<PipelineInput>;

    /// Options for that follow-up stage: supersede, never create.
    fn apply_args(&self) -> Option<IngestOptions>;
}

/// One ingestion of one payload by one [`Format`].
pub struct Pipeline<F: Format> {
    format: F,
    input: PipelineInput,
    ctx: IngestContext,
    state: RunState,
    document: Option<DocumentRecord>,
    /// Override or materialized base name, before normalisation.
    source_name: Option<String>,
    /// Last artifact produced; kept for a follow-up stage, removed on drop.
    produced: Option<StagedArtifact>,
}

pub type EnvelopePipeline = Pipeline<Envelope>;
pub type XmlPipeline = Pipeline<Xml>;

impl<F: Format> Pipeline<F> {
    pub fn new(input: PipelineInput, ctx: IngestContext) -> Self {
        Self {
            format: F::default(),
            input,
            ctx,
            state: RunState::Received,
            document: None,
            source_name: None,
            produced: None,
        }
    }

    fn enter(&mut self, state: RunState) {
        debug!(
            kind = %F::KIND,
            source = %self.input.source,
            from = ?self.state,
            to = ?state,
            "transition"
        );
        self.state = state;
    }

    async fn run(&mut self, options: IngestOptions) -> Result<Option<ImportOutcome>, IngestError> {
        let source = self.input.source;
        let ctx = self.ctx.clone();
        let scratch = ctx.config.scratch_dir();

        // ── Received → Materialized ──────────────────────────────────────
        let materialized: Materialized =
            materialize::materialize(&self.input.payload, &scratch).await?;
        self.enter(RunState::Materialized);

        // ── Materialized → Validated ─────────────────────────────────────
        if !self.format.check_mimetype(materialized.path())? {
            debug!(kind = %F::KIND, source = %source, "invalid filetype");
            self.enter(RunState::Aborted);
            return Ok(None);
        }
        self.enter(RunState::Validated);

        // ── Validated → ContentReady ─────────────────────────────────────
        let content = self.format.content_ready(materialized.path(), &ctx).await?;
        self.enter(RunState::ContentReady);

        let (owner, lang, parent_id) = if source == SourceKind::Web {
            (options.owner.clone(), options.lang.clone(), options.parent_id.clone())
        } else {
            let props = ctx.users.resolve_user_properties(options.owner.as_deref()).await?;
            (Some(props.user), props.lang, Some(props.inbox_id))
        };

        // ── Naming ───────────────────────────────────────────────────────
        let content_path = content
            .as_ref()
            .map(StagedArtifact::path)
            .unwrap_or_else(|| materialized.path());
        let size = tokio::fs::metadata(content_path)
            .await
            .map_err(|e| IngestError::io(content_path, e))?
            .len();
        let base_name = materialized.base_name();
        let decision = NamingDecision::new(
            options.name.as_deref(),
            &base_name,
            self.format.name_rule(),
            size,
            self.format.page_count(),
        );
        self.source_name = Some(
            options
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or(base_name),
        );

        // ── ContentReady → Persisted ─────────────────────────────────────
        let mut record = match naming::plan(options.create_document, self.input.document.clone())? {
            PersistPlan::Create => {
                let new = NewDocument {
                    owner,
                    title: decision.name.clone(),
                    size: decision.size,
                    lang,
                    file_name: decision.name.clone(),
                    parent_id,
                    page_count: decision.page_count,
                    notes: options.notes.clone(),
                };
                ctx.store.create_document(new).await.inspect_err(|e| {
                    if matches!(e, IngestError::Validation(_)) {
                        error!(kind = %F::KIND, source = %source, error = %e, "validation failed");
                    }
                })?
            }
            PersistPlan::Supersede(mut doc) => {
                naming::supersede(&mut doc, &decision.name);
                doc.size = decision.size;
                ctx.store.save(&doc).await?;
                doc
            }
        };
        self.document = Some(record.clone());

        ctx.store.store_file(&record, content_path).await?;
        self.enter(RunState::Persisted);

        match self.format.after_handoff(materialized.path(), &ctx).await? {
            Some(rendered) => {
                record.size = rendered.size()?;
                ctx.store.store_file(&record, rendered.path()).await?;
                ctx.store.save(&record).await?;
                self.document = Some(record.clone());
                self.produced = Some(rendered);
            }
            None => self.produced = content,
        }

        // ── Persisted → Cleaned ──────────────────────────────────────────
        drop(materialized);
        if options.delete_after_import {
            if let Some(path) = self.input.payload.on_disk_path() {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => debug!(path = %path.display(), "removed source after import"),
                    Err(e) => warn!(
                        path = %path.display(),
                        error = %e,
                        "imported, but the source could not be removed"
                    ),
                }
            }
        }
        self.enter(RunState::Cleaned);

        info!(
            kind = %F::KIND,
            source = %source,
            id = %record.id,
            version = record.version,
            file_name = %record.file_name,
            "import complete"
        );
        Ok(Some(ImportOutcome {
            kind: F::KIND,
            document: record,
        }))
    }
}

#[async_trait]
impl<F: Format> ImportPipeline for Pipeline<F> {
    fn kind(&self) -> PipelineKind {
        F::KIND
    }

    fn state(&self) -> RunState {
        self.state
    }

    fn document(&self) -> Option<&DocumentRecord> {
        self.document.as_ref()
    }

    async fn apply(
        &mut self,
        options: IngestOptions,
    ) -> Result<Option<ImportOutcome>, IngestError> {
        self.state = RunState::Received;
        self.produced = None;
        let result = self.run(options).await;
        if result.is_err() {
            self.enter(RunState::Failed);
        }
        result
    }

    fn init_args(&self) -> Option<PipelineInput> {
        let document = self.document.clone()?;
        let produced = self.produced.as_ref()?;
        Some(PipelineInput {
            source: self.input.source,
            payload: Payload::OnDisk(produced.path().to_path_buf()),
            document: Some(document),
        })
    }

    fn apply_args(&self) -> Option<IngestOptions> {
        self.document.as_ref()?;
        let source_name = self.source_name.as_deref()?;
        Some(IngestOptions {
            name: Some(naming::followup_name(source_name, self.format.name_rule())),
            create_document: false,
            ..IngestOptions::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_cli_spellings() {
        assert_eq!("p7m".parse::<PipelineKind>().unwrap(), PipelineKind::Envelope);
        assert_eq!("XML".parse::<PipelineKind>().unwrap(), PipelineKind::Xml);
        assert!("pdf".parse::<PipelineKind>().is_err());
    }

    #[test]
    fn kind_display_round_trips() {
        for kind in [PipelineKind::Envelope, PipelineKind::Xml] {
            assert_eq!(kind.to_string().parse::<PipelineKind>().unwrap(), kind);
        }
    }
}
