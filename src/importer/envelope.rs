use super::{Format, IngestContext, PipelineKind};
use crate::error::IngestError;
use crate::pipeline::artifact::StagedArtifact;
use crate::pipeline::envelope;
use crate::pipeline::naming::NameRule;
use crate::pipeline::sniff;
use async_trait::async_trait;
use std::path::Path;

/// Signed `.p7m` envelopes. The enclosed payload becomes the document.
#[derive(Debug, Default, Clone, Copy)]
pub struct Envelope;

#[async_trait]
impl Format for Envelope {
    const KIND: PipelineKind = PipelineKind::Envelope;

    fn accepted_mimetypes(&self) -> &'static [&'static str] {
        &[sniff::OCTET_STREAM]
    }

    fn name_rule(&self) -> NameRule {
        NameRule::StripExtension
    }

    async fn content_ready(
        &self,
        materialized: &Path,
        ctx: &IngestContext,
    ) -> Result<Option<StagedArtifact>, IngestError> {
        let scratch = ctx.config.scratch_dir();
        envelope::extract(materialized, &scratch).await.map(Some)
    }
}
