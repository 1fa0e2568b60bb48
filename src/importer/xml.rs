use super::{Format, IngestContext, PipelineKind};
use crate::error::IngestError;
use crate::pipeline::artifact::StagedArtifact;
use crate::pipeline::naming::NameRule;
use crate::pipeline::sniff;
use crate::pipeline::transform;
use async_trait::async_trait;
use std::path::Path;

/// Invoice XML rendered to PDF through the configured stylesheet.
///
/// By default the record is created from the XML and the PDF attached
/// afterwards, so a render failure leaves a record holding the XML. With
/// `render_before_persist` the PDF is produced first and a render failure
/// creates nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Xml;

#[async_trait]
impl Format for Xml {
    const KIND: PipelineKind = PipelineKind::Xml;

    fn accepted_mimetypes(&self) -> &'static [&'static str] {
        &[sniff::TEXT_XML, sniff::APPLICATION_XML]
    }

    fn name_rule(&self) -> NameRule {
        NameRule::ForcePdf
    }

    async fn content_ready(
        &self,
        materialized: &Path,
        ctx: &IngestContext,
    ) -> Result<Option<StagedArtifact>, IngestError> {
        if !ctx.config.render_before_persist {
            return Ok(None);
        }
        transform::transform(materialized, &ctx.config, ctx.renderer.as_ref())
            .await
            .map(Some)
    }

    async fn after_handoff(
        &self,
        materialized: &Path,
        ctx: &IngestContext,
    ) -> Result<Option<StagedArtifact>, IngestError> {
        if ctx.config.render_before_persist {
            return Ok(None);
        }
        transform::transform(materialized, &ctx.config, ctx.renderer.as_ref())
            .await
            .map(Some)
    }
}
