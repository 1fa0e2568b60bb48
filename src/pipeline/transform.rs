//! Structural transformation: invoice XML → HTML (XSLT) → PDF (renderer).
//!
//! ## Steps
//!
//! 1. Parse the input XML and apply the configured stylesheet. With the
//!    `libxslt` feature this happens in-process (under `spawn_blocking`,
//!    libxml2 documents are not `Send`); without it the `xsltproc`
//!    executable is spawned.
//! 2. Write the HTML to a scratch artifact.
//! 3. Hand the HTML to a [`Renderer`] that writes the PDF artifact.
//!
//! Every failure is [`IngestError::TransformFailed`] tagged with the
//! [`TransformStep`] that broke. Nothing is retried.

use crate::config::IngestConfig;
use crate::error::{IngestError, TransformStep};
use crate::pipeline::artifact::StagedArtifact;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Turns an HTML file into a paginated PDF.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render `html` into `output`. `output` already exists (empty) and
    /// must hold the PDF when this returns `Ok`.
    async fn render(&self, html: &Path, output: &Path) -> Result<(), IngestError>;
}

/// Headless Chrome (or any executable accepting `--print-to-pdf=<out> <in>`).
#[derive(Debug, Clone)]
pub struct ChromeRenderer {
    exe: PathBuf,
    flags: Vec<String>,
    timeout: Duration,
}

impl ChromeRenderer {
    pub fn new(exe: impl Into<PathBuf>, flags: Vec<String>, timeout: Duration) -> Self {
        Self {
            exe: exe.into(),
            flags,
            timeout,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            config.renderer_exe.clone(),
            config.renderer_flags.clone(),
            Duration::from_secs(config.render_timeout_secs),
        )
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn render(&self, html: &Path, output: &Path) -> Result<(), IngestError> {
        let mut cmd = Command::new(&self.exe);
        cmd.args(&self.flags)
            .arg(format!("--print-to-pdf={}", output.display()))
            .arg(html)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            IngestError::transform(
                TransformStep::Render,
                format!("failed to start renderer '{}': {e}", self.exe.display()),
            )
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let out = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                IngestError::transform(TransformStep::Render, format!("renderer wait failed: {e}"))
            })?,
            Err(_) => {
                warn!(
                    exe = %self.exe.display(),
                    secs = self.timeout.as_secs(),
                    "renderer timed out"
                );
                return Err(IngestError::transform(
                    TransformStep::Timeout,
                    format!("renderer did not exit within {}s", self.timeout.as_secs()),
                ));
            }
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(IngestError::transform(
                TransformStep::Render,
                format!("renderer exited with {}: {}", out.status, stderr.trim()),
            ));
        }
        Ok(())
    }
}

/// Transform the invoice at `input` into a PDF artifact.
pub async fn transform(
    input: &Path,
    config: &IngestConfig,
    renderer: &dyn Renderer,
) -> Result<StagedArtifact, IngestError> {
    let scratch = config.scratch_dir();

    let html = apply_stylesheet(&config.stylesheet, input, config).await?;
    let html_artifact = StagedArtifact::write_in(&scratch, ".html", html.as_bytes())?;
    debug!(path = %html_artifact.path().display(), bytes = html.len(), "wrote intermediate HTML");

    let pdf = StagedArtifact::reserve_in(&scratch, ".pdf")?;
    renderer.render(html_artifact.path(), pdf.path()).await?;

    let size = pdf.size()?;
    if size == 0 {
        return Err(IngestError::transform(
            TransformStep::Render,
            "renderer exited successfully but produced no output",
        ));
    }
    info!(input = %input.display(), bytes = size, "rendered PDF");
    Ok(pdf)
}

/// Apply the XSLT at `stylesheet` to the XML at `input`, returning the
/// serialised result.
pub async fn apply_stylesheet(
    stylesheet: &Path,
    input: &Path,
    config: &IngestConfig,
) -> Result<String, IngestError> {
    if !stylesheet.is_file() {
        return Err(IngestError::transform(
            TransformStep::Stylesheet,
            format!("stylesheet not found: '{}'", stylesheet.display()),
        ));
    }
    run_xslt(stylesheet, input, config).await
}

#[cfg(feature = "libxslt")]
async fn run_xslt(
    stylesheet: &Path,
    input: &Path,
    _config: &IngestConfig,
) -> Result<String, IngestError> {
    let stylesheet = stylesheet.to_path_buf();
    let input = input.to_path_buf();

    tokio::task::spawn_blocking(move || run_xslt_blocking(&stylesheet, &input))
        .await
        .map_err(|e| IngestError::Internal(format!("XSLT task panicked: {}", e)))?
}

#[cfg(feature = "libxslt")]
fn run_xslt_blocking(stylesheet: &Path, input: &Path) -> Result<String, IngestError> {
    let utf8 = |p: &Path, step| {
        p.to_str()
            .map(str::to_owned)
            .ok_or_else(|| {
                IngestError::transform(step, format!("path is not UTF-8: {}", p.display()))
            })
    };

    let mut xslt = libxslt::parser::parse_file(&utf8(stylesheet, TransformStep::Stylesheet)?)
        .map_err(|e| IngestError::transform(TransformStep::Stylesheet, format!("{e:?}")))?;

    let strict = libxml::parser::ParserOptions {
        recover: false,
        ..Default::default()
    };
    let doc = libxml::parser::Parser::default()
        .parse_file_with_options(&utf8(input, TransformStep::Parse)?, strict)
        .map_err(|e| IngestError::transform(TransformStep::Parse, format!("{e:?}")))?;

    let out = xslt
        .transform(&doc, Vec::new())
        .map_err(|e| IngestError::transform(TransformStep::Transform, format!("{e:?}")))?;

    Ok(out.to_string())
}

#[cfg(not(feature = "libxslt"))]
async fn run_xslt(
    stylesheet: &Path,
    input: &Path,
    config: &IngestConfig,
) -> Result<String, IngestError> {
    let child = Command::new("xsltproc")
        .arg(stylesheet)
        .arg(input)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            IngestError::transform(
                TransformStep::Transform,
                format!("failed to start xsltproc: {e}"),
            )
        })?;

    let timeout = Duration::from_secs(config.render_timeout_secs);
    let out = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            IngestError::transform(
                TransformStep::Timeout,
                format!("xsltproc did not exit within {}s", timeout.as_secs()),
            )
        })?
        .map_err(|e| {
            IngestError::transform(TransformStep::Transform, format!("xsltproc wait failed: {e}"))
        })?;

    if !out.status.success() {
        // xsltproc exits 4 when it cannot parse the stylesheet, 6 for input
        // errors; everything else is a transform failure.
        let step = match out.status.code() {
            Some(4) => TransformStep::Stylesheet,
            Some(6) => TransformStep::Parse,
            _ => TransformStep::Transform,
        };
        return Err(IngestError::transform(
            step,
            String::from_utf8_lossy(&out.stderr).trim().to_string(),
        ));
    }
    String::from_utf8(out.stdout)
        .map_err(|e| {
            IngestError::transform(TransformStep::Transform, format!("output is not UTF-8: {e}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STYLESHEET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:output method="html"/>
  <xsl:template match="/">
    <html><body><h1><xsl:value-of select="/Invoice/Number"/></h1></body></html>
  </xsl:template>
</xsl:stylesheet>
"#;

    /// Writes `%PDF-1.4` followed by the HTML it was given.
    struct EchoRenderer;

    #[async_trait]
    impl Renderer for EchoRenderer {
        async fn render(&self, html: &Path, output: &Path) -> Result<(), IngestError> {
            let mut bytes = b"%PDF-1.4\n".to_vec();
            bytes.extend(tokio::fs::read(html).await.map_err(|e| IngestError::io(html, e))?);
            tokio::fs::write(output, bytes).await.map_err(|e| IngestError::io(output, e))
        }
    }

    /// Succeeds without writing anything.
    struct SilentRenderer;

    #[async_trait]
    impl Renderer for SilentRenderer {
        async fn render(&self, _html: &Path, _output: &Path) -> Result<(), IngestError> {
            Ok(())
        }
    }

    fn setup(xml: &str) -> (tempfile::TempDir, IngestConfig, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let xsl = dir.path().join("style.xsl");
        std::fs::write(&xsl, STYLESHEET).unwrap();
        let input = dir.path().join("invoice.xml");
        std::fs::write(&input, xml).unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let config = IngestConfig::builder()
            .stylesheet(xsl)
            .scratch_dir(scratch)
            .build()
            .unwrap();
        (dir, config, input)
    }

    #[tokio::test]
    async fn stylesheet_output_reaches_renderer() {
        let (_dir, config, input) =
            setup(r#"<?xml version="1.0"?><Invoice><Number>FT-2024-17</Number></Invoice>"#);
        let pdf = transform(&input, &config, &EchoRenderer).await.unwrap();
        let bytes = std::fs::read(pdf.path()).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(String::from_utf8_lossy(&bytes).contains("FT-2024-17"));
    }

    #[tokio::test]
    async fn intermediate_html_is_released() {
        let (_dir, config, input) =
            setup(r#"<?xml version="1.0"?><Invoice><Number>1</Number></Invoice>"#);
        let pdf = transform(&input, &config, &EchoRenderer).await.unwrap();
        let left: Vec<_> = std::fs::read_dir(config.scratch_dir()).unwrap().collect();
        assert_eq!(left.len(), 1, "only the PDF should remain");
        drop(pdf);
        assert_eq!(std::fs::read_dir(config.scratch_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_stylesheet_fails_before_parsing() {
        let (_dir, mut config, input) = setup(r#"<?xml version="1.0"?><Invoice/>"#);
        config.stylesheet = PathBuf::from("/no/such/style.xsl");
        let err = transform(&input, &config, &EchoRenderer).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::TransformFailed { step: TransformStep::Stylesheet, .. }
        ));
    }

    #[tokio::test]
    async fn malformed_xml_fails() {
        let (_dir, config, input) = setup(r#"<?xml version="1.0"?><Invoice><Number>1</Invoice>"#);
        let err = transform(&input, &config, &EchoRenderer).await.unwrap_err();
        assert!(matches!(err, IngestError::TransformFailed { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn empty_render_output_is_an_error() {
        let (_dir, config, input) = setup(r#"<?xml version="1.0"?><Invoice/>"#);
        let err = transform(&input, &config, &SilentRenderer).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::TransformFailed { step: TransformStep::Render, .. }
        ));
    }

    #[cfg(unix)]
    mod chrome {
        use super::*;

        /// `sh -c SCRIPT fake-chrome --print-to-pdf=<out> <in>`
        fn shell_renderer(script: &str, timeout: Duration) -> ChromeRenderer {
            ChromeRenderer::new(
                "sh",
                vec!["-c".into(), script.into(), "fake-chrome".into()],
                timeout,
            )
        }

        const WRITES_PDF: &str = concat!(
            r#"for a in "$@"; do case "$a" in --print-to-pdf=*) out="${a#--print-to-pdf=}";; "#,
            r#"esac; done; printf '%%PDF-1.4 fake\n' > "$out""#,
        );

        #[tokio::test]
        async fn renderer_receives_output_argument() {
            let dir = tempfile::tempdir().unwrap();
            let html = dir.path().join("in.html");
            let out = dir.path().join("out.pdf");
            std::fs::write(&html, "<html/>").unwrap();

            shell_renderer(WRITES_PDF, Duration::from_secs(10))
                .render(&html, &out)
                .await
                .unwrap();
            assert!(std::fs::read(&out).unwrap().starts_with(b"%PDF-1.4"));
        }

        #[tokio::test]
        async fn non_zero_exit_is_render_failure() {
            let dir = tempfile::tempdir().unwrap();
            let html = dir.path().join("in.html");
            std::fs::write(&html, "<html/>").unwrap();

            let err = shell_renderer("echo boom >&2; exit 3", Duration::from_secs(10))
                .render(&html, &dir.path().join("out.pdf"))
                .await
                .unwrap_err();
            match err {
                IngestError::TransformFailed { step, detail } => {
                    assert_eq!(step, TransformStep::Render);
                    assert!(detail.contains("boom"), "got: {detail}");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn hung_renderer_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let html = dir.path().join("in.html");
            std::fs::write(&html, "<html/>").unwrap();

            let started = std::time::Instant::now();
            let err = shell_renderer("sleep 30", Duration::from_secs(1))
                .render(&html, &dir.path().join("out.pdf"))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                IngestError::TransformFailed { step: TransformStep::Timeout, .. }
            ));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn missing_executable_is_render_failure() {
            let r = ChromeRenderer::new("/no/such/chrome", Vec::new(), Duration::from_secs(1));
            let err = r
                .render(Path::new("/tmp/in.html"), Path::new("/tmp/out.pdf"))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                IngestError::TransformFailed { step: TransformStep::Render, .. }
            ));
        }
    }
}
