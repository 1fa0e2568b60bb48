//! Configuration types for e-invoice ingestion.
//!
//! All pipeline behaviour is controlled through [`IngestConfig`], built via
//! its [`IngestConfigBuilder`] or read from the environment with
//! [`IngestConfig::from_env`]. The config is passed explicitly into every
//! pipeline; nothing is read from process-wide state at run time.

use crate::error::IngestError;
use crate::pipeline::transform::Renderer;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default headless renderer executable.
pub const DEFAULT_RENDERER_EXE: &str = "/usr/bin/google-chrome-stable";

/// Default XML → HTML stylesheet.
pub const DEFAULT_STYLESHEET: &str = "/tmp/FoglioStileAssoSoftware.xsl";

/// Flags passed to the renderer before the output and input arguments.
pub const DEFAULT_RENDERER_FLAGS: [&str; 3] =
    ["--headless", "--no-gpu", "--print-to-pdf-no-header"];

/// Configuration for the ingestion pipelines.
///
/// # Example
/// ```rust
/// use einvoice_ingest::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .stylesheet("/etc/einvoice/FoglioStile.xsl")
///     .render_timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.render_timeout_secs, 30);
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Headless renderer executable. Default: [`DEFAULT_RENDERER_EXE`].
    pub renderer_exe: PathBuf,

    /// Flags given to the renderer. Default: [`DEFAULT_RENDERER_FLAGS`].
    ///
    /// The renderer is invoked as
    /// `<renderer_exe> <flags…> --print-to-pdf=<output> <input.html>`.
    pub renderer_flags: Vec<String>,

    /// XSLT stylesheet mapping invoice XML to printable HTML.
    /// Default: [`DEFAULT_STYLESHEET`].
    pub stylesheet: PathBuf,

    /// Seconds the renderer may run before it is killed. Default: 60.
    ///
    /// A hung renderer fails the run with
    /// [`crate::error::TransformStep::Timeout`] instead of blocking it.
    pub render_timeout_secs: u64,

    /// Directory for staged artifacts. `None` uses the system temp dir.
    pub scratch_dir: Option<PathBuf>,

    /// Render XML invoices *before* the document record is written. Default: false.
    ///
    /// With the default the record is created from the XML source first and
    /// the rendered PDF is attached afterwards, so a render failure leaves a
    /// record behind. Setting this defers record creation until the PDF
    /// exists.
    pub render_before_persist: bool,

    /// Files processed concurrently by [`crate::importer::ingest_batch`]. Default: 4.
    pub concurrency: usize,

    /// Pre-constructed renderer. Takes precedence over `renderer_exe`.
    pub renderer: Option<Arc<dyn Renderer>>,

    /// Optional per-file progress events for batch ingestion.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            renderer_exe: PathBuf::from(DEFAULT_RENDERER_EXE),
            renderer_flags: DEFAULT_RENDERER_FLAGS.iter().map(|s| s.to_string()).collect(),
            stylesheet: PathBuf::from(DEFAULT_STYLESHEET),
            render_timeout_secs: 60,
            scratch_dir: None,
            render_before_persist: false,
            concurrency: 4,
            renderer: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("renderer_exe", &self.renderer_exe)
            .field("renderer_flags", &self.renderer_flags)
            .field("stylesheet", &self.stylesheet)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("scratch_dir", &self.scratch_dir)
            .field("render_before_persist", &self.render_before_persist)
            .field("concurrency", &self.concurrency)
            .field("renderer", &self.renderer.as_ref().map(|_| "<dyn Renderer>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IngestProgressCallback>"),
            )
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a config from the defaults overlaid with environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `E_INVOICE_CHROME_EXE` | `renderer_exe` |
    /// | `E_INVOICE_STYLESHEET` | `stylesheet` |
    /// | `E_INVOICE_RENDER_TIMEOUT` | `render_timeout_secs` |
    /// | `E_INVOICE_SCRATCH_DIR` | `scratch_dir` |
    pub fn from_env() -> Result<Self, IngestError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, IngestError> {
        let mut builder = Self::builder();
        if let Some(exe) = lookup("E_INVOICE_CHROME_EXE").filter(|v| !v.is_empty()) {
            builder = builder.renderer_exe(exe);
        }
        if let Some(xsl) = lookup("E_INVOICE_STYLESHEET").filter(|v| !v.is_empty()) {
            builder = builder.stylesheet(xsl);
        }
        if let Some(secs) = lookup("E_INVOICE_RENDER_TIMEOUT").filter(|v| !v.is_empty()) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                IngestError::InvalidConfig(format!(
                    "E_INVOICE_RENDER_TIMEOUT must be a number of seconds, got '{secs}'"
                ))
            })?;
            builder = builder.render_timeout_secs(secs);
        }
        if let Some(dir) = lookup("E_INVOICE_SCRATCH_DIR").filter(|v| !v.is_empty()) {
            builder = builder.scratch_dir(dir);
        }
        builder.build()
    }

    /// Directory staged artifacts are created in.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn renderer_exe(mut self, exe: impl Into<PathBuf>) -> Self {
        self.config.renderer_exe = exe.into();
        self
    }

    pub fn renderer_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.renderer_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn stylesheet(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.stylesheet = path.into();
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs;
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn render_before_persist(mut self, v: bool) -> Self {
        self.config.render_before_persist = v;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.render_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "render timeout must be at least 1 second".into(),
            ));
        }
        if c.renderer.is_none() && c.renderer_exe.as_os_str().is_empty() {
            return Err(IngestError::InvalidConfig(
                "renderer executable path is empty".into(),
            ));
        }
        if c.stylesheet.as_os_str().is_empty() {
            return Err(IngestError::InvalidConfig("stylesheet path is empty".into()));
        }
        if c.concurrency == 0 {
            return Err(IngestError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}
