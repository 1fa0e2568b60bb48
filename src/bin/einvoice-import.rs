//! CLI binary for einvoice-ingest.
//!
//! A thin shim over the library crate: maps CLI flags to `IngestConfig`,
//! ingests local files into a directory store and prints the outcome.

use anyhow::{Context, Result};
use clap::Parser;
use einvoice_ingest::store::{DirectoryStore, StaticDirectory, UserProperties};
use einvoice_ingest::{
    ingest_batch, BatchReport, FileStatus, IngestConfig, IngestContext, IngestJob, IngestOptions,
    IngestProgressCallback, PipelineInput, PipelineKind, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the whole batch plus a log line per file. Files finish out of
/// order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let style = ProgressStyle::with_template(concat!(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] ",
            "{pos:>3}/{len} files  ⏱ {elapsed_precise}",
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(0);
        bar.set_style(style);
        bar.set_prefix("Importing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
    }

    fn on_file_start(&self, label: &str, _index: usize, _total: usize) {
        self.bar.set_message(label.to_string());
    }

    fn on_file_imported(&self, label: &str, _index: usize, _total: usize) {
        self.bar.println(format!("  {} {}", green("✓"), label));
        self.bar.inc(1);
    }

    fn on_file_skipped(&self, label: &str, _index: usize, _total: usize) {
        self.bar
            .println(format!("  {} {}  {}", dim("-"), label, dim("not an e-invoice")));
        self.bar.inc(1);
    }

    fn on_file_error(&self, label: &str, _index: usize, _total: usize, error: &str) {
        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), label, red(&msg)));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total_files: usize, _imported: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Import a signed invoice into ./store
  einvoice-import --store ./store IT01234567890_FPR01.xml.p7m

  # Unwrap the envelope, then render the enclosed XML to PDF as version 2
  einvoice-import --store ./store --chain IT01234567890_FPR01.xml.p7m

  # Render plain invoice XML, creating nothing if rendering fails
  einvoice-import --store ./store --kind xml --render-before-persist invoice.xml

  # A whole mail dump, JSON report
  einvoice-import --store ./store --json inbox/*

ENVIRONMENT VARIABLES:
  E_INVOICE_CHROME_EXE      Headless renderer executable
  E_INVOICE_STYLESHEET      XSLT stylesheet for invoice XML
  E_INVOICE_RENDER_TIMEOUT  Seconds before a renderer is killed
  E_INVOICE_SCRATCH_DIR     Directory for temporary artifacts
  RUST_LOG                  Overrides the log filter
"#;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    P7m,
    Xml,
    /// Try the envelope pipeline first, then XML.
    Auto,
}

impl KindArg {
    fn kinds(self) -> Vec<PipelineKind> {
        match self {
            KindArg::P7m => vec![PipelineKind::Envelope],
            KindArg::Xml => vec![PipelineKind::Xml],
            KindArg::Auto => vec![PipelineKind::Envelope, PipelineKind::Xml],
        }
    }
}

/// Import electronic invoices (signed .p7m envelopes and invoice XML).
#[derive(Parser, Debug)]
#[command(
    name = "einvoice-import",
    version,
    about = "Import signed .p7m envelopes and invoice XML into a document store",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Files to import.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Root directory of the document store.
    #[arg(short, long, env = "E_INVOICE_STORE")]
    store: PathBuf,

    /// Which pipeline(s) to offer each file to.
    #[arg(short, long, value_enum, default_value = "auto")]
    kind: KindArg,

    /// Feed an unwrapped envelope's payload through the XML pipeline.
    #[arg(long)]
    chain: bool,

    /// Document name; used verbatim. Only valid with a single input.
    #[arg(long)]
    name: Option<String>,

    /// Language of the owning user.
    #[arg(long, env = "E_INVOICE_LANG")]
    lang: Option<String>,

    /// Notes stored on new records.
    #[arg(long)]
    notes: Option<String>,

    /// Owning user.
    #[arg(long, env = "E_INVOICE_OWNER", default_value = "admin")]
    owner: String,

    /// Parent container for new records.
    #[arg(long, default_value = "inbox")]
    parent: String,

    /// Remove each source file after it was imported.
    #[arg(long)]
    delete_after_import: bool,

    /// Headless renderer executable.
    #[arg(long, env = "E_INVOICE_CHROME_EXE")]
    renderer: Option<PathBuf>,

    /// XSLT stylesheet for invoice XML.
    #[arg(long, env = "E_INVOICE_STYLESHEET")]
    stylesheet: Option<PathBuf>,

    /// Seconds before a renderer is killed.
    #[arg(long, env = "E_INVOICE_RENDER_TIMEOUT", default_value_t = 60)]
    render_timeout: u64,

    /// Directory for temporary artifacts.
    #[arg(long, env = "E_INVOICE_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Render XML to PDF before any record is created.
    #[arg(long)]
    render_before_persist: bool,

    /// Files imported at once.
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// Print a JSON report instead of a summary.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    if cli.name.is_some() && cli.inputs.len() > 1 {
        anyhow::bail!("--name can only be used with a single input");
    }

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn IngestProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    let users = StaticDirectory::new(UserProperties {
        user: cli.owner.clone(),
        lang: cli.lang.clone(),
        inbox_id: cli.parent.clone(),
    });
    let store = DirectoryStore::new(&cli.store);
    tokio::fs::create_dir_all(store.root())
        .await
        .with_context(|| format!("Failed to create store directory {:?}", store.root()))?;
    let ctx = IngestContext::new(config, Arc::new(store), Arc::new(users));

    let options = IngestOptions {
        owner: Some(cli.owner.clone()),
        name: cli.name.clone(),
        notes: cli.notes.clone(),
        delete_after_import: cli.delete_after_import,
        ..IngestOptions::default()
    };
    let jobs = cli
        .inputs
        .iter()
        .map(|path| IngestJob {
            label: path.display().to_string(),
            input: PipelineInput::local(path),
            options: options.clone(),
        })
        .collect();
    let follow_up = cli.chain.then_some(PipelineKind::Xml);

    let report = ingest_batch(jobs, &cli.kind.kinds(), follow_up, &ctx).await;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        print_summary(&report, show_progress);
    }

    if report.failed() > 0 {
        anyhow::bail!("{} of {} files failed", report.failed(), report.outcomes.len());
    }
    Ok(())
}

/// Map CLI args to `IngestConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .render_timeout_secs(cli.render_timeout)
        .render_before_persist(cli.render_before_persist)
        .concurrency(cli.concurrency);
    if let Some(ref exe) = cli.renderer {
        builder = builder.renderer_exe(exe);
    }
    if let Some(ref xsl) = cli.stylesheet {
        builder = builder.stylesheet(xsl);
    }
    if let Some(ref dir) = cli.scratch_dir {
        builder = builder.scratch_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn print_summary(report: &BatchReport, progress_shown: bool) {
    if !progress_shown {
        for outcome in &report.outcomes {
            match &outcome.status {
                FileStatus::Imported { document } => eprintln!(
                    "  {} {}  →  {} {}",
                    green("✓"),
                    outcome.label,
                    bold(&document.file_name),
                    dim(&format!("v{} {}", document.version, document.id)),
                ),
                FileStatus::Skipped => eprintln!(
                    "  {} {}  {}",
                    dim("-"),
                    outcome.label,
                    dim("not an e-invoice")
                ),
                FileStatus::Failed { error } => {
                    eprintln!("  {} {}  {}", red("✗"), outcome.label, red(error))
                }
            }
        }
    }

    let (imported, skipped, failed) = (report.imported(), report.skipped(), report.failed());
    let mark = if failed == 0 { green("✔") } else { cyan("⚠") };
    eprintln!(
        "{} {} imported  {}  {}",
        mark,
        bold(&imported.to_string()),
        dim(&format!("{skipped} skipped")),
        if failed == 0 {
            dim("0 failed")
        } else {
            red(&format!("{failed} failed"))
        },
    );
}
