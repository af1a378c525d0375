//! CLI binary for docpipe.
//!
//! A thin shim over the library crate: maps CLI flags to `PipelineConfig`,
//! stages the given files, submits one job and prints its outcome.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docpipe::{
    narrate, JobProgressCallback, JobStatus, Params, PipelineConfig, ProgressCallback,
    ProgressEvent, ResultPoll, TaskQueue, ToolPaths,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that follows one job through its attempts.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Queued");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_submitted(&self, job_id: &str, operation: &str) {
        self.bar.set_prefix(operation.to_string());
        self.bar.set_message(dim(job_id));
    }

    fn on_attempt_start(&self, _job_id: &str, attempt: u32) {
        self.bar.set_message(format!("attempt {attempt}"));
    }

    fn on_attempt_failed(&self, _job_id: &str, attempt: u32, error: &str, will_retry: bool) {
        let msg = if error.len() > 100 {
            let cut = error
                .char_indices()
                .nth(99)
                .map(|(i, _)| i)
                .unwrap_or(error.len());
            format!("{}\u{2026}", &error[..cut])
        } else {
            error.to_string()
        };
        let next = if will_retry { "retrying" } else { "giving up" };
        self.bar.println(format!(
            "  {} attempt {}  {}  {}",
            red("✗"),
            attempt,
            red(&msg),
            dim(next)
        ));
    }

    fn on_job_complete(&self, _job_id: &str, status: JobStatus) {
        self.bar.finish_and_clear();
        match status {
            JobStatus::Succeeded => eprintln!("{} {}", green("✔"), bold("done")),
            _ => eprintln!("{} {}", red("✘"), bold("failed")),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # List every operation and the inputs it accepts
  docpipe operations

  # Images to one PDF
  docpipe run images_to_pdf a.jpg b.png c.jpg

  # Images to PDF, compressed under 500 KB
  docpipe run convert_and_compress_to_pdf scan1.jpg scan2.jpg -p size=500kb

  # Compress an existing PDF
  docpipe run compress_to_size report.pdf -p size=2MB

  # Office conversions
  docpipe run word_to_pdf letter.docx
  docpipe run pdf_to_excel table.pdf

  # Resize by dimensions or aspect ratio, re-encode
  docpipe run resize_image photo.jpg -p resolution=800x600
  docpipe run resize_image photo.jpg -p aspect=16:9
  docpipe run convert_image_format photo.png -p format=JPEG

  # Two conversions side by side
  docpipe run parallel_pair_operation a.docx b.jpg \
      -p first_op=convert_to_pdf -p second_op=resize -p resolution=640x480

  # Status payload as JSON
  docpipe --json run images_to_pdf a.jpg

ENVIRONMENT VARIABLES:
  DOCPIPE_MEDIA_ROOT      Root of the temp/ and processed/ staging areas
  DOCPIPE_WORKERS         Queue worker count
  DOCPIPE_MAX_RETRIES     Retries after the first attempt
  DOCPIPE_WKHTMLTOPDF     wkhtmltopdf binary
  DOCPIPE_GHOSTSCRIPT     Ghostscript binary
  DOCPIPE_SOFFICE         LibreOffice binary
  PDFIUM_LIB_PATH         libpdfium used to verify PDF outputs
  RUST_LOG                Overrides the log filter
"#;

/// Run document and image conversion jobs.
#[derive(Parser, Debug)]
#[command(
    name = "docpipe",
    version,
    about = "Run document and image conversion jobs",
    long_about = "Stage files, run one conversion job through the retrying task queue, \
and report the verified outputs. External work is done by wkhtmltopdf, Ghostscript and \
LibreOffice; PDF outputs are checked with pdfium.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root of the temp/ and processed/ staging areas.
    #[arg(long, global = true, env = "DOCPIPE_MEDIA_ROOT", default_value = "./media")]
    media_root: PathBuf,

    /// Queue worker count (defaults to available parallelism).
    #[arg(long, global = true, env = "DOCPIPE_WORKERS")]
    workers: Option<usize>,

    /// Concurrent sub-tasks per fanned-out job.
    #[arg(long, global = true, env = "DOCPIPE_FANOUT_WORKERS")]
    fanout_workers: Option<usize>,

    /// Retries after the first failed attempt.
    #[arg(long, global = true, env = "DOCPIPE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Delay between attempts, in milliseconds.
    #[arg(long, global = true, env = "DOCPIPE_RETRY_DELAY_MS", default_value_t = 5000)]
    retry_delay_ms: u64,

    /// How long to wait for the job, in seconds.
    #[arg(long, global = true, env = "DOCPIPE_RESULT_TIMEOUT", default_value_t = 300)]
    result_timeout: u64,

    /// Default target for size-driven operations (e.g. 1MB, 500kb).
    #[arg(long, global = true, env = "DOCPIPE_TARGET_SIZE", default_value = "1MB")]
    target_size: String,

    /// wkhtmltopdf binary.
    #[arg(long, global = true, env = "DOCPIPE_WKHTMLTOPDF", default_value = "wkhtmltopdf")]
    wkhtmltopdf: PathBuf,

    /// Ghostscript binary.
    #[arg(long, global = true, env = "DOCPIPE_GHOSTSCRIPT", default_value = "gs")]
    ghostscript: PathBuf,

    /// LibreOffice binary.
    #[arg(long, global = true, env = "DOCPIPE_SOFFICE", default_value = "soffice")]
    soffice: PathBuf,

    /// libpdfium file or directory (system library when unset).
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium: Option<PathBuf>,

    /// Print the status payload as JSON instead of narrating.
    #[arg(long, global = true, env = "DOCPIPE_JSON")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, global = true, env = "DOCPIPE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCPIPE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCPIPE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered operations.
    Operations,

    /// Run one operation on the given files.
    Run {
        /// Operation name (legacy aliases accepted).
        operation: String,

        /// Input files. They are copied into the staging area first.
        files: Vec<PathBuf>,

        /// Operation parameter, repeatable (e.g. -p size=500kb).
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback that matters; keep INFO logs out of
    // its way unless asked for.
    let running = matches!(cli.command, Command::Run { .. });
    let show_progress = running && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn JobProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    match cli.command {
        Command::Operations => {
            list_operations(&config, cli.json)?;
            Ok(())
        }
        Command::Run {
            ref operation,
            ref files,
            ref params,
        } => run(&cli, &config, operation, files, params).await,
    }
}

fn list_operations(config: &PipelineConfig, json: bool) -> Result<()> {
    let registry = docpipe::OperationRegistry::from_config(config);
    if json {
        let rows: Vec<_> = registry
            .descriptors()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "summary": d.summary,
                    "inputs": d.arity(),
                    "accepts": d.accepted_extensions,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("Failed to serialise operations")?
        );
        return Ok(());
    }
    for d in registry.descriptors() {
        println!(
            "{:<28} {:<6} {:<24} {}",
            bold(d.name),
            d.arity(),
            d.accepted_extensions.join(","),
            dim(d.summary)
        );
    }
    Ok(())
}

async fn run(
    cli: &Cli,
    config: &PipelineConfig,
    operation: &str,
    files: &[PathBuf],
    params: &[(String, String)],
) -> Result<()> {
    let queue = TaskQueue::from_config(config).context("Failed to start task queue")?;

    let inputs = match queue.runner().staging().stage_inputs(files).await {
        Ok(inputs) => inputs,
        Err(e) => {
            queue.shutdown().await;
            return Err(e).context("Failed to stage input files");
        }
    };
    let params: Params = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let id = queue
        .submit(operation, inputs, params)
        .await
        .with_context(|| format!("Submission of '{operation}' rejected"))?;

    let outcome = if cli.json {
        print_json(&queue, &id).await
    } else {
        print_narration(&queue, &id, cli.quiet).await
    };
    queue.shutdown().await;
    outcome
}

async fn print_json(queue: &TaskQueue, id: &docpipe::JobId) -> Result<()> {
    let poll = queue.wait(id).await.context("Lost track of the job")?;
    let value = match poll {
        ResultPoll::Ready(job) => serde_json::json!({
            "id": job.id,
            "status": job.status.to_string(),
            "retries": job.retry_count,
            "result": job.result,
        }),
        ResultPoll::Pending(status) | ResultPoll::TimedOut(status) => serde_json::json!({
            "id": id,
            "status": status.to_string(),
            "result": null,
        }),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&value).context("Failed to serialise result")?
    );
    Ok(())
}

async fn print_narration(queue: &TaskQueue, id: &docpipe::JobId, quiet: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut events = narrate(queue, id);
    while let Some(event) = events.next().await {
        match event {
            ProgressEvent::Chunk { chunk } => {
                if !quiet {
                    let mut handle = stdout.lock();
                    write!(handle, "{chunk} ").context("Failed to write to stdout")?;
                    handle.flush().ok();
                }
            }
            ProgressEvent::Done { full_text, .. } => {
                if quiet {
                    println!("{full_text}");
                } else {
                    println!();
                }
            }
            ProgressEvent::Error { error } => anyhow::bail!("{error}"),
        }
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .media_root(&cli.media_root)
        .max_retries(cli.max_retries)
        .retry_delay_ms(cli.retry_delay_ms)
        .result_timeout_secs(cli.result_timeout)
        .default_target_size(cli.target_size.clone())
        .tools(ToolPaths {
            wkhtmltopdf: cli.wkhtmltopdf.clone(),
            ghostscript: cli.ghostscript.clone(),
            soffice: cli.soffice.clone(),
            pdfium_library: cli.pdfium.clone(),
        });

    if let Some(n) = cli.workers {
        builder = builder.workers(n);
    }
    if let Some(n) = cli.fanout_workers {
        builder = builder.fanout_workers(n);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse one `-p key=value`.
fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{s}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
