//! # docpipe
//!
//! An asynchronous job pipeline for document and image conversions: images
//! to PDF, size-targeted PDF compression, office-format conversions, image
//! resizing and re-encoding, and a two-way "pair" operation that runs two
//! conversions side by side.
//!
//! ## Pipeline Overview
//!
//! ```text
//! caller
//!  │
//!  ├─ 1. Stage     copy uploads into the temp area (FileStaging)
//!  ├─ 2. Submit    validate against the operation registry, enqueue
//!  ├─ 3. Execute   worker runs the operation (fan-out, external tools)
//!  ├─ 4. Verify    fsync + integrity check of every output
//!  ├─ 5. Retry     retryable failures re-enqueued after a fixed delay
//!  ├─ 6. Clean up  inputs deleted exactly once, on success or final failure
//!  └─ 7. Result    {name, url, size, mediaType} descriptors, or {error}
//! ```
//!
//! External work goes through three capability traits, [`Renderer`]
//! (HTML → PDF), [`Compressor`] (quality-factor PDF re-encode) and
//! [`DocumentConverter`] (office formats). The default [`Toolchain`] backs
//! them with `wkhtmltopdf`, Ghostscript and LibreOffice.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docpipe::{Params, PipelineConfig, ResultPoll, TaskQueue};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder().media_root("./media").build()?;
//!     let queue = TaskQueue::from_config(&config)?;
//!
//!     let staged = queue.runner().staging().stage_input(Path::new("scan.pdf")).await?;
//!     let params: Params = [("size", "500kb")].into_iter().collect();
//!     let id = queue.submit("compress_to_size", vec![staged], params).await?;
//!
//!     if let ResultPoll::Ready(job) = queue.wait(&id).await? {
//!         println!("{}", serde_json::to_string_pretty(&job.result)?);
//!     }
//!     queue.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docpipe` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docpipe = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod compress;
pub mod config;
pub mod error;
pub mod fanout;
pub mod imaging;
pub mod job;
pub mod operations;
pub mod params;
pub mod progress;
pub mod queue;
pub mod runner;
pub mod staging;
pub mod stream;
pub mod tools;
pub mod verify;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use compress::{compress_to_size, CompressionAttempt, CompressionReport, QualityFactor};
pub use config::{PipelineConfig, PipelineConfigBuilder, ToolPaths};
pub use error::{ErrorKind, PipelineError};
pub use job::{
    FileReference, FileRole, Job, JobId, JobPayload, JobStatus, OutputDescriptor, PairFallback,
    Params,
};
pub use operations::{Descriptor, ExecContext, Operation, OperationDefaults, OperationRegistry};
pub use params::{ResizeSpec, TargetImageFormat};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use queue::{Narration, QueueStats, ResultPoll, TaskQueue};
pub use runner::{JobRunner, RetryDecision, RetryPolicy};
pub use staging::FileStaging;
pub use stream::{narrate, NarrationStream, ProgressEvent};
pub use tools::{Compressor, DocumentConverter, DocumentFormat, Renderer, Toolchain};
pub use verify::{IntegrityVerifier, PdfParser, PdfiumParser};
