//! Progress-callback trait for job lifecycle events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the queue accepts, attempts, retries and finishes jobs.
//!
//! Callers can forward events to a channel, a WebSocket, a database record,
//! or a terminal spinner; the library knows nothing about how the host
//! communicates.
//!
//! # Example
//!
//! ```rust
//! use docpipe::{JobProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     attempts: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_attempt_start(&self, job_id: &str, attempt: u32) {
//!         self.attempts.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("job {job_id}: attempt {attempt}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { attempts: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn JobProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::job::JobStatus;
use std::sync::Arc;

/// Called by the task queue as jobs move through their lifecycle.
///
/// Workers run concurrently, so every method may be called from several
/// threads at once. All methods default to no-ops.
pub trait JobProgressCallback: Send + Sync {
    /// A submission passed validation and was enqueued.
    fn on_job_submitted(&self, job_id: &str, operation: &str) {
        let _ = (job_id, operation);
    }

    /// A worker is about to run the job.
    ///
    /// # Arguments
    /// * `attempt`: 1-indexed attempt number
    fn on_attempt_start(&self, job_id: &str, attempt: u32) {
        let _ = (job_id, attempt);
    }

    /// An attempt failed.
    ///
    /// # Arguments
    /// * `will_retry`: whether another attempt has been scheduled
    fn on_attempt_failed(&self, job_id: &str, attempt: u32, error: &str, will_retry: bool) {
        let _ = (job_id, attempt, error, will_retry);
    }

    /// The job reached a terminal status.
    fn on_job_complete(&self, job_id: &str, status: JobStatus) {
        let _ = (job_id, status);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
