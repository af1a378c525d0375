//! Job runner: one attempt at a job, plus what happens when it ends.
//!
//! ## Attempt order
//!
//! ```text
//! inputs present? → execute → sync + verify every output → sizes
//!        │               │              │
//!        └── Validation  └── tool error └── Integrity
//! ```
//!
//! Scratch files allocated during the attempt are released whatever the
//! outcome. Inputs are *not* released by an attempt: a retry needs them.
//! They are released exactly once, by [`JobRunner::complete`] or
//! [`JobRunner::fail`].
//!
//! The retry loop itself belongs to the task queue; [`RetryPolicy`] only
//! decides.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job::{FileReference, Job, JobPayload, JobStatus, OutputDescriptor, PairFallback, Params};
use crate::operations::{ExecContext, Operation, OperationRegistry};
use crate::staging::FileStaging;
use crate::tools::Toolchain;
use crate::verify::{sync_file, IntegrityVerifier};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ── Retry policy ─────────────────────────────────────────────────────────

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`, keeping the inputs.
    Retry { delay: Duration },
    /// Stop; `error` is the terminal message to report.
    GiveUp { error: String },
}

/// Fixed-delay, bounded retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay())
    }

    /// Decide after an attempt that failed with `err`, given the retries
    /// already performed.
    pub fn decide(&self, retry_count: u32, err: &PipelineError) -> RetryDecision {
        if !err.is_retryable() {
            return RetryDecision::GiveUp {
                error: err.to_string(),
            };
        }
        if retry_count < self.max_retries {
            return RetryDecision::Retry { delay: self.delay };
        }
        RetryDecision::GiveUp {
            error: PipelineError::ExhaustedRetries {
                attempts: retry_count + 1,
                last_error: err.to_string(),
            }
            .to_string(),
        }
    }
}

// ── Runner ───────────────────────────────────────────────────────────────

/// Validates, executes, verifies and cleans up jobs.
pub struct JobRunner {
    registry: Arc<OperationRegistry>,
    staging: FileStaging,
    tools: Toolchain,
    verifier: IntegrityVerifier,
    fanout_workers: usize,
    download_prefix: String,
}

impl JobRunner {
    pub fn new(
        registry: Arc<OperationRegistry>,
        staging: FileStaging,
        tools: Toolchain,
        verifier: IntegrityVerifier,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            registry,
            staging,
            tools,
            verifier,
            fanout_workers: config.fanout_workers,
            download_prefix: config.download_prefix.clone(),
        }
    }

    /// Runner with the standard registry, the process-backed tools and the
    /// pdfium verifier. Creates the staging areas.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let staging = FileStaging::ensure(&config.temp_dir, &config.processed_dir)?;
        Ok(Self::new(
            Arc::new(OperationRegistry::from_config(config)),
            staging,
            Toolchain::from_paths(&config.tools),
            IntegrityVerifier::pdfium(config.tools.pdfium_library.clone()),
            config,
        ))
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn staging(&self) -> &FileStaging {
        &self.staging
    }

    /// Resolve and validate a submission. Returns the canonical operation
    /// and the parameters with defaults filled in.
    pub fn prepare(
        &self,
        operation: &str,
        inputs: &[FileReference],
        mut params: Params,
    ) -> Result<(Arc<dyn Operation>, Params), PipelineError> {
        let op = self.registry.lookup(operation)?;
        self.registry.validate(op.as_ref(), inputs, &mut params)?;
        Ok((op, params))
    }

    /// Run one attempt of `job`. On success every returned output exists,
    /// is non-empty, passed verification and carries its final size.
    pub async fn attempt(&self, job: &Job) -> Result<Vec<FileReference>, PipelineError> {
        let op = self.registry.lookup(&job.operation)?;

        for input in &job.inputs {
            if tokio::fs::metadata(&input.path).await.is_err() {
                return Err(PipelineError::InputMissing {
                    path: input.path.clone(),
                });
            }
        }

        let planned = op
            .descriptor()
            .planned_outputs(&self.staging, &job.id, &job.inputs, &job.params);
        let ctx = ExecContext::new(
            job.id.clone(),
            self.staging.clone(),
            self.tools.clone(),
            self.verifier.clone(),
            self.fanout_workers,
            planned,
        );

        let executed = op.execute(&ctx, &job.inputs, &job.params).await;
        self.staging.release_all(&ctx.take_scratch()).await;
        let mut outputs = executed?;

        for output in &mut outputs {
            sync_file(&output.path)
                .await
                .map_err(|e| PipelineError::Integrity {
                    path: output.path.clone(),
                    reason: format!("cannot sync: {e}"),
                })?;
            self.verifier
                .check(&output.path)
                .await
                .map_err(|reason| PipelineError::Integrity {
                    path: output.path.clone(),
                    reason,
                })?;
            output.refresh_size()?;
            debug!("Verified output {} ({} bytes)", output.file_name(), output.size);
        }
        Ok(outputs)
    }

    /// Record success: release owned inputs, report the outputs.
    pub async fn complete(&self, job: &mut Job, outputs: &[FileReference]) -> Result<(), PipelineError> {
        self.staging.release_all(job.owned_inputs()).await;
        let files = outputs
            .iter()
            .map(|f| OutputDescriptor::from_reference(f, &self.download_prefix))
            .collect();
        job.finish(JobStatus::Succeeded, JobPayload::Files { files })?;
        info!("Job {} ({}) succeeded", job.id, job.operation);
        Ok(())
    }

    /// Record terminal failure: release owned inputs and anything the job
    /// may have produced, then build the failure payload.
    pub async fn fail(&self, job: &mut Job, message: &str) -> Result<(), PipelineError> {
        self.staging.release_all(job.owned_inputs()).await;

        let pair_fallback = match self.registry.lookup(&job.operation) {
            Ok(op) => {
                let d = op.descriptor();
                let planned = d.planned_outputs(&self.staging, &job.id, &job.inputs, &job.params);
                self.staging.release_all(&planned).await;
                d.pair_fallback
            }
            Err(e) => {
                warn!("Job {}: cannot resolve outputs for cleanup: {}", job.id, e);
                false
            }
        };

        let payload = if pair_fallback {
            JobPayload::Pair(PairFallback::new(message))
        } else {
            JobPayload::Error {
                error: message.to_string(),
            }
        };
        job.finish(JobStatus::Failed, payload)?;
        error!("Job {} ({}) failed: {}", job.id, job.operation, message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(5))
    }

    #[test]
    fn retryable_errors_retry_until_cap() {
        let err = PipelineError::tool("gs", "crashed");
        for count in 0..3 {
            assert_eq!(
                policy().decide(count, &err),
                RetryDecision::Retry {
                    delay: Duration::from_secs(5)
                }
            );
        }
        match policy().decide(3, &err) {
            RetryDecision::GiveUp { error } => {
                assert!(error.contains("after 4 attempts"), "got: {error}");
                assert!(error.contains("crashed"));
            }
            other => panic!("expected GiveUp, got {other:?}"),
        }
    }

    #[test]
    fn validation_errors_never_retry() {
        let err = PipelineError::validation("resize_image", "no size");
        match policy().decide(0, &err) {
            RetryDecision::GiveUp { error } => assert!(error.contains("no size")),
            other => panic!("expected GiveUp, got {other:?}"),
        }
    }

    #[test]
    fn zero_retries_gives_up_immediately() {
        let p = RetryPolicy::new(0, Duration::ZERO);
        let err = PipelineError::Integrity {
            path: "x.pdf".into(),
            reason: "bad header".into(),
        };
        assert!(matches!(p.decide(0, &err), RetryDecision::GiveUp { .. }));
    }
}
