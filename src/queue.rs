//! In-process task queue: submission, worker pool, retry loop, polling.
//!
//! ```text
//! submit ─validate─► cache(Pending) ─► channel ─► worker ─► runner.attempt
//!                                         ▲                     │
//!                                         └── sleep(delay) ◄── retry?
//! ```
//!
//! Validation happens on the caller's task, so a bad submission never
//! becomes a job. Workers pull job ids from one shared channel; the job
//! itself (status, retry count, result) lives in the [`ResultCache`].
//! Retries are re-enqueued after a fixed delay rather than slept on, so a
//! waiting retry never occupies a worker.
//!
//! There is no durable store. Results are pollable for the cache TTL after
//! a job finishes.

use crate::cache::ResultCache;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job::{FileReference, Job, JobId, JobStatus, Params};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::runner::{JobRunner, RetryDecision, RetryPolicy};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of waiting for a job's result.
#[derive(Debug, Clone)]
pub enum ResultPoll {
    /// The job is terminal; its payload is in `job.result`.
    Ready(Job),
    /// Zero timeout given and the job has not finished.
    Pending(JobStatus),
    /// The caller stopped waiting. The job keeps running.
    TimedOut(JobStatus),
}

/// Pacing of narration streams built on this queue.
#[derive(Debug, Clone, Copy)]
pub struct Narration {
    pub pace: Duration,
    pub words_per_chunk: usize,
}

/// Counters since the queue started.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub rejected: u64,
    pub retried: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    retried: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

struct Inner {
    runner: Arc<JobRunner>,
    cache: ResultCache,
    policy: RetryPolicy,
    progress: ProgressCallback,
    sender: mpsc::UnboundedSender<JobId>,
    last_compressed: RwLock<Option<FileReference>>,
    shutdown_tx: watch::Sender<bool>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    counters: Counters,
    result_timeout: Duration,
    narration: Narration,
}

/// Handle to a running queue. Cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    /// Start the worker pool. Must be called inside a Tokio runtime.
    pub fn start(runner: Arc<JobRunner>, config: &PipelineConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            runner,
            cache: ResultCache::new(config.result_ttl()),
            policy: RetryPolicy::from_config(config),
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
            sender,
            last_compressed: RwLock::new(None),
            shutdown_tx,
            handles: std::sync::Mutex::new(Vec::new()),
            counters: Counters::default(),
            result_timeout: config.result_timeout(),
            narration: Narration {
                pace: config.stream_pace(),
                words_per_chunk: config.stream_words_per_chunk.max(1),
            },
        });

        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(config.workers + 1);
        for worker in 0..config.workers.max(1) {
            handles.push(tokio::spawn(worker_loop(
                worker,
                Arc::clone(&inner),
                Arc::clone(&receiver),
            )));
        }
        handles.push(tokio::spawn(purge_loop(Arc::clone(&inner))));
        info!("Task queue started with {} worker(s)", config.workers.max(1));

        *inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handles;
        Self { inner }
    }

    /// Build the standard runner from `config` and start a queue on it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let runner = JobRunner::from_config(config)?;
        Ok(Self::start(Arc::new(runner), config))
    }

    pub fn runner(&self) -> &JobRunner {
        &self.inner.runner
    }

    /// Validate and enqueue a job. Never blocks on execution.
    ///
    /// On any error no job is created and the submitted inputs are deleted.
    pub async fn submit(
        &self,
        operation: &str,
        inputs: Vec<FileReference>,
        params: Params,
    ) -> Result<JobId, PipelineError> {
        match self.try_submit(operation, inputs.clone(), params).await {
            Ok(id) => Ok(id),
            Err(e) => {
                self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                let owned = inputs.iter().filter(|f| f.role == crate::job::FileRole::Input);
                self.inner.runner.staging().release_all(owned).await;
                warn!("Rejected '{}' submission: {}", operation, e);
                Err(e)
            }
        }
    }

    async fn try_submit(
        &self,
        operation: &str,
        mut inputs: Vec<FileReference>,
        params: Params,
    ) -> Result<JobId, PipelineError> {
        if *self.inner.shutdown_tx.borrow() {
            return Err(PipelineError::QueueClosed);
        }

        let runner = &self.inner.runner;
        let canonical = runner.registry().canonical_name(operation);
        let wants_last = params.flag("use_last") || params.flag("use_last_compressed");
        if canonical == "compress_to_size" && wants_last && inputs.is_empty() {
            let last = self.inner.last_compressed.read().await.clone();
            match last {
                Some(file) => inputs.push(file),
                None => {
                    return Err(PipelineError::validation(
                        canonical,
                        "no previously compressed PDF to reuse",
                    ))
                }
            }
        }

        let (op, params) = runner.prepare(operation, &inputs, params)?;
        let job = Job::new(op.descriptor().name, inputs, params);
        let id = job.id.clone();
        self.inner.cache.insert(job).await;

        self.inner
            .sender
            .send(id.clone())
            .map_err(|_| PipelineError::QueueClosed)?;
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.progress.on_job_submitted(id.as_str(), op.descriptor().name);
        info!("Submitted job {} ({})", id, op.descriptor().name);
        Ok(id)
    }

    /// Current status of a job.
    pub async fn status(&self, id: &JobId) -> Result<JobStatus, PipelineError> {
        self.job(id)
            .await
            .map(|j| j.status)
            .ok_or_else(|| PipelineError::JobNotFound(id.to_string()))
    }

    /// Latest snapshot of a job, `None` if unknown or expired.
    pub async fn job(&self, id: &JobId) -> Option<Job> {
        self.inner.cache.get(id).await
    }

    /// Wait up to `timeout` for the job to finish. A zero timeout polls.
    ///
    /// Timing out only stops the wait; the job carries on.
    pub async fn result(&self, id: &JobId, timeout: Duration) -> Result<ResultPoll, PipelineError> {
        let not_found = || PipelineError::JobNotFound(id.to_string());
        let mut rx = self.inner.cache.subscribe(id).await.ok_or_else(not_found)?;

        let finished = if timeout.is_zero() {
            rx.borrow().is_terminal()
        } else {
            let wait = async {
                loop {
                    if rx.borrow_and_update().is_terminal() {
                        break;
                    }
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            };
            tokio::time::timeout(timeout, wait).await.is_ok()
        };

        let job = self.inner.cache.get(id).await.ok_or_else(not_found)?;
        Ok(match (finished || job.status.is_terminal(), timeout.is_zero()) {
            (true, _) => ResultPoll::Ready(job),
            (false, true) => ResultPoll::Pending(job.status),
            (false, false) => ResultPoll::TimedOut(job.status),
        })
    }

    /// [`result`](Self::result) with the configured timeout.
    pub async fn wait(&self, id: &JobId) -> Result<ResultPoll, PipelineError> {
        self.result(id, self.inner.result_timeout).await
    }

    pub fn result_timeout(&self) -> Duration {
        self.inner.result_timeout
    }

    pub fn narration(&self) -> Narration {
        self.inner.narration
    }

    /// The most recent compressed PDF produced by any job.
    pub async fn last_compressed(&self) -> Option<FileReference> {
        self.inner.last_compressed.read().await.clone()
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.inner.counters;
        QueueStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work and wait for workers to finish their current job.
    ///
    /// Jobs still queued or waiting on a retry delay are failed with
    /// [`SHUTDOWN_MESSAGE`], which releases their inputs.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let handles = std::mem::take(
            &mut *self
                .inner
                .handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        // Already stopped, or another caller is joining the workers.
        if handles.is_empty() {
            return;
        }
        for h in handles {
            if let Err(e) = h.await {
                error!("Queue task ended abnormally: {}", e);
            }
        }
        abandon_unfinished(&self.inner).await;
        info!("Task queue stopped");
    }
}

/// Terminal error given to jobs the queue stopped before they could finish.
pub const SHUTDOWN_MESSAGE: &str = "Task queue shut down before the job finished";

/// Fail every job left queued or between retries. Runs after the workers
/// have exited, so nothing else touches these jobs.
async fn abandon_unfinished(inner: &Inner) {
    for mut job in inner.cache.unfinished().await {
        warn!("Job {} ({}) abandoned at shutdown", job.id, job.operation);
        if let Err(e) = inner.runner.fail(&mut job, SHUTDOWN_MESSAGE).await {
            error!("Job {}: {}", job.id, e);
            continue;
        }
        inner.counters.failed.fetch_add(1, Ordering::Relaxed);
        inner.cache.update(&job).await;
        inner.progress.on_job_complete(job.id.as_str(), job.status);
    }
}

// ── Workers ──────────────────────────────────────────────────────────────

async fn worker_loop(
    worker: usize,
    inner: Arc<Inner>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<JobId>>>,
) {
    let mut shutdown = inner.shutdown_tx.subscribe();
    debug!("Worker {} started", worker);
    loop {
        if *shutdown.borrow() {
            break;
        }
        let next = tokio::select! {
            _ = shutdown.changed() => None,
            id = async { receiver.lock().await.recv().await } => id,
        };
        match next {
            Some(id) => process(&inner, id).await,
            None => break,
        }
    }
    debug!("Worker {} stopped", worker);
}

async fn process(inner: &Arc<Inner>, id: JobId) {
    let Some(mut job) = inner.cache.get(&id).await else {
        warn!("Job {} vanished before it could run", id);
        return;
    };
    if let Err(e) = job.transition(JobStatus::Running) {
        error!("{}", e);
        return;
    }
    inner.cache.update(&job).await;

    let attempt = job.retry_count + 1;
    inner.progress.on_attempt_start(id.as_str(), attempt);
    debug!("Job {} ({}): attempt {}", id, job.operation, attempt);

    match inner.runner.attempt(&job).await {
        Ok(outputs) => {
            if let Err(e) = inner.runner.complete(&mut job, &outputs).await {
                error!("Job {}: {}", id, e);
                return;
            }
            remember_compressed(inner, &job, &outputs).await;
            inner.counters.succeeded.fetch_add(1, Ordering::Relaxed);
            inner.cache.update(&job).await;
            inner.progress.on_job_complete(id.as_str(), job.status);
        }
        Err(err) => match inner.policy.decide(job.retry_count, &err) {
            RetryDecision::Retry { delay } => {
                warn!(
                    "Job {}: attempt {} failed, retry {}/{} in {:?}: {}",
                    id,
                    attempt,
                    job.retry_count + 1,
                    inner.policy.max_retries,
                    delay,
                    err
                );
                inner
                    .progress
                    .on_attempt_failed(id.as_str(), attempt, &err.to_string(), true);
                job.retry_count += 1;
                inner.cache.update(&job).await;
                inner.counters.retried.fetch_add(1, Ordering::Relaxed);
                schedule_retry(inner, id, delay);
            }
            RetryDecision::GiveUp { error: message } => {
                warn!("Job {}: attempt {} failed, giving up: {}", id, attempt, err);
                inner
                    .progress
                    .on_attempt_failed(id.as_str(), attempt, &err.to_string(), false);
                if let Err(e) = inner.runner.fail(&mut job, &message).await {
                    error!("Job {}: {}", id, e);
                    return;
                }
                inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                inner.cache.update(&job).await;
                inner.progress.on_job_complete(id.as_str(), job.status);
            }
        },
    }
}

fn schedule_retry(inner: &Arc<Inner>, id: JobId, delay: Duration) {
    let sender = inner.sender.clone();
    let mut shutdown = inner.shutdown_tx.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Queue shut down; retry of job {} cancelled", id);
            }
            _ = tokio::time::sleep(delay) => {
                if sender.send(id.clone()).is_err() {
                    warn!("Queue closed; retry of job {} dropped", id);
                }
            }
        }
    });
}

async fn remember_compressed(inner: &Inner, job: &Job, outputs: &[FileReference]) {
    let Ok(op) = inner.runner.registry().lookup(&job.operation) else {
        return;
    };
    if let Some(file) = op
        .descriptor()
        .compressed_output
        .and_then(|idx| outputs.get(idx))
    {
        debug!("Remembering {} as last compressed output", file.file_name());
        *inner.last_compressed.write().await = Some(file.clone());
    }
}

async fn purge_loop(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown_tx.subscribe();
    let mut tick = tokio::time::interval(PURGE_INTERVAL);
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tick.tick() => {
                inner.cache.purge_expired().await;
            }
        }
    }
}
