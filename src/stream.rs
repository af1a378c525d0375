//! Streaming narration of a job's outcome.
//!
//! Callers that want a "typing" feed instead of a single status payload can
//! turn a job id into a stream of [`ProgressEvent`]s:
//!
//! ```text
//! {"chunk":"word_to_pdf finished. 1 file is"}
//! {"chunk":"ready: word_to_pdf_….pdf (48211 bytes)."}
//! {"done":true,"full_text":"word_to_pdf finished. 1 file is ready: …"}
//! ```
//!
//! The stream first waits for the job to reach a terminal state (bounded by
//! the queue's result timeout), so it always yields exactly one terminal
//! event: `Done` or `Error`.

use crate::job::{Job, JobId, JobPayload, JobStatus};
use crate::queue::{ResultPoll, TaskQueue};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;
use tracing::debug;

/// One frame of a narration stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    Chunk { chunk: String },
    Done { done: bool, full_text: String },
    Error { error: String },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Chunk { .. })
    }

    pub fn to_json(&self) -> String {
        // Serialising plain strings and bools cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    /// Server-sent-events frame.
    pub fn to_sse(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }
}

/// A boxed stream of narration events.
pub type NarrationStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Narrate the outcome of `job_id`.
///
/// Failures, timeouts and unknown jobs yield a single `Error` event.
///
/// # Example
/// ```rust,no_run
/// use docpipe::{narrate, JobId, TaskQueue};
/// use futures::StreamExt;
///
/// # async fn demo(queue: TaskQueue, id: JobId) {
/// let mut events = narrate(&queue, &id);
/// while let Some(event) = events.next().await {
///     print!("{}", event.to_sse());
/// }
/// # }
/// ```
pub fn narrate(queue: &TaskQueue, job_id: &JobId) -> NarrationStream {
    let queue = queue.clone();
    let id = job_id.clone();
    let pacing = queue.narration();

    let outcome = stream::once(async move {
        match queue.wait(&id).await {
            Ok(ResultPoll::Ready(job)) => summarize(&job),
            Ok(ResultPoll::Pending(status)) | Ok(ResultPoll::TimedOut(status)) => Err(format!(
                "Timed out waiting for job {id} (still {status})"
            )),
            Err(e) => Err(e.to_string()),
        }
    });

    Box::pin(outcome.flat_map(move |summary| -> NarrationStream {
        match summary {
            Ok(text) => Box::pin(typed(text, pacing.words_per_chunk, pacing.pace)),
            Err(error) => {
                debug!("Narration ends with error: {}", error);
                Box::pin(stream::iter([ProgressEvent::Error { error }]))
            }
        }
    }))
}

/// Emit `text` in chunks of `words` words, `pace` apart, then `Done`.
fn typed(text: String, words: usize, pace: Duration) -> impl Stream<Item = ProgressEvent> + Send {
    let chunks = chunk_words(&text, words);
    stream::iter(chunks.into_iter().enumerate())
        .then(move |(i, chunk)| async move {
            if i > 0 && !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }
            ProgressEvent::Chunk { chunk }
        })
        .chain(stream::once(async move {
            ProgressEvent::Done {
                done: true,
                full_text: text,
            }
        }))
}

fn chunk_words(text: &str, words: usize) -> Vec<String> {
    let all: Vec<&str> = text.split_whitespace().collect();
    all.chunks(words.max(1)).map(|c| c.join(" ")).collect()
}

/// Plain-language summary of a terminal job, or its error message.
fn summarize(job: &Job) -> Result<String, String> {
    match (&job.status, &job.result) {
        (JobStatus::Succeeded, Some(JobPayload::Files { files })) => {
            let listed: Vec<String> = files
                .iter()
                .map(|f| format!("{} ({} bytes)", f.name, f.size))
                .collect();
            let retries = match job.retry_count {
                0 => String::new(),
                1 => String::from(" after 1 retry"),
                n => format!(" after {n} retries"),
            };
            Ok(match files.len() {
                0 => format!("{} finished{} with no output.", job.operation, retries),
                1 => format!(
                    "{} finished{}. 1 file is ready: {}.",
                    job.operation, retries, listed[0]
                ),
                n => format!(
                    "{} finished{}. {} files are ready: {}.",
                    job.operation,
                    retries,
                    n,
                    listed.join(", ")
                ),
            })
        }
        (_, Some(payload)) => Err(payload
            .error_message()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} ended with status {}", job.operation, job.status))),
        (status, None) => Err(format!("{} ended with status {} and no result", job.operation, status)),
    }
}
