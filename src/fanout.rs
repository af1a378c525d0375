//! Bounded, all-or-nothing parallel fan-out inside a single job.
//!
//! Two shapes:
//!
//! * [`run_all`]: N homogeneous tasks (e.g. resize every image before
//!   assembly) with at most `max_workers` in flight.
//! * [`run_pair`]: exactly two unrelated tasks side by side.
//!
//! Results are keyed by submission index, never by completion order. If any
//! task fails, the whole batch fails; callers never see a partial result set.

use crate::error::PipelineError;
use futures::stream::{self, StreamExt};
use std::future::Future;
use tracing::debug;

/// Run every task with at most `max_workers` concurrently.
///
/// All tasks are driven to completion even when one fails, so no task is
/// left half-way through writing a file. The error returned is the one of
/// the lowest-indexed failing task.
pub async fn run_all<T, F, Fut>(tasks: Vec<F>, max_workers: usize) -> Result<Vec<T>, PipelineError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let total = tasks.len();
    let workers = max_workers.max(1);
    debug!("Fan-out: {} tasks on {} workers", total, workers);

    let mut finished: Vec<(usize, Result<T, PipelineError>)> =
        stream::iter(tasks.into_iter().enumerate().map(|(idx, task)| async move {
            (idx, task().await)
        }))
        .buffer_unordered(workers)
        .collect()
        .await;

    finished.sort_by_key(|(idx, _)| *idx);

    let mut results = Vec::with_capacity(total);
    for (_, result) in finished {
        results.push(result?);
    }
    Ok(results)
}

/// Run two tasks concurrently; both must succeed.
///
/// When both fail, the first task's error wins.
pub async fn run_pair<A, B, FA, FB>(first: FA, second: FB) -> Result<(A, B), PipelineError>
where
    FA: Future<Output = Result<A, PipelineError>>,
    FB: Future<Output = Result<B, PipelineError>>,
{
    let (a, b) = tokio::join!(first, second);
    Ok((a?, b?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn results_follow_submission_order() {
        // Earlier tasks sleep longer, so they complete last.
        let tasks: Vec<_> = (0..8u64)
            .map(|i| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis((8 - i) * 5)).await;
                    Ok::<_, PipelineError>(i * 10)
                }
            })
            .collect();
        let out = run_all(tasks, 4).await.unwrap();
        assert_eq!(out, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, PipelineError>(())
                }
            })
            .collect();
        run_all(tasks, 3).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn one_failure_fails_the_batch_after_all_finish() {
        let ran = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..5)
            .map(|i| {
                let ran = Arc::clone(&ran);
                move || async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    if i == 1 || i == 3 {
                        Err(PipelineError::tool("resize", format!("task {i}")))
                    } else {
                        Ok(i)
                    }
                }
            })
            .collect();
        let err = run_all(tasks, 2).await.unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 5);
        assert!(err.to_string().contains("task 1"), "got: {err}");
    }

    #[tokio::test]
    async fn empty_batch_is_ok() {
        let tasks: Vec<fn() -> std::future::Ready<Result<u8, PipelineError>>> = vec![];
        assert!(run_all(tasks, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pair_requires_both() {
        let ok = run_pair(async { Ok::<_, PipelineError>(1) }, async { Ok(2) }).await;
        assert_eq!(ok.unwrap(), (1, 2));

        let failed = run_pair(
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, PipelineError>(1)
            },
            async { Err::<u8, _>(PipelineError::tool("convert", "second side")) },
        )
        .await;
        assert!(failed.unwrap_err().to_string().contains("second side"));
    }
}
