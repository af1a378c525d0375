//! Short-lived, in-memory job result cache.
//!
//! Entries are keyed by job id. An entry lives until `ttl` after the job
//! reaches a terminal status; in-flight jobs never expire. Each entry carries
//! a `watch` channel so waiters wake on status changes instead of polling.

use crate::job::{Job, JobId, JobStatus};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::debug;

struct Entry {
    job: Job,
    expires_at: Option<Instant>,
    status_tx: watch::Sender<JobStatus>,
}

/// Job id → latest job snapshot.
pub struct ResultCache {
    entries: RwLock<HashMap<JobId, Entry>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn expiry_for(&self, status: JobStatus) -> Option<Instant> {
        status.is_terminal().then(|| Instant::now() + self.ttl)
    }

    pub async fn insert(&self, job: Job) {
        let (status_tx, _) = watch::channel(job.status);
        let entry = Entry {
            expires_at: self.expiry_for(job.status),
            job,
            status_tx,
        };
        self.entries.write().await.insert(entry.job.id.clone(), entry);
    }

    /// Snapshot of a job, `None` if unknown or expired.
    pub async fn get(&self, id: &JobId) -> Option<Job> {
        let entries = self.entries.read().await;
        let entry = entries.get(id)?;
        if entry.expires_at.is_some_and(|t| Instant::now() >= t) {
            return None;
        }
        Some(entry.job.clone())
    }

    /// Replace the stored snapshot and notify waiters. Returns `false` if
    /// the job is no longer cached.
    pub async fn update(&self, job: &Job) -> bool {
        let mut entries = self.entries.write().await;
        let expires_at = self.expiry_for(job.status);
        match entries.get_mut(&job.id) {
            Some(entry) => {
                entry.job = job.clone();
                entry.expires_at = expires_at;
                entry.status_tx.send_replace(job.status);
                true
            }
            None => false,
        }
    }

    /// Status change notifications for `id`.
    pub async fn subscribe(&self, id: &JobId) -> Option<watch::Receiver<JobStatus>> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.status_tx.subscribe())
    }

    /// Snapshots of every job that has not reached a terminal status.
    pub async fn unfinished(&self) -> Vec<Job> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.job.status.is_terminal())
            .map(|e| e.job.clone())
            .collect()
    }

    /// Drop expired entries, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at.map_or(true, |t| now < t));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Purged {} expired job result(s)", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobPayload, Params};

    fn job() -> Job {
        Job::new("images_to_pdf", vec![], Params::default())
    }

    #[tokio::test(start_paused = true)]
    async fn pending_jobs_never_expire() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let j = job();
        cache.insert(j.clone()).await;
        tokio::time::advance(Duration::from_secs(3_600)).await;
        assert_eq!(cache.purge_expired().await, 0);
        assert!(cache.get(&j.id).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_results_expire_after_ttl() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let mut j = job();
        cache.insert(j.clone()).await;
        j.transition(JobStatus::Running).unwrap();
        j.finish(JobStatus::Succeeded, JobPayload::Files { files: vec![] })
            .unwrap();
        assert!(cache.update(&j).await);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get(&j.id).await.unwrap().status, JobStatus::Succeeded);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&j.id).await.is_none());
        assert_eq!(cache.purge_expired().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn subscribers_see_status_changes() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let mut j = job();
        cache.insert(j.clone()).await;
        let mut rx = cache.subscribe(&j.id).await.unwrap();
        assert_eq!(*rx.borrow(), JobStatus::Pending);

        j.transition(JobStatus::Running).unwrap();
        cache.update(&j).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), JobStatus::Running);
    }

    #[tokio::test]
    async fn unfinished_skips_terminal_jobs() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let waiting = job();
        let mut done = job();
        cache.insert(waiting.clone()).await;
        cache.insert(done.clone()).await;
        done.transition(JobStatus::Running).unwrap();
        done.finish(JobStatus::Failed, JobPayload::Error { error: "x".into() })
            .unwrap();
        cache.update(&done).await;

        let left = cache.unfinished().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, waiting.id);
    }

    #[tokio::test]
    async fn update_of_unknown_job_is_refused() {
        let cache = ResultCache::new(Duration::from_secs(1));
        assert!(!cache.update(&job()).await);
        assert!(cache.subscribe(&JobId::new()).await.is_none());
    }
}
