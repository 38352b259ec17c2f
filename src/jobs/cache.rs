use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use super::snapshot::JobRecord;
use super::{Job, JobStatus};

const TRIM_THRESHOLD: f64 = 0.80;
const TRIM_MARGIN: f64 = 0.10;

struct Entry {
    job: Arc<Job>,
    /// Bytes this entry was last charged for; settled again at terminal
    /// cleanup so the counter stays exact against log growth.
    charged: u64,
}

struct Inner {
    jobs: HashMap<Uuid, Entry>,
    current_size: u64,
}

/// Size-aware store of every job the server has recorded.
///
/// One mutex guards the map and the size counter together. Eviction runs
/// opportunistically on insert and only ever removes terminal jobs,
/// oldest-updated first.
pub struct JobsCache {
    max_size: u64,
    inner: Mutex<Inner>,
}

impl JobsCache {
    pub fn new(max_size: u64) -> Self {
        Self {
            max_size,
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                current_size: 0,
            }),
        }
    }

    pub async fn add(&self, job: Arc<Job>) {
        let mut inner = self.inner.lock().await;
        let charged = job.size_in_cache();
        inner.current_size += charged;
        inner.jobs.insert(job.id(), Entry { job, charged });
        self.trim(&mut inner);
    }

    pub async fn get(&self, job_id: Uuid) -> Option<Arc<Job>> {
        self.inner
            .lock()
            .await
            .jobs
            .get(&job_id)
            .map(|entry| Arc::clone(&entry.job))
    }

    /// Drop an entry. Used by eviction and by submit-failure rollback.
    pub async fn remove(&self, job_id: Uuid) -> Option<Arc<Job>> {
        let mut inner = self.inner.lock().await;
        let entry = inner.jobs.remove(&job_id)?;
        inner.current_size = inner.current_size.saturating_sub(entry.charged);
        Some(entry.job)
    }

    /// Re-charge an entry with its current size; called at terminal
    /// cleanup to persist the final size delta.
    pub async fn refresh_size(&self, job_id: Uuid) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.jobs.get_mut(&job_id) else {
            return;
        };
        let fresh = entry.job.size_in_cache();
        let old = entry.charged;
        entry.charged = fresh;
        inner.current_size = inner.current_size.saturating_sub(old) + fresh;
        self.trim(&mut inner);
    }

    /// Job summaries, most recently updated first.
    pub async fn list(&self) -> Vec<JobStatus> {
        let inner = self.inner.lock().await;
        let mut summaries: Vec<JobStatus> = inner
            .jobs
            .values()
            .map(|entry| entry.job.status_summary())
            .collect();
        summaries.sort_by(|a, b| b.updated.cmp(&a.updated));
        summaries
    }

    pub async fn current_size(&self) -> u64 {
        self.inner.lock().await.current_size
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.jobs.is_empty()
    }

    /// Snapshot records for every terminal job; in-flight jobs are not
    /// snapshotted.
    pub async fn terminal_records(&self) -> Vec<JobRecord> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .values()
            .filter(|entry| entry.job.current_status().is_terminal())
            .map(|entry| entry.job.record())
            .collect()
    }

    /// Insert restored jobs at boot, bypassing nothing: the same charge
    /// and trim rules apply.
    pub async fn restore(&self, jobs: Vec<Arc<Job>>) {
        for job in jobs {
            self.add(job).await;
        }
    }

    fn trim(&self, inner: &mut Inner) {
        let threshold = (self.max_size as f64 * TRIM_THRESHOLD) as u64;
        if inner.current_size <= threshold {
            return;
        }

        let mut evictable: Vec<(Uuid, chrono::DateTime<chrono::Utc>)> = inner
            .jobs
            .values()
            .filter(|entry| entry.job.current_status().is_terminal())
            .map(|entry| (entry.job.id(), entry.job.last_update()))
            .collect();
        evictable.sort_by(|a, b| a.1.cmp(&b.1));

        let target = (self.max_size as f64 * (TRIM_THRESHOLD - TRIM_MARGIN)) as u64;
        for (job_id, _) in evictable {
            if inner.current_size <= target {
                break;
            }
            if let Some(entry) = inner.jobs.remove(&job_id) {
                inner.current_size = inner.current_size.saturating_sub(entry.charged);
                tracing::info!("Evicted job {} from the cache", job_id);
            }
        }

        if inner.current_size > self.max_size {
            tracing::warn!(
                "Jobs cache exceeds its budget ({} of {} bytes) with no evictable entries",
                inner.current_size,
                self.max_size
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testutil::{Harness, ScriptedBackend};
    use crate::jobs::{ExecutionMode, Status};

    async fn job_with_payload(harness: &Harness, payload: usize) -> Arc<Job> {
        let job = harness
            .job(Arc::new(ScriptedBackend::default()), ExecutionMode::Async)
            .await;
        job.message("y".repeat(payload));
        job
    }

    #[tokio::test]
    async fn test_add_get_remove_size_accounting() {
        let harness = Harness::new().await;
        let cache = JobsCache::new(1 << 20);

        let job = harness
            .job(Arc::new(ScriptedBackend::default()), ExecutionMode::Async)
            .await;
        let expected = job.size_in_cache();
        cache.add(Arc::clone(&job)).await;

        assert_eq!(cache.current_size().await, expected);
        assert!(cache.get(job.id()).await.is_some());

        cache.remove(job.id()).await;
        assert_eq!(cache.current_size().await, 0);
        assert!(cache.get(job.id()).await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_size_settles_log_growth() {
        let harness = Harness::new().await;
        let cache = JobsCache::new(1 << 20);

        let job = harness
            .job(Arc::new(ScriptedBackend::default()), ExecutionMode::Async)
            .await;
        cache.add(Arc::clone(&job)).await;
        let before = cache.current_size().await;

        job.message("z".repeat(4096));
        cache.refresh_size(job.id()).await;
        assert!(cache.current_size().await >= before + 4096);
    }

    #[tokio::test]
    async fn test_eviction_under_pressure_preserves_non_terminal() {
        let harness = Harness::new().await;
        // budget sized so ~20 finished jobs overflow it
        let cache = JobsCache::new(24 * 1024);

        let running = job_with_payload(&harness, 700).await;
        running.new_status(Status::Running);
        cache.add(Arc::clone(&running)).await;

        let mut finished = Vec::new();
        for _ in 0..20 {
            let job = job_with_payload(&harness, 700).await;
            job.new_status(Status::Successful);
            cache.add(Arc::clone(&job)).await;
            finished.push(job);
        }

        // the running job survives any amount of pressure
        assert!(cache.get(running.id()).await.is_some());

        // oldest completed jobs were evicted first
        assert!(cache.get(finished[0].id()).await.is_none());
        assert!(cache.get(finished.last().unwrap().id()).await.is_some());

        // post-trim size is inside threshold minus margin
        let limit = (24.0 * 1024.0 * (TRIM_THRESHOLD - TRIM_MARGIN)) as u64;
        assert!(cache.current_size().await <= limit);
    }

    #[tokio::test]
    async fn test_no_eviction_below_threshold() {
        let harness = Harness::new().await;
        let cache = JobsCache::new(1 << 20);

        for _ in 0..5 {
            let job = job_with_payload(&harness, 100).await;
            job.new_status(Status::Successful);
            cache.add(job).await;
        }
        assert_eq!(cache.len().await, 5);
    }

    #[tokio::test]
    async fn test_overfull_cache_with_no_evictable_entries_warns_and_keeps() {
        let harness = Harness::new().await;
        let cache = JobsCache::new(1024);

        for _ in 0..4 {
            let job = job_with_payload(&harness, 700).await;
            job.new_status(Status::Running);
            cache.add(job).await;
        }
        // nothing evictable: all four stay despite blowing the budget
        assert_eq!(cache.len().await, 4);
        assert!(cache.current_size().await > 1024);
    }

    #[tokio::test]
    async fn test_list_sorted_most_recent_first() {
        let harness = Harness::new().await;
        let cache = JobsCache::new(1 << 20);

        let older = job_with_payload(&harness, 10).await;
        cache.add(Arc::clone(&older)).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = job_with_payload(&harness, 10).await;
        newer.new_status(Status::Running);
        cache.add(Arc::clone(&newer)).await;

        let list = cache.list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].job_id, newer.id());
        assert_eq!(list[1].job_id, older.id());
        assert!(list[0].updated >= list[1].updated);
    }

    #[tokio::test]
    async fn test_terminal_records_exclude_in_flight_jobs() {
        let harness = Harness::new().await;
        let cache = JobsCache::new(1 << 20);

        let live = job_with_payload(&harness, 10).await;
        live.new_status(Status::Running);
        cache.add(live).await;

        let done = job_with_payload(&harness, 10).await;
        done.new_status(Status::Failed);
        cache.add(Arc::clone(&done)).await;

        let records = cache.terminal_records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, done.id());
        assert_eq!(records[0].status, Status::Failed);
    }
}
