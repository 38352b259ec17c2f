use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::Error;

use super::{Job, Status};

/// The set of jobs currently accepted or running.
///
/// Holds non-owning references; the cache owns every job. The orchestrator
/// adds at admission, together with the cache insert, so membership covers
/// the whole accepted window; the runner task removes at terminal cleanup.
pub struct ActiveJobs {
    jobs: Mutex<HashMap<Uuid, Weak<Job>>>,
}

impl Default for ActiveJobs {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn add(&self, job: &Arc<Job>) {
        self.jobs.lock().await.insert(job.id(), Arc::downgrade(job));
    }

    pub async fn remove(&self, job_id: Uuid) {
        self.jobs.lock().await.remove(&job_id);
    }

    pub async fn contains(&self, job_id: Uuid) -> bool {
        self.jobs.lock().await.contains_key(&job_id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Kill every job still accepted or running.
    ///
    /// The lock is held across the whole scan; `Job::kill` must therefore
    /// never re-enter this registry. Best effort: the first kill error is
    /// returned and the remaining jobs are not attempted.
    pub async fn kill_all(&self) -> Result<(), Error> {
        let guard = self.jobs.lock().await;
        let snapshot: Vec<Arc<Job>> = guard.values().filter_map(Weak::upgrade).collect();

        for job in snapshot {
            if matches!(job.current_status(), Status::Accepted | Status::Running) {
                job.kill().await?;
            }
        }
        Ok(())
    }
}
