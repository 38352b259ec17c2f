//! The job orchestration core: the per-submission `Job` value, its
//! lifecycle state machine, and the monitor loop that drives async jobs.

pub mod active;
pub mod cache;
pub mod snapshot;

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backends::{Backend, InertBackend, JobTimes, ProviderStatus, Resources};
pub use crate::backends::ExecutionMode;
use crate::config::Config;
use crate::errors::Error;
use crate::processes::Process;
use crate::storage::{self, ObjectStore};

use active::ActiveJobs;
use cache::JobsCache;
use snapshot::JobRecord;

const METADATA_CONTEXT: &str =
    "https://raw.githubusercontent.com/process-api/schemas/main/context.jsonld";

/// OGC job status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Accepted,
    Running,
    Successful,
    Failed,
    Dismissed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Successful | Status::Failed | Status::Dismissed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Accepted => "accepted",
            Status::Running => "running",
            Status::Successful => "successful",
            Status::Failed => "failed",
            Status::Dismissed => "dismissed",
        };
        f.write_str(text)
    }
}

/// Status summary, the shape of OGC status responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(rename = "processID")]
    pub process_id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(rename = "jobID")]
    pub job_id: Uuid,
    pub updated: DateTime<Utc>,
    pub status: Status,
}

/// Both log sequences for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogs {
    #[serde(rename = "jobID")]
    pub job_id: Uuid,
    #[serde(rename = "processID")]
    pub process_id: String,
    pub container_log: Vec<String>,
    pub api_log: Vec<String>,
}

/// JSON-LD provenance record written to object storage on success.
#[derive(Debug, Serialize)]
struct Metadata {
    #[serde(rename = "@context")]
    context: &'static str,
    #[serde(rename = "jobID")]
    job_id: Uuid,
    process: ProcessRef,
    image: ImageRef,
    commands: Vec<String>,
    #[serde(rename = "generatedAtTime")]
    generated_at_time: Option<DateTime<Utc>>,
    #[serde(rename = "startedAtTime")]
    started_at_time: Option<DateTime<Utc>>,
    #[serde(rename = "endedAtTime")]
    ended_at_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ProcessRef {
    id: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct ImageRef {
    uri: String,
    digest: String,
}

/// Non-owning handles a job needs for terminal cleanup, passed at
/// construction.
///
/// The cache handle is weak: the cache owns every job, so an owning
/// back-edge would leak both sides.
#[derive(Clone)]
pub struct JobContext {
    pub cache: Weak<JobsCache>,
    pub registry: Arc<ActiveJobs>,
    pub store: Arc<dyn ObjectStore>,
    pub log_store: Arc<crate::storage::logs::FsLogStore>,
    pub config: Arc<Config>,
}

/// Mutable per-job state; every access is a short, synchronous critical
/// section.
struct JobState {
    status: Status,
    updated: DateTime<Utc>,
    provider_id: Option<String>,
    log_stream: Option<String>,
    api_log: Vec<String>,
    container_log: Vec<String>,
}

/// One execution of a process.
pub struct Job {
    id: Uuid,
    process_id: String,
    process_version: String,
    image: String,
    cmd: Vec<String>,
    env: HashMap<String, String>,
    resources: Resources,
    mode: ExecutionMode,
    backend: Arc<dyn Backend>,
    ctx: JobContext,
    state: Mutex<JobState>,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Job {
    pub fn new(
        id: Uuid,
        process: &Process,
        cmd: Vec<String>,
        mode: ExecutionMode,
        backend: Arc<dyn Backend>,
        ctx: JobContext,
    ) -> Arc<Self> {
        let resources = process
            .runtime
            .resources
            .map(|r| Resources {
                cpus: r.cpus,
                memory: r.memory,
            })
            .unwrap_or_default();

        let (done_tx, done_rx) = watch::channel(false);
        Arc::new(Self {
            id,
            process_id: process.info.id.clone(),
            process_version: process.info.version.clone(),
            image: process.image_ref(),
            cmd,
            env: process.runtime.env_vars.clone(),
            resources,
            mode,
            backend,
            ctx,
            state: Mutex::new(JobState {
                status: Status::Accepted,
                updated: Utc::now(),
                provider_id: None,
                log_stream: None,
                api_log: Vec::new(),
                container_log: Vec::new(),
            }),
            cancel: CancellationToken::new(),
            done_tx,
            done_rx,
        })
    }

    /// Rebuild a job from a snapshot record. Restored jobs are terminal,
    /// carry no live provider handle, and never enter the active registry.
    pub fn from_record(record: JobRecord, ctx: JobContext) -> Arc<Self> {
        let (done_tx, done_rx) = watch::channel(true);
        Arc::new(Self {
            id: record.id,
            process_id: record.process_id,
            process_version: record.process_version,
            image: record.image,
            cmd: record.cmd,
            env: HashMap::new(),
            resources: Resources::default(),
            mode: ExecutionMode::Async,
            backend: Arc::new(InertBackend),
            ctx,
            state: Mutex::new(JobState {
                status: record.status,
                updated: record.updated,
                provider_id: record.provider_id,
                log_stream: None,
                api_log: record.api_log,
                container_log: record.container_log,
            }),
            cancel: CancellationToken::new(),
            done_tx,
            done_rx,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn current_status(&self) -> Status {
        self.state.lock().status
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.state.lock().updated
    }

    pub fn provider_id(&self) -> Option<String> {
        self.state.lock().provider_id.clone()
    }

    /// Append a message to the api log.
    pub fn message(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(job = %self.id, "{}", text);
        self.state.lock().api_log.push(text);
    }

    /// Apply a status update.
    ///
    /// This is the single place monotonicity is enforced: once terminal,
    /// the status never changes again.
    pub fn new_status(&self, status: Status) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return;
        }
        state.status = status;
        state.updated = Utc::now();
    }

    /// Submit the workload to the backend and record the provider id.
    ///
    /// The orchestrator has already admitted the job to the cache and the
    /// active registry, so the registry holds it for the entire accepted
    /// window, submit round-trip included; a submit failure is rolled
    /// back at the admission site.
    pub async fn create(&self) -> Result<(), Error> {
        self.message(format!("submitting job for process '{}'", self.process_id));
        match self
            .backend
            .submit(&self.cmd, &self.env, &self.resources)
            .await
        {
            Ok(provider_id) => {
                {
                    let mut state = self.state.lock();
                    state.provider_id = Some(provider_id);
                    state.updated = Utc::now();
                }
                self.message("job submitted, awaiting execution");
                Ok(())
            }
            Err(e) => {
                self.message(format!("submission failed: {}", e));
                Err(e)
            }
        }
    }

    /// Run a synchronous job to completion on the current task and perform
    /// terminal cleanup before returning.
    pub async fn run_sync(self: Arc<Self>) {
        let Some(provider_id) = self.provider_id() else {
            self.message("cannot run: backend submit has not returned an id");
            self.finish(Status::Failed).await;
            return;
        };

        self.new_status(Status::Running);

        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.finish(Status::Dismissed).await;
            }
            result = self.backend.wait(&provider_id) => {
                match result {
                    Ok(ProviderStatus::Succeeded) => self.finish(Status::Successful).await,
                    Ok(_) => self.finish(Status::Failed).await,
                    Err(e) => {
                        self.message(format!("waiting on the backend failed: {}", e));
                        self.finish(Status::Failed).await;
                    }
                }
                // release the exited container now that its logs are pulled
                if let Err(e) = self.backend.kill(&provider_id).await {
                    tracing::debug!(job = %self.id, "container cleanup failed: {}", e);
                }
            }
        }
    }

    /// Detach the monitor loop for an asynchronous job.
    ///
    /// Polls the backend at the configured cadence until a terminal
    /// provider status is observed or the cancellation token fires. Poll
    /// failures are transient: logged, then retried on the next tick.
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let job = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(job.ctx.config.poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_unknown: Option<String> = None;

            loop {
                tokio::select! {
                    _ = job.cancel.cancelled() => {
                        // no further provider calls; cleanup still runs
                        job.finish(Status::Dismissed).await;
                        return;
                    }
                    _ = ticker.tick() => {
                        let Some(provider_id) = job.provider_id() else { continue };
                        let observation = match job.backend.observe(&provider_id).await {
                            Ok(observation) => observation,
                            Err(e) => {
                                job.message(format!("status poll failed: {}", e));
                                continue;
                            }
                        };

                        if let Some(stream) = observation.log_stream {
                            job.state.lock().log_stream = Some(stream);
                        }

                        match observation.status {
                            // submission states collapse into accepted,
                            // which the job holds since submit; never
                            // regress out of running
                            ProviderStatus::Pending => {}
                            ProviderStatus::Running => {
                                if job.current_status() != Status::Running {
                                    job.new_status(Status::Running);
                                }
                            }
                            ProviderStatus::Succeeded => {
                                job.finish(Status::Successful).await;
                                return;
                            }
                            ProviderStatus::Failed => {
                                job.finish(Status::Failed).await;
                                return;
                            }
                            ProviderStatus::Unknown(status) => {
                                if last_unknown.as_deref() != Some(status.as_str()) {
                                    job.message(format!(
                                        "unrecognized provider status '{}', keeping '{}'",
                                        status,
                                        job.current_status()
                                    ));
                                    last_unknown = Some(status);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Dismiss the job: provider-side kill, then the dismissed status,
    /// then the cancellation token.
    ///
    /// Touches neither the cache nor the registry — `kill_all` holds the
    /// registry lock while calling this. Cleanup belongs to the runner
    /// task, woken by the token.
    pub async fn kill(&self) -> Result<(), Error> {
        self.message("received dismiss signal");

        if self.current_status().is_terminal() {
            return Err(Error::Conflict(format!(
                "job {} already reached a terminal status",
                self.id
            )));
        }

        if let Some(provider_id) = self.provider_id() {
            if let Err(e) = self.backend.kill(&provider_id).await {
                self.message(format!("could not send kill to the backend: {}", e));
                return Err(e);
            }
        }

        self.new_status(Status::Dismissed);
        self.cancel.cancel();
        Ok(())
    }

    /// Terminal cleanup. Runs exactly once, on the task that owns the
    /// job's execution (sync worker or monitor).
    pub async fn finish(&self, status: Status) {
        // final container-log pull; the dismissed path must not issue
        // further provider calls
        if status != Status::Dismissed {
            if let Err(e) = self.refresh_container_logs().await {
                self.message(format!("could not fetch final container logs: {}", e));
            }
        }

        // metadata lands in storage before the terminal status becomes
        // observable, so a client that sees `successful` finds the record
        if status == Status::Successful {
            self.write_metadata().await;
        }

        self.new_status(status);
        self.message(format!("job reached terminal status '{}'", self.current_status()));

        if let Err(e) = self.ctx.log_store.flush(self.id, &self.stored_logs()).await {
            tracing::error!("Failed to flush logs for job {}: {}", self.id, e);
        }

        self.ctx.registry.remove(self.id).await;

        // settle the final size delta with the cache
        if let Some(cache) = self.ctx.cache.upgrade() {
            cache.refresh_size(self.id).await;
        }

        let _ = self.done_tx.send(true);
    }

    async fn refresh_container_logs(&self) -> Result<(), Error> {
        let handle = {
            let state = self.state.lock();
            state.log_stream.clone().or_else(|| state.provider_id.clone())
        };
        let Some(handle) = handle else {
            return Ok(());
        };
        let lines = self.backend.fetch_logs(&handle).await?;
        if !lines.is_empty() {
            self.state.lock().container_log = lines;
        }
        Ok(())
    }

    async fn write_metadata(&self) {
        self.message("writing job metadata");

        let digest = match self.backend.resolve_image_digest(&self.image).await {
            Ok(digest) => digest,
            Err(e) => {
                self.message(format!("could not resolve image digest: {}", e));
                String::new()
            }
        };

        let times = match self.provider_id() {
            Some(provider_id) => match self.backend.job_times(&provider_id).await {
                Ok(times) => times,
                Err(e) => {
                    self.message(format!("could not fetch job times: {}", e));
                    JobTimes::default()
                }
            },
            None => JobTimes::default(),
        };

        let metadata = Metadata {
            context: METADATA_CONTEXT,
            job_id: self.id,
            process: ProcessRef {
                id: self.process_id.clone(),
                version: self.process_version.clone(),
            },
            image: ImageRef {
                uri: self.image.clone(),
                digest,
            },
            commands: self.cmd.clone(),
            generated_at_time: times.generated,
            started_at_time: times.started,
            ended_at_time: times.ended,
        };

        let key = storage::document_key(&self.ctx.config.metadata_prefix, self.id);
        let body = match serde_json::to_vec(&metadata) {
            Ok(body) => body,
            Err(e) => {
                self.message(format!("error serializing metadata: {}", e));
                return;
            }
        };
        if let Err(e) = self.ctx.store.put_json(&key, body).await {
            self.message(format!("error writing metadata: {}", e));
        }
    }

    /// Current logs without a provider round-trip.
    pub fn stored_logs(&self) -> JobLogs {
        let state = self.state.lock();
        JobLogs {
            job_id: self.id,
            process_id: self.process_id.clone(),
            container_log: state.container_log.clone(),
            api_log: state.api_log.clone(),
        }
    }

    /// Current logs, refreshing the container log from the provider while
    /// the job is live.
    pub async fn logs(&self) -> JobLogs {
        if !self.current_status().is_terminal() {
            if let Err(e) = self.refresh_container_logs().await {
                self.message(format!("could not fetch container logs: {}", e));
            }
        }
        self.stored_logs()
    }

    pub fn status_summary(&self) -> JobStatus {
        let state = self.state.lock();
        JobStatus {
            process_id: self.process_id.clone(),
            job_type: "process".to_string(),
            job_id: self.id,
            updated: state.updated,
            status: state.status,
        }
    }

    /// Estimated bytes this job holds in the cache.
    pub fn size_in_cache(&self) -> u64 {
        fn strings(items: &[String]) -> usize {
            items
                .iter()
                .map(|s| mem::size_of::<String>() + s.len())
                .sum()
        }

        let state = self.state.lock();
        let mut total = mem::size_of::<Job>();
        total += strings(&self.cmd);
        total += strings(&state.api_log);
        total += strings(&state.container_log);
        total += self.process_id.len() + self.process_version.len() + self.image.len();
        total += state.provider_id.as_deref().map_or(0, str::len);
        total += state.log_stream.as_deref().map_or(0, str::len);
        total += self
            .env
            .iter()
            .map(|(k, v)| 2 * mem::size_of::<String>() + k.len() + v.len())
            .sum::<usize>();
        total as u64
    }

    pub fn record(&self) -> JobRecord {
        let state = self.state.lock();
        JobRecord {
            id: self.id,
            process_id: self.process_id.clone(),
            process_version: self.process_version.clone(),
            status: state.status,
            updated: state.updated,
            cmd: self.cmd.clone(),
            image: self.image.clone(),
            provider_id: state.provider_id.clone(),
            api_log: state.api_log.clone(),
            container_log: state.container_log.clone(),
        }
    }

    /// True once terminal cleanup has released the completion signal.
    pub fn finished(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Wait until terminal cleanup has fully run. Cancellable: callers may
    /// race it against their own deadline.
    pub async fn wait_done(&self) {
        let mut rx = self.done_rx.clone();
        // the sender lives on self, so this only errors if self is gone
        let _ = rx.wait_for(|done| *done).await;
    }
}
