//! Uniform façade over the execution providers.

pub mod batch;
pub mod docker;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::errors::Error;
use crate::processes::Process;

/// Provider-side status, already collapsed to the distinctions the job
/// state machine cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Anything the mapping table does not recognize; leaves the job
    /// status unchanged.
    Unknown(String),
}

/// One poll's worth of provider state.
#[derive(Debug, Clone)]
pub struct Observation {
    pub status: ProviderStatus,
    pub log_stream: Option<String>,
}

/// Provider-reported lifecycle timestamps for the metadata record.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobTimes {
    pub generated: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
}

/// Requested compute for a submission.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Resources {
    pub cpus: f32,
    pub memory: i64,
}

/// Capability set every execution provider exposes.
///
/// Implementations are re-entrant: each call constructs whatever transient
/// clients it needs and relies on no state beyond environment credentials.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Submit the workload; returns the provider-assigned id.
    async fn submit(
        &self,
        command: &[String],
        env: &HashMap<String, String>,
        resources: &Resources,
    ) -> Result<String, Error>;

    /// Current provider status plus the log-stream handle, if known yet.
    async fn observe(&self, provider_id: &str) -> Result<Observation, Error>;

    /// Block until the workload finishes; used by synchronous execution
    /// only. Providers without an in-line wait return a backend error.
    async fn wait(&self, provider_id: &str) -> Result<ProviderStatus, Error>;

    async fn kill(&self, provider_id: &str) -> Result<(), Error>;

    /// Fetch the container log lines behind a log-stream handle.
    async fn fetch_logs(&self, log_stream: &str) -> Result<Vec<String>, Error>;

    async fn job_times(&self, provider_id: &str) -> Result<JobTimes, Error>;

    async fn resolve_image_digest(&self, image: &str) -> Result<String, Error>;
}

/// Execution mode a process declares through `jobControlOptions`:
/// in-line on a worker task, or detached behind the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sync,
    Async,
}

/// Builds the backend adapter for a process. A seam so tests can swap in
/// a scripted provider.
pub trait BackendFactory: Send + Sync {
    fn for_process(
        &self,
        process: &Process,
        mode: ExecutionMode,
        config: &Config,
    ) -> Result<Arc<dyn Backend>, Error>;
}

/// Production factory: docker for synchronous execution, AWS Batch for
/// asynchronous execution.
pub struct ProviderBackendFactory;

impl BackendFactory for ProviderBackendFactory {
    fn for_process(
        &self,
        process: &Process,
        mode: ExecutionMode,
        config: &Config,
    ) -> Result<Arc<dyn Backend>, Error> {
        match mode {
            ExecutionMode::Sync => Ok(Arc::new(docker::DockerBackend::new(
                process.image_ref(),
                config.backend_timeout(),
            ))),
            ExecutionMode::Async => {
                let provider = process.runtime.provider.as_ref().ok_or_else(|| {
                    Error::Validation(format!(
                        "process '{}' declares async execution but no provider",
                        process.info.id
                    ))
                })?;
                if provider.kind != "aws-batch" {
                    return Err(Error::Validation(format!(
                        "unsupported provider type '{}'",
                        provider.kind
                    )));
                }
                Ok(Arc::new(batch::BatchBackend::new(
                    config.aws_region.clone(),
                    provider.job_definition.clone(),
                    provider.job_queue.clone(),
                    provider.name.clone(),
                    config.batch_log_group.clone(),
                    config.backend_timeout(),
                )))
            }
        }
    }
}

/// Stand-in backend for jobs hydrated from a snapshot.
///
/// Restored jobs are terminal and never issue provider calls; every
/// operation fails if something does reach for it.
pub struct InertBackend;

#[async_trait]
impl Backend for InertBackend {
    async fn submit(
        &self,
        _command: &[String],
        _env: &HashMap<String, String>,
        _resources: &Resources,
    ) -> Result<String, Error> {
        Err(Error::Backend("job was restored from a snapshot".to_string()))
    }

    async fn observe(&self, _provider_id: &str) -> Result<Observation, Error> {
        Err(Error::Backend("job was restored from a snapshot".to_string()))
    }

    async fn wait(&self, _provider_id: &str) -> Result<ProviderStatus, Error> {
        Err(Error::Backend("job was restored from a snapshot".to_string()))
    }

    async fn kill(&self, _provider_id: &str) -> Result<(), Error> {
        Err(Error::Backend("job was restored from a snapshot".to_string()))
    }

    async fn fetch_logs(&self, _log_stream: &str) -> Result<Vec<String>, Error> {
        Err(Error::Backend("job was restored from a snapshot".to_string()))
    }

    async fn job_times(&self, _provider_id: &str) -> Result<JobTimes, Error> {
        Err(Error::Backend("job was restored from a snapshot".to_string()))
    }

    async fn resolve_image_digest(&self, _image: &str) -> Result<String, Error> {
        Err(Error::Backend("job was restored from a snapshot".to_string()))
    }
}
