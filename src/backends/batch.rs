//! AWS Batch execution adapter.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::aws::batch::BatchClient;
use crate::aws::logs::LogsClient;
use crate::aws::registry;
use crate::errors::Error;

use super::{Backend, JobTimes, Observation, ProviderStatus, Resources};

pub struct BatchBackend {
    region: String,
    job_definition: String,
    job_queue: String,
    job_name: String,
    log_group: String,
    timeout: Duration,
}

impl BatchBackend {
    pub fn new(
        region: impl Into<String>,
        job_definition: impl Into<String>,
        job_queue: impl Into<String>,
        job_name: impl Into<String>,
        log_group: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            region: region.into(),
            job_definition: job_definition.into(),
            job_queue: job_queue.into(),
            job_name: job_name.into(),
            log_group: log_group.into(),
            timeout,
        }
    }

    fn client(&self) -> BatchClient {
        BatchClient::new(self.region.clone(), self.timeout)
    }

    fn map_status(status: &str) -> ProviderStatus {
        match status {
            "SUBMITTED" | "PENDING" | "RUNNABLE" | "STARTING" => ProviderStatus::Pending,
            "RUNNING" => ProviderStatus::Running,
            "SUCCEEDED" => ProviderStatus::Succeeded,
            "FAILED" => ProviderStatus::Failed,
            other => ProviderStatus::Unknown(other.to_string()),
        }
    }

    fn millis_to_time(millis: Option<i64>) -> Option<DateTime<Utc>> {
        millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

#[async_trait]
impl Backend for BatchBackend {
    async fn submit(
        &self,
        command: &[String],
        env: &HashMap<String, String>,
        _resources: &Resources,
    ) -> Result<String, Error> {
        // cpu/memory come from the job definition on the Batch side
        self.client()
            .submit_job(
                &self.job_name,
                &self.job_queue,
                &self.job_definition,
                command,
                env,
            )
            .await
    }

    async fn observe(&self, provider_id: &str) -> Result<Observation, Error> {
        let detail = self.client().describe_job(provider_id).await?;
        Ok(Observation {
            status: Self::map_status(&detail.status),
            log_stream: detail.container.and_then(|c| c.log_stream_name),
        })
    }

    async fn wait(&self, _provider_id: &str) -> Result<ProviderStatus, Error> {
        Err(Error::Backend(
            "aws-batch does not support in-line waits; poll with observe".to_string(),
        ))
    }

    async fn kill(&self, provider_id: &str) -> Result<(), Error> {
        self.client()
            .terminate_job(provider_id, "job dismissed")
            .await
    }

    async fn fetch_logs(&self, log_stream: &str) -> Result<Vec<String>, Error> {
        LogsClient::new(self.region.clone(), self.timeout)
            .get_log_events(&self.log_group, log_stream)
            .await
    }

    async fn job_times(&self, provider_id: &str) -> Result<JobTimes, Error> {
        let detail = self.client().describe_job(provider_id).await?;
        Ok(JobTimes {
            generated: Self::millis_to_time(detail.created_at),
            started: Self::millis_to_time(detail.started_at),
            ended: Self::millis_to_time(detail.stopped_at),
        })
    }

    async fn resolve_image_digest(&self, image: &str) -> Result<String, Error> {
        registry::resolve_image_digest(image, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_status_mapping_table() {
        for submitted in ["SUBMITTED", "PENDING", "RUNNABLE", "STARTING"] {
            assert_eq!(BatchBackend::map_status(submitted), ProviderStatus::Pending);
        }
        assert_eq!(BatchBackend::map_status("RUNNING"), ProviderStatus::Running);
        assert_eq!(BatchBackend::map_status("SUCCEEDED"), ProviderStatus::Succeeded);
        assert_eq!(BatchBackend::map_status("FAILED"), ProviderStatus::Failed);
        // unrecognized statuses leave the job state unchanged
        assert_eq!(
            BatchBackend::map_status("MIGRATING"),
            ProviderStatus::Unknown("MIGRATING".to_string())
        );
    }

    #[test]
    fn test_millis_conversion() {
        let time = BatchBackend::millis_to_time(Some(1_700_000_000_000)).expect("time");
        assert_eq!(time.year(), 2023);
        assert!(BatchBackend::millis_to_time(None).is_none());
    }
}
