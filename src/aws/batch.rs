//! AWS Batch REST-JSON client: SubmitJob, DescribeJobs, TerminateJob.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::errors::Error;

pub struct BatchClient {
    region: String,
    timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchJobDetail {
    pub status: String,
    #[serde(rename = "statusReason", default)]
    pub status_reason: Option<String>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<i64>,
    #[serde(rename = "startedAt", default)]
    pub started_at: Option<i64>,
    #[serde(rename = "stoppedAt", default)]
    pub stopped_at: Option<i64>,
    #[serde(default)]
    pub container: Option<BatchContainerDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchContainerDetail {
    #[serde(rename = "logStreamName", default)]
    pub log_stream_name: Option<String>,
}

#[derive(Deserialize)]
struct SubmitJobResponse {
    #[serde(rename = "jobId")]
    job_id: String,
}

#[derive(Deserialize)]
struct DescribeJobsResponse {
    #[serde(default)]
    jobs: Vec<BatchJobDetail>,
}

impl BatchClient {
    pub fn new(region: impl Into<String>, timeout: Duration) -> Self {
        Self {
            region: region.into(),
            timeout,
        }
    }

    fn host(&self) -> String {
        format!("batch.{}.amazonaws.com", self.region)
    }

    async fn call(&self, path: &str, body: serde_json::Value) -> Result<String, Error> {
        super::signed_post(
            &self.host(),
            path,
            "batch",
            &self.region,
            "application/json",
            None,
            serde_json::to_vec(&body)?,
            self.timeout,
        )
        .await
    }

    pub async fn submit_job(
        &self,
        name: &str,
        queue: &str,
        definition: &str,
        command: &[String],
        env: &HashMap<String, String>,
    ) -> Result<String, Error> {
        let environment: Vec<serde_json::Value> = env
            .iter()
            .map(|(k, v)| json!({"name": k, "value": v}))
            .collect();

        let body = json!({
            "jobName": name,
            "jobQueue": queue,
            "jobDefinition": definition,
            "containerOverrides": {
                "command": command,
                "environment": environment,
            },
        });

        let text = self.call("/v1/submitjob", body).await?;
        let parsed: SubmitJobResponse = serde_json::from_str(&text)?;
        Ok(parsed.job_id)
    }

    pub async fn describe_job(&self, job_id: &str) -> Result<BatchJobDetail, Error> {
        let text = self.call("/v1/describejobs", json!({"jobs": [job_id]})).await?;
        let parsed: DescribeJobsResponse = serde_json::from_str(&text)?;
        parsed
            .jobs
            .into_iter()
            .next()
            .ok_or_else(|| Error::Backend(format!("batch job {} not found", job_id)))
    }

    pub async fn terminate_job(&self, job_id: &str, reason: &str) -> Result<(), Error> {
        self.call(
            "/v1/terminatejob",
            json!({"jobId": job_id, "reason": reason}),
        )
        .await?;
        Ok(())
    }
}
