//! Local container runtime, driven through the `docker` CLI.

use std::collections::HashMap;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use tokio::process::Command;

use crate::aws::registry;
use crate::errors::Error;

use super::{Backend, JobTimes, Observation, ProviderStatus, Resources};

pub struct DockerBackend {
    image: String,
    timeout: Duration,
}

impl DockerBackend {
    pub fn new(image: impl Into<String>, timeout: Duration) -> Self {
        Self {
            image: image.into(),
            timeout,
        }
    }

    async fn docker(&self, args: &[String], deadline: Option<Duration>) -> Result<Output, Error> {
        let future = Command::new("docker").args(args).output();
        let output = match deadline {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .map_err(|_| Error::Backend(format!("docker {} timed out", args[0])))?
                .map_err(|e| Error::Backend(format!("docker {}: {}", args[0], e)))?,
            None => future
                .await
                .map_err(|e| Error::Backend(format!("docker {}: {}", args[0], e)))?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Backend(format!(
                "docker {} failed: {}",
                args[0],
                stderr.trim()
            )));
        }
        Ok(output)
    }

    async fn ensure_image(&self) -> Result<(), Error> {
        let inspect = vec!["image".to_string(), "inspect".to_string(), self.image.clone()];
        if self.docker(&inspect, Some(self.timeout)).await.is_ok() {
            return Ok(());
        }
        tracing::info!("Pulling image {}", self.image);
        // image pulls routinely outrun the per-call deadline
        let pull = vec!["pull".to_string(), self.image.clone()];
        self.docker(&pull, None).await?;
        Ok(())
    }

    fn map_state(status: &str, exit_code: i64) -> ProviderStatus {
        match status {
            "created" | "restarting" => ProviderStatus::Pending,
            "running" | "paused" | "removing" => ProviderStatus::Running,
            "exited" => {
                if exit_code == 0 {
                    ProviderStatus::Succeeded
                } else {
                    ProviderStatus::Failed
                }
            }
            "dead" => ProviderStatus::Failed,
            other => ProviderStatus::Unknown(other.to_string()),
        }
    }

    fn parse_time(value: &serde_json::Value) -> Option<DateTime<Utc>> {
        let text = value.as_str()?;
        let parsed = DateTime::parse_from_rfc3339(text).ok()?;
        let utc = parsed.with_timezone(&Utc);
        // docker reports the zero time for containers that have not
        // reached that phase yet
        if utc.year() < 2000 {
            return None;
        }
        Some(utc)
    }
}

#[async_trait]
impl Backend for DockerBackend {
    async fn submit(
        &self,
        command: &[String],
        env: &HashMap<String, String>,
        resources: &Resources,
    ) -> Result<String, Error> {
        self.ensure_image().await?;

        let mut args = vec!["run".to_string(), "-d".to_string()];
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        if resources.cpus > 0.0 {
            args.push("--cpus".to_string());
            args.push(resources.cpus.to_string());
        }
        if resources.memory > 0 {
            args.push("--memory".to_string());
            args.push(format!("{}m", resources.memory));
        }
        args.push(self.image.clone());
        args.extend(command.iter().cloned());

        let output = self.docker(&args, Some(self.timeout)).await?;
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(Error::Backend("docker run returned no container id".to_string()));
        }
        Ok(container_id)
    }

    async fn observe(&self, provider_id: &str) -> Result<Observation, Error> {
        let args = vec![
            "inspect".to_string(),
            "-f".to_string(),
            "{{json .State}}".to_string(),
            provider_id.to_string(),
        ];
        let output = self.docker(&args, Some(self.timeout)).await?;
        let state: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        let status = state["Status"].as_str().unwrap_or_default().to_string();
        let exit_code = state["ExitCode"].as_i64().unwrap_or_default();

        Ok(Observation {
            status: Self::map_state(&status, exit_code),
            log_stream: Some(provider_id.to_string()),
        })
    }

    async fn wait(&self, provider_id: &str) -> Result<ProviderStatus, Error> {
        // no deadline: this is the whole point of the synchronous path
        let args = vec!["wait".to_string(), provider_id.to_string()];
        let output = self.docker(&args, None).await?;
        let exit_code: i64 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|_| Error::Backend("docker wait returned a non-numeric exit code".to_string()))?;
        if exit_code == 0 {
            Ok(ProviderStatus::Succeeded)
        } else {
            Ok(ProviderStatus::Failed)
        }
    }

    async fn kill(&self, provider_id: &str) -> Result<(), Error> {
        let args = vec!["rm".to_string(), "-f".to_string(), provider_id.to_string()];
        self.docker(&args, Some(self.timeout)).await?;
        Ok(())
    }

    async fn fetch_logs(&self, log_stream: &str) -> Result<Vec<String>, Error> {
        let args = vec!["logs".to_string(), log_stream.to_string()];
        let output = self.docker(&args, Some(self.timeout)).await?;
        // docker multiplexes container stdout/stderr onto both pipes
        let mut lines: Vec<String> = Vec::new();
        lines.extend(String::from_utf8_lossy(&output.stdout).lines().map(str::to_string));
        lines.extend(String::from_utf8_lossy(&output.stderr).lines().map(str::to_string));
        Ok(lines)
    }

    async fn job_times(&self, provider_id: &str) -> Result<JobTimes, Error> {
        let args = vec!["inspect".to_string(), provider_id.to_string()];
        let output = self.docker(&args, Some(self.timeout)).await?;
        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        let detail = parsed
            .get(0)
            .ok_or_else(|| Error::Backend(format!("container {} not found", provider_id)))?;

        Ok(JobTimes {
            generated: Self::parse_time(&detail["Created"]),
            started: Self::parse_time(&detail["State"]["StartedAt"]),
            ended: Self::parse_time(&detail["State"]["FinishedAt"]),
        })
    }

    async fn resolve_image_digest(&self, image: &str) -> Result<String, Error> {
        registry::resolve_image_digest(image, self.timeout).await
    }
}
