use std::path::PathBuf;

use uuid::Uuid;

use crate::errors::Error;
use crate::jobs::JobLogs;

/// Durable per-job log store under `<data-dir>/logs/`.
///
/// Terminal cleanup flushes both log sequences here so they survive cache
/// eviction and restarts.
pub struct FsLogStore {
    logs_dir: PathBuf,
}

impl FsLogStore {
    /// Create a new FsLogStore rooted at `data_dir/logs/`.
    pub async fn new(data_dir: PathBuf) -> Result<Self, Error> {
        let logs_dir = data_dir.join("logs");
        tokio::fs::create_dir_all(&logs_dir).await?;
        Ok(Self { logs_dir })
    }

    fn log_path(&self, job_id: Uuid) -> PathBuf {
        self.logs_dir.join(format!("{}.json", job_id))
    }

    pub async fn flush(&self, job_id: Uuid, logs: &JobLogs) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(logs)?;
        tokio::fs::write(self.log_path(job_id), json.as_bytes()).await?;
        Ok(())
    }

    pub async fn read(&self, job_id: Uuid) -> Result<Option<JobLogs>, Error> {
        let path = self.log_path(job_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_logs(job_id: Uuid) -> JobLogs {
        JobLogs {
            job_id,
            process_id: "echo".to_string(),
            container_log: vec!["hello".to_string()],
            api_log: vec!["submitting job".to_string(), "job finished".to_string()],
        }
    }

    #[tokio::test]
    async fn test_flush_then_read_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsLogStore::new(dir.path().to_path_buf()).await.expect("store");

        let job_id = Uuid::new_v4();
        let logs = sample_logs(job_id);
        store.flush(job_id, &logs).await.expect("flush");

        let read = store.read(job_id).await.expect("read").expect("present");
        assert_eq!(read.job_id, job_id);
        assert_eq!(read.container_log, logs.container_log);
        assert_eq!(read.api_log, logs.api_log);
    }

    #[tokio::test]
    async fn test_read_missing_returns_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsLogStore::new(dir.path().to_path_buf()).await.expect("store");
        assert!(store.read(Uuid::new_v4()).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_flush_overwrites_previous(){
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsLogStore::new(dir.path().to_path_buf()).await.expect("store");

        let job_id = Uuid::new_v4();
        store.flush(job_id, &sample_logs(job_id)).await.expect("flush");

        let mut updated = sample_logs(job_id);
        updated.container_log.push("goodbye".to_string());
        store.flush(job_id, &updated).await.expect("flush again");

        let read = store.read(job_id).await.expect("read").expect("present");
        assert_eq!(read.container_log.len(), 2);
    }
}
