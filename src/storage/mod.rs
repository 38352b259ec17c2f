pub mod logs;
pub mod s3;

use async_trait::async_trait;

use crate::errors::Error;

/// Object storage seam consumed by the job layer and the read-side
/// handlers. Keys are `<prefix>/<job-id>.json`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_json(&self, key: &str, body: Vec<u8>) -> Result<(), Error>;
    async fn get_json(&self, key: &str) -> Result<serde_json::Value, Error>;
    async fn exists(&self, key: &str) -> Result<bool, Error>;
}

pub fn document_key(prefix: &str, job_id: uuid::Uuid) -> String {
    format!("{}/{}.json", prefix, job_id)
}

/// Fetch a job document (results or metadata) from object storage.
///
/// The job id is assumed valid; a missing document is a not-found error.
pub async fn fetch_document(
    store: &dyn ObjectStore,
    prefix: &str,
    job_id: uuid::Uuid,
) -> Result<serde_json::Value, Error> {
    let key = document_key(prefix, job_id);
    if !store.exists(&key).await? {
        return Err(Error::NotFound(format!("{} not found", key)));
    }
    store.get_json(&key).await
}
