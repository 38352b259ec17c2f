use async_trait::async_trait;

use crate::aws::s3::S3Client;
use crate::config::Config;
use crate::errors::Error;

use super::ObjectStore;

/// S3-backed object store.
///
/// Clients are rebuilt per call; credentials come from the environment.
pub struct S3Store {
    bucket: String,
    region: String,
    timeout: std::time::Duration,
}

impl S3Store {
    pub fn new(config: &Config) -> Self {
        Self {
            bucket: config.s3_bucket.clone(),
            region: config.aws_region.clone(),
            timeout: config.backend_timeout(),
        }
    }

    fn client(&self) -> S3Client {
        S3Client::new(self.region.clone(), self.timeout)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_json(&self, key: &str, body: Vec<u8>) -> Result<(), Error> {
        self.client()
            .put_object(&self.bucket, key, body, "application/json")
            .await
    }

    async fn get_json(&self, key: &str) -> Result<serde_json::Value, Error> {
        let bytes = self.client().get_object(&self.bucket, key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        self.client().head_object(&self.bucket, key).await
    }
}
