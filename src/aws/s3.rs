//! S3 object client: GET, PUT, and HEAD on single keys, path-style.

use std::time::Duration;

use chrono::Utc;

use crate::errors::Error;

use super::sigv4::{self, Credentials};

pub struct S3Client {
    region: String,
    timeout: Duration,
}

impl S3Client {
    pub fn new(region: impl Into<String>, timeout: Duration) -> Self {
        Self {
            region: region.into(),
            timeout,
        }
    }

    fn host(&self) -> String {
        format!("s3.{}.amazonaws.com", self.region)
    }

    fn object_path(bucket: &str, key: &str) -> String {
        format!("/{}/{}", bucket, sigv4::uri_encode(key, false))
    }

    async fn request(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response, Error> {
        let creds = Credentials::from_env()?;
        let host = self.host();
        let path = Self::object_path(bucket, key);

        let mut extra = vec![(
            "x-amz-content-sha256".to_string(),
            sigv4::hex_sha256(&body),
        )];
        if let Some(ct) = content_type {
            extra.push(("content-type".to_string(), ct.to_string()));
        }

        let headers = sigv4::sign(
            &creds,
            method,
            &host,
            &path,
            "",
            &extra,
            &body,
            &self.region,
            "s3",
            Utc::now(),
        );

        let client = super::http_client(self.timeout)?;
        let url = format!("https://{}{}", host, path);
        let mut request = match method {
            "PUT" => client.put(url).body(body),
            "HEAD" => client.head(url),
            _ => client.get(url),
        };
        for (name, value) in headers {
            request = request.header(&name, &value);
        }
        Ok(request.send().await?)
    }

    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), Error> {
        let response = self
            .request("PUT", bucket, key, body, Some(content_type))
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!("s3 put {}: {} {}", key, status, text)));
        }
        Ok(())
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, Error> {
        let response = self.request("GET", bucket, key, Vec::new(), None).await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("s3 object {} not found", key)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!("s3 get {}: {} {}", key, status, text)));
        }
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<bool, Error> {
        let response = self.request("HEAD", bucket, key, Vec::new(), None).await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(Error::Storage(format!("s3 head {}: {}", key, status)));
        }
        Ok(true)
    }
}
