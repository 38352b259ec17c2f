//! Thin clients for the AWS REST APIs the service talks to.
//!
//! Every call builds a fresh HTTP client and resolves credentials from the
//! environment, so the adapters that use them stay re-entrant.

pub mod batch;
pub mod logs;
pub mod registry;
pub mod s3;
pub mod sigv4;

use std::time::Duration;

use chrono::Utc;

use crate::errors::Error;
use sigv4::Credentials;

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(Error::from)
}

/// POST a signed JSON payload to an AWS service endpoint and return the
/// response body, or a backend error carrying the service's message.
pub(crate) async fn signed_post(
    host: &str,
    path: &str,
    service: &str,
    region: &str,
    content_type: &str,
    amz_target: Option<&str>,
    body: Vec<u8>,
    timeout: Duration,
) -> Result<String, Error> {
    let creds = Credentials::from_env()?;

    let mut extra = vec![("content-type".to_string(), content_type.to_string())];
    if let Some(target) = amz_target {
        extra.push(("x-amz-target".to_string(), target.to_string()));
    }

    let headers = sigv4::sign(
        &creds,
        "POST",
        host,
        path,
        "",
        &extra,
        &body,
        region,
        service,
        Utc::now(),
    );

    let client = http_client(timeout)?;
    let mut request = client.post(format!("https://{}{}", host, path)).body(body);
    for (name, value) in headers {
        request = request.header(&name, &value);
    }

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(Error::Backend(format!("{} {}: {}", host, status, text)));
    }
    Ok(text)
}
