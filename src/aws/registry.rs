//! Image digest lookup.
//!
//! ECR-hosted references are resolved through the ECR API; everything else
//! goes to the public Docker Hub registry. The digest is advisory metadata:
//! it can lag the tag if the tag was re-pushed mid-run.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::errors::Error;

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// Resolve `image[:tag]` to a content digest.
pub async fn resolve_image_digest(image: &str, timeout: Duration) -> Result<String, Error> {
    if image.contains(".amazonaws.com/") {
        ecr_image_digest(image, timeout).await
    } else {
        docker_hub_digest(image, timeout).await
    }
}

fn split_tag(reference: &str) -> (&str, &str) {
    // only split on a ':' that follows the last '/', so ports survive
    match reference.rfind(':') {
        Some(idx) if idx > reference.rfind('/').unwrap_or(0) => {
            (&reference[..idx], &reference[idx + 1..])
        }
        _ => (reference, "latest"),
    }
}

#[derive(Deserialize)]
struct BatchGetImageResponse {
    #[serde(default)]
    images: Vec<EcrImage>,
}

#[derive(Deserialize)]
struct EcrImage {
    #[serde(rename = "imageId")]
    image_id: EcrImageId,
}

#[derive(Deserialize)]
struct EcrImageId {
    #[serde(rename = "imageDigest")]
    image_digest: String,
}

async fn ecr_image_digest(image: &str, timeout: Duration) -> Result<String, Error> {
    let (registry_host, remainder) = image
        .split_once('/')
        .ok_or_else(|| Error::Backend(format!("malformed ECR image reference: {}", image)))?;
    let (repository, tag) = split_tag(remainder);

    // host shape: {account}.dkr.ecr.{region}.amazonaws.com
    let region = registry_host
        .split('.')
        .nth(3)
        .ok_or_else(|| Error::Backend(format!("cannot parse region from: {}", registry_host)))?;

    let body = json!({
        "repositoryName": repository,
        "imageIds": [{"imageTag": tag}],
    });

    let text = super::signed_post(
        &format!("api.ecr.{}.amazonaws.com", region),
        "/",
        "ecr",
        region,
        "application/x-amz-json-1.1",
        Some("AmazonEC2ContainerRegistry_V20150921.BatchGetImage"),
        serde_json::to_vec(&body)?,
        timeout,
    )
    .await?;

    let parsed: BatchGetImageResponse = serde_json::from_str(&text)?;
    parsed
        .images
        .into_iter()
        .next()
        .map(|i| i.image_id.image_digest)
        .ok_or_else(|| Error::Backend(format!("no image found for {}:{}", repository, tag)))
}

#[derive(Deserialize)]
struct DockerHubToken {
    token: String,
}

async fn docker_hub_digest(image: &str, timeout: Duration) -> Result<String, Error> {
    let (name, tag) = split_tag(image);
    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };

    let client = super::http_client(timeout)?;

    let token: DockerHubToken = client
        .get(format!(
            "https://auth.docker.io/token?service=registry.docker.io&scope=repository:{}:pull",
            repository
        ))
        .send()
        .await?
        .json()
        .await?;

    let response = client
        .head(format!(
            "https://registry-1.docker.io/v2/{}/manifests/{}",
            repository, tag
        ))
        .bearer_auth(token.token)
        .header("accept", MANIFEST_ACCEPT)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(Error::Backend(format!(
            "manifest lookup for {}:{} returned {}",
            repository,
            tag,
            response.status()
        )));
    }

    response
        .headers()
        .get("docker-content-digest")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| Error::Backend("registry response is missing the content digest".to_string()))
}
