//! Minimal AWS Signature Version 4 request signer.
//!
//! Only what the service clients need: POST/GET/PUT/HEAD with a canonical
//! path, an already-canonical query string, and a small set of headers.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::errors::Error;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Credentials resolved from the environment at call time.
///
/// Adapters are re-entrant: nothing caches these between calls.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Result<Self, Error> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::Backend("AWS_ACCESS_KEY_ID is not set".to_string()))?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| Error::Backend("AWS_SECRET_ACCESS_KEY is not set".to_string()))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        Ok(Self {
            access_key,
            secret_key,
            session_token,
        })
    }
}

pub fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// URI-encode a path or query component per the SigV4 rules.
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Sign a request, returning the complete outgoing header list
/// (including `authorization`, `host`, and `x-amz-date`).
///
/// `extra_headers` are included in the signature; keys must be lowercase.
/// `canonical_query` must already be sorted and encoded.
#[allow(clippy::too_many_arguments)]
pub fn sign(
    creds: &Credentials,
    method: &str,
    host: &str,
    path: &str,
    canonical_query: &str,
    extra_headers: &[(String, String)],
    payload: &[u8],
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload_hash = hex_sha256(payload);

    let mut headers: Vec<(String, String)> = extra_headers.to_vec();
    headers.push(("host".to_string(), host.to_string()));
    headers.push(("x-amz-date".to_string(), amz_date.clone()));
    if let Some(token) = &creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();
    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, path, canonical_query, canonical_headers, signed_headers, payload_hash
    );

    let scope = format!("{}/{}/{}/aws4_request", date, region, service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let k_date = hmac_sha256(format!("AWS4{}", creds.secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, creds.access_key, scope, signed_headers, signature
    );
    headers.push(("authorization".to_string(), authorization));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_credentials() -> Credentials {
        Credentials {
            access_key: "AKIDEXAMPLE".to_string(),
            secret_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        }
    }

    // Known-answer vector from the AWS SigV4 documentation
    // (GET iam.amazonaws.com ListUsers, 2015-08-30T12:36:00Z).
    #[test]
    fn test_known_answer_signature() {
        let now = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();
        let headers = sign(
            &test_credentials(),
            "GET",
            "iam.amazonaws.com",
            "/",
            "Action=ListUsers&Version=2010-05-08",
            &[(
                "content-type".to_string(),
                "application/x-www-form-urlencoded; charset=utf-8".to_string(),
            )],
            b"",
            "us-east-1",
            "iam",
            now,
        );

        let authorization = headers
            .iter()
            .find(|(k, _)| k == "authorization")
            .map(|(_, v)| v.clone())
            .expect("authorization header");

        assert!(authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/iam/aws4_request"
        ));
        assert!(authorization.contains("SignedHeaders=content-type;host;x-amz-date"));
        assert!(authorization.ends_with(
            "Signature=5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
        ));
    }

    #[test]
    fn test_sign_includes_host_and_date_headers() {
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let headers = sign(
            &test_credentials(),
            "POST",
            "batch.us-east-1.amazonaws.com",
            "/v1/submitjob",
            "",
            &[("content-type".to_string(), "application/json".to_string())],
            b"{}",
            "us-east-1",
            "batch",
            now,
        );
        assert!(headers.iter().any(|(k, v)| k == "host" && v == "batch.us-east-1.amazonaws.com"));
        assert!(headers.iter().any(|(k, v)| k == "x-amz-date" && v == "20200101T000000Z"));
    }

    #[test]
    fn test_session_token_is_signed() {
        let creds = Credentials {
            session_token: Some("FwoGZXIvYXdzEBc".to_string()),
            ..test_credentials()
        };
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let headers = sign(&creds, "GET", "s3.us-east-1.amazonaws.com", "/", "", &[], b"", "us-east-1", "s3", now);
        let authorization = &headers.iter().find(|(k, _)| k == "authorization").unwrap().1;
        assert!(headers.iter().any(|(k, _)| k == "x-amz-security-token"));
        assert!(authorization.contains("x-amz-security-token"));
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("results/abc 1.json", false), "results/abc%201.json");
        assert_eq!(uri_encode("a/b", true), "a%2Fb");
        assert_eq!(uri_encode("AZaz09-._~", true), "AZaz09-._~");
    }

    #[test]
    fn test_hex_sha256_empty_payload() {
        assert_eq!(
            hex_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
