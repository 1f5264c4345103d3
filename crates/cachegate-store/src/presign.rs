//! SigV4 query presigning for S3-compatible requests.
//!
//! Requests are signed with the signature in the query string and an
//! `UNSIGNED-PAYLOAD` body hash, so the HTTP client only has to send the URL.
//! Only the `host` header is signed.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Methods used against the completion store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Maximum presign lifetime (7 days).
const MAX_EXPIRES_SECONDS: u64 = 604_800;

/// Requests are sent immediately, so a short lifetime is enough.
const DEFAULT_EXPIRES_SECONDS: u64 = 300;

const SERVICE: &str = "s3";

/// Presigning failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresignError {
    #[error("Access key is required")]
    MissingAccessKey,
    #[error("Secret key is required")]
    MissingSecretKey,
    #[error("Bucket name is invalid")]
    InvalidBucket,
    #[error("Object key is invalid")]
    InvalidKey,
    #[error("Endpoint URL is invalid: {0}")]
    InvalidEndpoint(String),
}

/// Builder for presigned object URLs.
pub struct PresignedUrlBuilder {
    endpoint: String,
    bucket: String,
    key: String,
    method: HttpMethod,
    expires_seconds: u64,
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    region: String,
    timestamp: Option<DateTime<Utc>>,
}

impl PresignedUrlBuilder {
    pub fn new(endpoint: &str, bucket: &str, key: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            key: key.trim_start_matches('/').to_string(),
            method: HttpMethod::Get,
            expires_seconds: DEFAULT_EXPIRES_SECONDS,
            access_key: String::new(),
            secret_key: String::new(),
            session_token: None,
            region: "us-east-1".to_string(),
            timestamp: None,
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Capped at 7 days.
    pub fn expires_in_seconds(mut self, seconds: u64) -> Self {
        self.expires_seconds = seconds.min(MAX_EXPIRES_SECONDS);
        self
    }

    pub fn access_key(mut self, key: &str) -> Self {
        self.access_key = key.to_string();
        self
    }

    pub fn secret_key(mut self, key: &str) -> Self {
        self.secret_key = key.to_string();
        self
    }

    /// Temporary credentials also carry a session token.
    pub fn session_token(mut self, token: Option<&str>) -> Self {
        self.session_token = token.map(str::to_string);
        self
    }

    pub fn region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    /// Pin the signing time (tests).
    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn build(self) -> Result<String, PresignError> {
        if self.access_key.is_empty() {
            return Err(PresignError::MissingAccessKey);
        }
        if self.secret_key.is_empty() {
            return Err(PresignError::MissingSecretKey);
        }
        if self.bucket.is_empty() || self.bucket.contains('/') {
            return Err(PresignError::InvalidBucket);
        }
        if self.key.is_empty() {
            return Err(PresignError::InvalidKey);
        }
        let host = extract_host(&self.endpoint)?;

        let now = self.timestamp.unwrap_or_else(Utc::now);
        let date_str = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential_scope = format!("{}/{}/{}/aws4_request", date_str, self.region, SERVICE);

        // Path-style addressing
        let encoded_uri = uri_encode_path(&format!("/{}/{}", self.bucket, self.key));

        let mut query_params = BTreeMap::new();
        query_params.insert("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string());
        query_params.insert(
            "X-Amz-Credential".to_string(),
            format!("{}/{}", self.access_key, credential_scope),
        );
        query_params.insert("X-Amz-Date".to_string(), amz_date.clone());
        query_params.insert("X-Amz-Expires".to_string(), self.expires_seconds.to_string());
        if let Some(ref token) = self.session_token {
            query_params.insert("X-Amz-Security-Token".to_string(), token.clone());
        }
        query_params.insert("X-Amz-SignedHeaders".to_string(), "host".to_string());
        let canonical_query_string = build_canonical_query_string(&query_params);

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            self.method.as_str(),
            encoded_uri,
            canonical_query_string,
            host,
        );

        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signature = calculate_signature(&self.secret_key, &date_str, &self.region, &string_to_sign);

        Ok(format!(
            "{}{}?{}&X-Amz-Signature={}",
            self.endpoint, encoded_uri, canonical_query_string, signature
        ))
    }
}

/// URI-encode a path, keeping `/`.
fn uri_encode_path(path: &str) -> String {
    encode(path, true)
}

/// URI-encode a query component.
fn uri_encode_value(value: &str) -> String {
    encode(value, false)
}

fn encode(input: &str, keep_slash: bool) -> String {
    let mut result = String::with_capacity(input.len() * 3);
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(b as char)
            }
            b'/' if keep_slash => result.push('/'),
            _ => {
                let _ = write!(result, "%{:02X}", b);
            }
        }
    }
    result
}

fn build_canonical_query_string(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode_value(k), uri_encode_value(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn calculate_signature(secret_key: &str, date: &str, region: &str, string_to_sign: &str) -> String {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()))
}

/// Host (with port) of a `scheme://host[:port]` endpoint.
fn extract_host(endpoint: &str) -> Result<String, PresignError> {
    let rest = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .ok_or_else(|| PresignError::InvalidEndpoint(endpoint.to_string()))?;

    if rest.is_empty() || rest.contains('/') {
        return Err(PresignError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(rest.to_string())
}
