//! S3-compatible HTTPS backend
//!
//! Each request is presigned (SigV4) and sent with a blocking `ureq` agent.
//! Transient failures are retried with capped exponential backoff; every
//! other outcome is returned to the caller on the first attempt.

use std::env;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::{ObjectStore, ProbeTarget};
use crate::presign::{HttpMethod, PresignedUrlBuilder};
use crate::StoreError;

/// Transport retry budget for transient faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 20,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Bucket location and client behaviour.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// `scheme://host[:port]`, path-style addressing
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    /// Per-request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Signing credentials.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Credentials {
    /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self, StoreError> {
        let access_key_id = env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| StoreError::Config("AWS_ACCESS_KEY_ID is not set".to_string()))?;
        let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| StoreError::Config("AWS_SECRET_ACCESS_KEY is not set".to_string()))?;
        let session_token = env::var("AWS_SESSION_TOKEN").ok().filter(|t| !t.is_empty());

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Object store client for an S3-compatible bucket.
pub struct S3Store {
    agent: ureq::Agent,
    config: S3Config,
    credentials: Credentials,
}

impl S3Store {
    pub fn new(config: S3Config, credentials: Credentials) -> Self {
        // Non-2xx statuses are classified by us, not turned into ureq errors
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            agent,
            config,
            credentials,
        }
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    fn presign(&self, method: HttpMethod, key: &str) -> Result<String, StoreError> {
        PresignedUrlBuilder::new(&self.config.endpoint, &self.config.bucket, key)
            .method(method)
            .region(&self.config.region)
            .access_key(&self.credentials.access_key_id)
            .secret_key(&self.credentials.secret_access_key)
            .session_token(self.credentials.session_token.as_deref())
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))
    }

    fn send_once(&self, method: HttpMethod, url: &str, key: &str) -> Result<(), StoreError> {
        let response = match method {
            HttpMethod::Get => self.agent.get(url).call(),
            HttpMethod::Head => self.agent.head(url).call(),
            HttpMethod::Put => self.agent.put(url).send_empty(),
            HttpMethod::Delete => self.agent.delete(url).call(),
        };

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..300).contains(&status) {
                    Ok(())
                } else {
                    Err(StoreError::from_status(key, status))
                }
            }
            Err(e) => Err(transport_error(key, e)),
        }
    }

    /// Send with retries. `signed == false` sends `target` verbatim.
    fn send(&self, method: HttpMethod, target: &str, signed: bool) -> Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            // Re-sign each attempt so long backoffs never outlive the signature
            let url = if signed {
                self.presign(method, target)?
            } else {
                target.to_string()
            };

            match self.send_once(method, &url, target) {
                Err(err) if err.is_transient() && attempt < self.config.retry.max_retries => {
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(
                        method = method.as_str(),
                        target,
                        attempt = attempt + 1,
                        max_retries = self.config.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying store request"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                result => {
                    debug!(method = method.as_str(), target, ok = result.is_ok(), "store request");
                    return result;
                }
            }
        }
    }
}

/// Network faults are transient. Client-side failures (bad URI, TLS or
/// proxy setup) are `Other` and never retried.
fn transport_error(key: &str, err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::Timeout(_)
        | ureq::Error::Io(_)
        | ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound => StoreError::Transient {
            key: key.to_string(),
            message: err.to_string(),
        },
        other => StoreError::Other {
            key: key.to_string(),
            status: None,
            message: other.to_string(),
        },
    }
}

impl ObjectStore for S3Store {
    fn head(&self, key: &str) -> Result<(), StoreError> {
        self.send(HttpMethod::Head, key, true)
    }

    fn put_empty(&self, key: &str) -> Result<(), StoreError> {
        self.send(HttpMethod::Put, key, true)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.send(HttpMethod::Delete, key, true) {
            Err(StoreError::NotFound { .. }) => Ok(()),
            other => other,
        }
    }

    fn probe(&self, target: &ProbeTarget) -> Result<(), StoreError> {
        match target {
            ProbeTarget::Key(key) => self.send(HttpMethod::Head, key, true),
            ProbeTarget::Url(url) => self.send(HttpMethod::Get, url, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    const KEY: &str = "digest/acme/engine/abc/cpu/complete";

    /// One-request-per-connection HTTP server answering with `statuses`
    /// in order. Request lines are recorded before each response is sent.
    struct CannedServer {
        endpoint: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl CannedServer {
        fn start(statuses: &[u16]) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let endpoint = format!("http://{}", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&requests);
            let statuses = statuses.to_vec();

            thread::spawn(move || {
                for status in statuses {
                    let Ok((mut stream, _)) = listener.accept() else {
                        return;
                    };
                    let mut reader = BufReader::new(stream.try_clone().unwrap());
                    let mut request_line = String::new();
                    reader.read_line(&mut request_line).unwrap();
                    loop {
                        let mut header = String::new();
                        if reader.read_line(&mut header).unwrap_or(0) == 0 || header == "\r\n" {
                            break;
                        }
                    }
                    seen.lock().unwrap().push(request_line.trim_end().to_string());
                    write!(
                        stream,
                        "HTTP/1.1 {} Canned\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        status
                    )
                    .unwrap();
                }
            });

            Self { endpoint, requests }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        }
    }

    fn store(endpoint: &str, max_retries: u32) -> S3Store {
        S3Store::new(
            S3Config {
                endpoint: endpoint.to_string(),
                bucket: "ci-cache".to_string(),
                region: "us-east-1".to_string(),
                timeout: Duration::from_secs(5),
                retry: RetryPolicy {
                    max_retries,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                },
            },
            credentials(),
        )
    }

    #[test]
    fn test_transient_status_retried_until_success() {
        let server = CannedServer::start(&[503, 200]);

        store(&server.endpoint, 3).head(KEY).unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        for line in &requests {
            assert!(line.starts_with(&format!("HEAD /ci-cache/{}?", KEY)), "{}", line);
            assert!(line.contains("X-Amz-Signature="), "{}", line);
        }
    }

    #[test]
    fn test_retry_budget_bounds_attempts() {
        let server = CannedServer::start(&[500, 500, 500, 500]);

        let err = store(&server.endpoint, 2).head(KEY).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(server.requests().len(), 3);
    }

    #[test]
    fn test_missing_object_is_not_found_without_retry() {
        let server = CannedServer::start(&[404, 200]);

        let err = store(&server.endpoint, 5).head(KEY).unwrap_err();
        assert_eq!(err, StoreError::NotFound { key: KEY.to_string() });
        assert_eq!(server.requests().len(), 1);
    }

    #[test]
    fn test_forbidden_is_not_retried() {
        let server = CannedServer::start(&[403, 200]);

        let err = store(&server.endpoint, 5).head(KEY).unwrap_err();
        assert_eq!(err, StoreError::Forbidden { key: KEY.to_string() });
        assert_eq!(server.requests().len(), 1);
    }

    #[test]
    fn test_client_error_status_is_other() {
        let server = CannedServer::start(&[400, 200]);

        let err = store(&server.endpoint, 5).head(KEY).unwrap_err();
        assert!(matches!(err, StoreError::Other { status: Some(400), .. }));
        assert_eq!(server.requests().len(), 1);
    }

    #[test]
    fn test_put_writes_marker() {
        let server = CannedServer::start(&[200]);

        store(&server.endpoint, 0).put_empty(KEY).unwrap();
        assert!(server.requests()[0].starts_with(&format!("PUT /ci-cache/{}?", KEY)));
    }

    #[test]
    fn test_delete_of_missing_object_succeeds() {
        let server = CannedServer::start(&[404]);

        store(&server.endpoint, 0).delete(KEY).unwrap();
        assert!(server.requests()[0].starts_with("DELETE "));
    }

    #[test]
    fn test_url_target_is_unsigned_get() {
        let server = CannedServer::start(&[404]);
        let url = format!("{}/health", server.endpoint);

        let err = store(&server.endpoint, 0).probe(&ProbeTarget::Url(url.clone())).unwrap_err();
        assert_eq!(err, StoreError::NotFound { key: url });
        assert_eq!(server.requests(), vec!["GET /health HTTP/1.1".to_string()]);
    }

    #[test]
    fn test_malformed_url_fails_fast_as_other() {
        let store = S3Store::new(
            S3Config {
                endpoint: "http://127.0.0.1:9".to_string(),
                bucket: "ci-cache".to_string(),
                region: "us-east-1".to_string(),
                timeout: Duration::from_secs(1),
                retry: RetryPolicy {
                    max_retries: 3,
                    base_delay: Duration::from_secs(1),
                    max_delay: Duration::from_secs(1),
                },
            },
            credentials(),
        );

        let started = Instant::now();
        let err = store
            .probe(&ProbeTarget::Url("not a url at all".to_string()))
            .unwrap_err();

        assert!(matches!(err, StoreError::Other { status: None, .. }), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(19), Duration::from_secs(10));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_default_retry_budget() {
        assert_eq!(RetryPolicy::default().max_retries, 20);
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials {
            access_key_id: "AKID".to_string(),
            secret_access_key: "super-secret".to_string(),
            session_token: Some("token".to_string()),
        };
        let rendered = format!("{:?}", creds);

        assert!(rendered.contains("AKID"));
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("token\""));
    }

    #[test]
    fn test_presign_errors_are_config_errors() {
        let store = S3Store::new(
            S3Config {
                endpoint: "not-a-url".to_string(),
                bucket: "bucket".to_string(),
                region: "us-east-1".to_string(),
                timeout: Duration::from_secs(1),
                retry: RetryPolicy::none(),
            },
            Credentials {
                access_key_id: "a".to_string(),
                secret_access_key: "s".to_string(),
                session_token: None,
            },
        );

        let err = store.head("digest/k/complete").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
