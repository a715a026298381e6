// src/fetcher.rs

//! One HTTP transaction, driving a cache write transaction under the hood.
//!
//! The decision table in [`Fetcher::fetch`] is the heart of the core: it
//! turns an HTTP outcome into a commit-or-rollback decision against the
//! cache, and into exactly one of three callbacks fired by the caller.

use crate::cache::Cache;
use crate::config::FetchConfig;
use crate::error::CrawlError;
use crate::object::{HeaderValue, Metadata, Object, STATUS_LINE_KEY};
use crate::policy::{Admission, Policy};
use crate::metrics;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// What happened to a fetch attempt that passed the policy gate. Exactly one
/// variant is produced per call to [`Fetcher::fetch`], and the caller is
/// expected to fire the matching callback.
#[derive(Debug)]
pub enum FetchOutcome {
    /// A fresh commit: 2xx, 3xx, 4xx, or 5xx-without-cache. `content_rejected`
    /// is set when the checkpoint policy downgraded the status; the caller
    /// must still fire `updated` but must not invoke the processor.
    Updated { obj: Object, content_rejected: bool },
    /// Nothing was committed: a 304, or a `cache_min` short-circuit.
    Unchanged(Object),
    /// A transport failure, or a 5xx with a prior cache entry.
    Failed(Object, CrawlError),
    /// The URI policy gate skipped this URI outright.
    Skipped(Option<Object>),
}

/// Performs conditional HTTP fetches against a [`Cache`], honouring the
/// configured [`Policy`].
pub struct Fetcher {
    client: Client,
    cache: Cache,
    policy: Policy,
    config: FetchConfig,
    cache_min_secs: i64,
}

impl Fetcher {
    pub fn new(cache: Cache, policy: Policy, config: FetchConfig, cache_min_secs: u64) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.total_timeout_ms))
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CrawlError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            cache,
            policy,
            config,
            cache_min_secs: cache_min_secs as i64,
        })
    }

    /// The cache this fetcher writes through, exposed for callers that need
    /// to `locate` without performing a fetch.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Runs the full fetch algorithm for `uri`.
    pub async fn fetch(&self, uri: &str) -> FetchOutcome {
        let timer = metrics::FETCH_LATENCY_SECONDS.start_timer();
        let outcome = self.fetch_inner(uri).await;
        timer.observe_duration();
        outcome
    }

    async fn fetch_inner(&self, uri: &str) -> FetchOutcome {
        let parsed = match url::Url::parse(uri) {
            Ok(u) => u,
            Err(e) => {
                warn!(uri, error = %e, "rejecting unparseable uri");
                return FetchOutcome::Skipped(None);
            }
        };

        match self.policy.admit_uri(parsed.scheme()) {
            Admission::Skip => {
                debug!(uri, "policy skip");
                let existing = Object::locate(&self.cache, uri).await.ok();
                return FetchOutcome::Skipped(existing);
            }
            Admission::Reject => {
                return FetchOutcome::Failed(
                    Object::for_uri(&self.cache, uri),
                    CrawlError::PolicyRejected(uri.to_string()),
                );
            }
            Admission::Proceed => {}
        }

        let mut object = Object::for_uri(&self.cache, uri);
        let cachetime = match Object::locate(&self.cache, uri).await {
            Ok(existing) => {
                metrics::CACHE_HITS_TOTAL.inc();
                let t = existing.updated;
                object = existing;
                Some(t)
            }
            Err(CrawlError::NotPresent) => {
                metrics::CACHE_MISSES_TOTAL.inc();
                None
            }
            Err(e) => return FetchOutcome::Failed(object, e),
        };

        if let Some(cachetime) = cachetime {
            let age = Utc::now().timestamp() - cachetime;
            if age < self.cache_min_secs {
                return FetchOutcome::Unchanged(object);
            }
        }

        let mut request = self
            .client
            .get(parsed.clone())
            .header(reqwest::header::ACCEPT, &self.config.accept);
        if let Some(cachetime) = cachetime {
            request = request.header(reqwest::header::IF_MODIFIED_SINCE, http_date(cachetime));
        }

        let mut info_file = match self.cache.open_info_write(&object.key).await {
            Ok(f) => f,
            Err(e) => return FetchOutcome::Failed(object, e),
        };
        let mut payload_file = match self.cache.open_payload_write(&object.key).await {
            Ok(f) => f,
            Err(e) => {
                let _ = self.cache.rollback_info(&object.key, info_file).await;
                return FetchOutcome::Failed(object, e);
            }
        };

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                let _ = self.cache.rollback_info(&object.key, info_file).await;
                let _ = self.cache.rollback_payload(&object.key, payload_file).await;
                metrics::FETCHES_TOTAL.with_label_values(&["failed"]).inc();
                return FetchOutcome::Failed(object, e.into());
            }
        };

        let status = response.status();
        let headers = build_headers(status, response.headers());
        let redirect = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                let _ = self.cache.rollback_info(&object.key, info_file).await;
                let _ = self.cache.rollback_payload(&object.key, payload_file).await;
                metrics::FETCHES_TOTAL.with_label_values(&["failed"]).inc();
                return FetchOutcome::Failed(object, e.into());
            }
        };

        if let Err(e) = payload_file.write_all(&body).await {
            let _ = self.cache.rollback_info(&object.key, info_file).await;
            let _ = self.cache.rollback_payload(&object.key, payload_file).await;
            return FetchOutcome::Failed(object, e.into());
        }

        let status_u16 = status.as_u16();
        let had_cache = cachetime.is_some();

        let checkpoint_status = self
            .policy
            .checkpoint(content_type.as_deref().map(bare_media_type).as_deref())
            .unwrap_or(status_u16);
        let content_rejected = checkpoint_status != status_u16;

        let decision = classify(status, had_cache);

        match decision {
            Decision::Commit { is_error } => {
                let metadata = Metadata {
                    status: checkpoint_status,
                    updated: Utc::now().timestamp(),
                    size: body.len() as u64,
                    redirect,
                    content_type,
                    headers,
                };
                let encoded = match serde_json::to_string(&metadata) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = self.cache.rollback_info(&object.key, info_file).await;
                        let _ = self.cache.rollback_payload(&object.key, payload_file).await;
                        return FetchOutcome::Failed(object, e.into());
                    }
                };
                if let Err(e) = info_file.write_all(encoded.as_bytes()).await {
                    let _ = self.cache.rollback_info(&object.key, info_file).await;
                    let _ = self.cache.rollback_payload(&object.key, payload_file).await;
                    return FetchOutcome::Failed(object, e.into());
                }
                if let Err(e) = self.cache.commit_info(&object.key, info_file).await {
                    let _ = self.cache.rollback_payload(&object.key, payload_file).await;
                    return FetchOutcome::Failed(object, e);
                }
                if let Err(e) = self.cache.commit_payload(&object.key, payload_file).await {
                    return FetchOutcome::Failed(object, e);
                }
                object.replace(metadata);
                object.fresh = true;
                if is_error {
                    metrics::FETCHES_TOTAL.with_label_values(&["failed"]).inc();
                    FetchOutcome::Failed(object, CrawlError::Transport(format!("server error {status_u16}")))
                } else {
                    metrics::FETCHES_TOTAL.with_label_values(&["updated"]).inc();
                    FetchOutcome::Updated { obj: object, content_rejected }
                }
            }
            Decision::Rollback { is_error } => {
                let _ = self.cache.rollback_info(&object.key, info_file).await;
                let _ = self.cache.rollback_payload(&object.key, payload_file).await;
                if is_error {
                    metrics::FETCHES_TOTAL.with_label_values(&["failed"]).inc();
                    FetchOutcome::Failed(object, CrawlError::Transport(format!("server error {status_u16}")))
                } else {
                    metrics::FETCHES_TOTAL.with_label_values(&["unchanged"]).inc();
                    FetchOutcome::Unchanged(object)
                }
            }
        }
    }
}

enum Decision {
    Commit { is_error: bool },
    Rollback { is_error: bool },
}

/// The commit/rollback/error decision table from the fetch algorithm.
fn classify(status: StatusCode, had_cache: bool) -> Decision {
    let code = status.as_u16();
    if status == StatusCode::NOT_MODIFIED {
        Decision::Rollback { is_error: false }
    } else if (200..400).contains(&code) {
        Decision::Commit { is_error: false }
    } else if (400..500).contains(&code) {
        Decision::Commit { is_error: false }
    } else if (500..600).contains(&code) {
        if had_cache {
            Decision::Rollback { is_error: false }
        } else {
            Decision::Commit { is_error: true }
        }
    } else {
        Decision::Commit { is_error: false }
    }
}

fn bare_media_type(content_type: &str) -> String {
    content_type.split(';').next().unwrap_or(content_type).trim().to_ascii_lowercase()
}

fn http_date(unix_ts: i64) -> String {
    let dt = Utc.timestamp_opt(unix_ts, 0).single().unwrap_or_else(Utc::now);
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Builds the `headers` metadata dictionary the way the header-capture sink
/// in the original fetch algorithm does: the status line under `":"`, and
/// every response header as an array of string values (repeated headers
/// collapse into one array).
fn build_headers(status: StatusCode, headers: &reqwest::header::HeaderMap) -> HashMap<String, HeaderValue> {
    let mut map = HashMap::new();
    let status_line = format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    map.insert(STATUS_LINE_KEY.to_string(), HeaderValue::StatusLine(status_line));

    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok().map(|s| s.to_string()))
            .collect();
        if !values.is_empty() {
            map.insert(name.as_str().to_string(), HeaderValue::Values(values));
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(cache_dir: &std::path::Path) -> Fetcher {
        Fetcher::new(
            Cache::new(cache_dir),
            Policy::from_config(&PolicyConfig::default()),
            FetchConfig {
                accept: "*/*".to_string(),
                user_agent: "crawlcore-test/0.1".to_string(),
                verbose: false,
                connect_timeout_ms: 5_000,
                total_timeout_ms: 5_000,
            },
            0,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fresh_200_commits_body_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("HELLO", "text/plain")
                    .insert_header("content-type", "text/plain"),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path());
        let uri = format!("{}/a", server.uri());
        let outcome = f.fetch(&uri).await;

        match outcome {
            FetchOutcome::Updated { obj, content_rejected } => {
                assert_eq!(obj.status, 200);
                assert_eq!(obj.size, 5);
                assert_eq!(obj.content_type(), Some("text/plain"));
                assert!(!content_rejected);
            }
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_modified_rolls_back_and_reports_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .and(wiremock::matchers::header_exists("if-modified-since"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let uri = format!("{}/a", server.uri());
        let key = crate::cache::cache_key(&uri);

        let metadata = Metadata {
            status: 200,
            updated: Utc::now().timestamp(),
            size: 0,
            redirect: None,
            content_type: None,
            headers: HashMap::new(),
        };
        let mut info = cache.open_info_write(&key).await.unwrap();
        info.write_all(serde_json::to_string(&metadata).unwrap().as_bytes())
            .await
            .unwrap();
        cache.commit_info(&key, info).await.unwrap();
        let payload = cache.open_payload_write(&key).await.unwrap();
        cache.commit_payload(&key, payload).await.unwrap();

        let f = fetcher(dir.path());
        let outcome = f.fetch(&uri).await;
        assert!(matches!(outcome, FetchOutcome::Unchanged(_)));
    }

    #[tokio::test]
    async fn server_error_without_prior_cache_commits_and_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path());
        let uri = format!("{}/a", server.uri());
        let outcome = f.fetch(&uri).await;

        match outcome {
            FetchOutcome::Failed(obj, _) => assert_eq!(obj.status, 503),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_with_prior_cache_rolls_back_as_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let uri = format!("{}/a", server.uri());
        let key = crate::cache::cache_key(&uri);
        let metadata = Metadata {
            status: 200,
            updated: Utc::now().timestamp(),
            size: 0,
            redirect: None,
            content_type: None,
            headers: HashMap::new(),
        };
        let mut info = cache.open_info_write(&key).await.unwrap();
        info.write_all(serde_json::to_string(&metadata).unwrap().as_bytes())
            .await
            .unwrap();
        cache.commit_info(&key, info).await.unwrap();
        let payload = cache.open_payload_write(&key).await.unwrap();
        cache.commit_payload(&key, payload).await.unwrap();

        let f = fetcher(dir.path());
        match f.fetch(&uri).await {
            FetchOutcome::Unchanged(_) => {}
            other => panic!("expected Unchanged, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn redirect_persists_location_as_redirect_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/b"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path());
        let uri = format!("{}/a", server.uri());
        match f.fetch(&uri).await {
            FetchOutcome::Updated { obj, .. } => assert_eq!(obj.redirect(), Some("/b")),
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blacklisted_content_type_downgrades_status_and_rejects_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(vec![0u8; 4], "image/png")
                    .insert_header("content-type", "image/png"),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut policy_config = PolicyConfig::default();
        policy_config.content_types_blacklist = vec!["image/*".to_string()];
        let f = Fetcher::new(
            Cache::new(dir.path()),
            Policy::from_config(&policy_config),
            FetchConfig {
                accept: "*/*".to_string(),
                user_agent: "crawlcore-test/0.1".to_string(),
                verbose: false,
                connect_timeout_ms: 5_000,
                total_timeout_ms: 5_000,
            },
            0,
        )
        .unwrap();

        let uri = format!("{}/a", server.uri());
        match f.fetch(&uri).await {
            FetchOutcome::Updated { obj, content_rejected } => {
                assert_eq!(obj.status, 406);
                assert!(content_rejected);
            }
            other => panic!("expected Updated, got {other:?}"),
        }
    }
}
