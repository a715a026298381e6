// src/context.rs

//! Per-worker state: identity, fetcher handle, queue handle, processor
//! handle. One [`Context`] is owned exclusively by one worker; it is never
//! shared between two concurrent `perform` calls.

use crate::error::CrawlError;
use crate::fetcher::{Fetcher, FetchOutcome};
use crate::metrics;
use crate::object::Object;
use crate::processor::Processor;
use crate::queue::Queue;
use std::sync::Arc;
use tracing::{error, warn};
use url::Url;

/// TTL, in seconds, passed to `queue.updated` for every successful commit.
/// The call site always uses this fixed value regardless of the response's
/// actual cache-control headers; the queue itself floors it further per
/// outcome class.
const UPDATED_CALLBACK_TTL_SECS: i64 = 3600;

/// Binds one crawler identity to its fetcher, queue, and processor.
pub struct Context {
    crawler_id: u32,
    fetcher: Arc<Fetcher>,
    queue: Arc<dyn Queue>,
    processor: Arc<dyn Processor>,
}

impl Context {
    pub fn new(crawler_id: u32, fetcher: Arc<Fetcher>, queue: Arc<dyn Queue>, processor: Arc<dyn Processor>) -> Self {
        Self { crawler_id, fetcher, queue, processor }
    }

    pub fn crawler_id(&self) -> u32 {
        self.crawler_id
    }

    /// Reads an existing cache entry without performing any HTTP.
    pub async fn locate(&self, uri: &str) -> Option<Object> {
        Object::locate(self.fetcher.cache(), uri).await.ok()
    }

    /// Performs the full fetch pipeline for `uri` and fires whichever of
    /// `updated`/`unchanged`/`failed` applies, recording the outcome back
    /// into the queue. Returns the resulting Object, if any.
    pub async fn fetch(&self, uri: &str) -> Option<Object> {
        match self.fetcher.fetch(uri).await {
            FetchOutcome::Updated { obj, content_rejected } => {
                self.on_updated(&obj, content_rejected).await;
                Some(obj)
            }
            FetchOutcome::Unchanged(obj) => {
                self.on_unchanged(&obj).await;
                Some(obj)
            }
            FetchOutcome::Failed(obj, err) => {
                self.on_failed(&obj, &err).await;
                None
            }
            FetchOutcome::Skipped(obj) => obj,
        }
    }

    async fn on_updated(&self, obj: &Object, content_rejected: bool) {
        let is_redirect_or_success = (200..400).contains(&obj.status);
        if is_redirect_or_success && !content_rejected {
            if let Some(location) = obj.redirect() {
                match Url::parse(&obj.uri).and_then(|base| base.join(location)) {
                    Ok(resolved) => {
                        let resolved = resolved.to_string();
                        if resolved != obj.uri {
                            if let Err(e) = self.queue.add_uristr(&resolved).await {
                                warn!(uri = %obj.uri, location, error = %e, "failed to enqueue redirect target");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(uri = %obj.uri, location, error = %e, "failed to resolve redirect target");
                    }
                }
            }
            if let Err(e) = self.processor.process(obj, &obj.uri, obj.content_type(), &self.queue).await {
                warn!(uri = %obj.uri, error = %e, "processor returned an error");
            }
        }

        if let Err(e) = self
            .queue
            .updated(&obj.uri, obj.updated, Some(obj.updated), obj.status, UPDATED_CALLBACK_TTL_SECS)
            .await
        {
            self.report_queue_failure(e);
        }
    }

    async fn on_unchanged(&self, obj: &Object) {
        if let Err(e) = self.queue.unchanged(&obj.uri, false).await {
            self.report_queue_failure(e);
        }
    }

    async fn on_failed(&self, obj: &Object, fetch_err: &CrawlError) {
        warn!(uri = %obj.uri, error = %fetch_err, "fetch failed");
        if let Err(e) = self.queue.unchanged(&obj.uri, true).await {
            self.report_queue_failure(e);
        }
    }

    fn report_queue_failure(&self, err: CrawlError) {
        match err {
            CrawlError::QueueRetryExhausted { .. } => {
                error!(error = %err, "queue write failed after exhausting retries");
            }
            other => error!(error = %other, "queue write failed"),
        }
    }

    /// One iteration: asks the queue for the next eligible URI for this
    /// crawler identity and fetches it. Returns `Ok(false)` when nothing is
    /// eligible right now.
    pub async fn perform(&self) -> Result<bool, CrawlError> {
        match self.queue.next(self.crawler_id).await? {
            Some(uri) => {
                self.fetch(&uri).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Samples the current eligible-queue depth for this crawler identity
    /// into the `crawl_queue_depth` gauge. Called by the driver between
    /// drain passes, never on the hot fetch path.
    pub async fn sample_queue_depth(&self) {
        match self.queue.depth(self.crawler_id).await {
            Ok(depth) => metrics::QUEUE_DEPTH.set(depth as f64),
            Err(e) => warn!(error = %e, "failed to sample queue depth"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::{FetchConfig, PolicyConfig, QueueConfig};
    use crate::policy::Policy;
    use crate::processor::NullProcessor;
    use crate::queue::SqlQueue;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn context(cache_dir: &std::path::Path) -> (Context, Arc<dyn Queue>) {
        let fetcher = Arc::new(
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
            .unwrap(),
        );
        let queue: Arc<dyn Queue> = Arc::new(
            SqlQueue::connect(QueueConfig {
                db_uri: "sqlite::memory:".to_string(),
                ..QueueConfig::default()
            })
            .await
            .unwrap(),
        );
        let ctx = Context::new(1, fetcher, queue.clone(), Arc::new(NullProcessor));
        (ctx, queue)
    }

    #[tokio::test]
    async fn perform_on_empty_queue_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _queue) = context(dir.path()).await;
        assert_eq!(ctx.perform().await.unwrap(), false);
    }

    #[tokio::test]
    async fn perform_fetches_next_uri_and_reschedules() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("HELLO", "text/plain"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (ctx, queue) = context(dir.path()).await;
        let uri = format!("{}/a", server.uri());
        queue.add_uristr(&uri).await.unwrap();
        // a freshly added resource's `next_fetch` is the insertion timestamp
        // itself, and eligibility requires strictly passing that instant.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        assert_eq!(ctx.perform().await.unwrap(), true);
        // The resource is now rescheduled into the future, so a second
        // immediate call finds nothing eligible.
        assert_eq!(ctx.perform().await.unwrap(), false);
    }

    #[tokio::test]
    async fn relative_redirect_target_is_resolved_against_the_request_uri_before_enqueue() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/b"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (ctx, queue) = context(dir.path()).await;
        let uri = format!("{}/a", server.uri());
        queue.add_uristr(&uri).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        assert_eq!(ctx.perform().await.unwrap(), true);

        let expected_target = format!("{}/b", server.uri());
        assert!(
            ctx.locate(&expected_target).await.is_none(),
            "locate only reads the cache; the enqueued target hasn't been fetched yet"
        );
        // The redirect target was resolved to an absolute URI and handed to
        // the queue, not dropped for failing to parse as one on its own.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert_eq!(ctx.perform().await.unwrap(), true, "the resolved redirect target should now be eligible");
    }
}
