// src/driver.rs

//! The per-worker daemon loop: repeatedly drain the queue for one crawler
//! identity, sleeping briefly between empty passes, until a shutdown signal
//! arrives or a fatal error is hit.

use crate::context::Context;
use crate::error::CrawlError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Sleep between passes that found nothing eligible to fetch.
const EMPTY_QUEUE_SLEEP: Duration = Duration::from_secs(1);

/// Runs one worker bound to `ctx`'s crawler identity until `shutdown` fires
/// or a fatal queue error terminates it.
pub async fn run_worker(ctx: Arc<Context>, mut shutdown: broadcast::Receiver<()>) {
    info!(crawler_id = ctx.crawler_id(), "worker starting");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!(crawler_id = ctx.crawler_id(), "worker received shutdown signal");
                break;
            }
            result = drain(&ctx) => {
                if let Err(e) = result {
                    error!(crawler_id = ctx.crawler_id(), error = %e, "worker terminating on fatal error");
                    break;
                }
            }
        }
    }
    info!(crawler_id = ctx.crawler_id(), "worker stopped");
}

/// Performs fetches until the queue reports nothing eligible for this
/// crawler identity, then sleeps once before returning control to the
/// caller's cancellation check.
async fn drain(ctx: &Context) -> Result<(), CrawlError> {
    loop {
        match ctx.perform().await {
            Ok(true) => continue,
            Ok(false) => {
                ctx.sample_queue_depth().await;
                tokio::time::sleep(EMPTY_QUEUE_SLEEP).await;
                return Ok(());
            }
            Err(e) => {
                warn!(crawler_id = ctx.crawler_id(), error = %e, "perform failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::{FetchConfig, PolicyConfig, QueueConfig};
    use crate::fetcher::Fetcher;
    use crate::policy::Policy;
    use crate::processor::NullProcessor;
    use crate::queue::{Queue, SqlQueue};
    use tokio::time::timeout;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn worker_stops_on_shutdown_signal() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(
            Fetcher::new(
                Cache::new(dir.path()),
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
        let ctx = Arc::new(Context::new(1, fetcher, queue, Arc::new(NullProcessor)));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_worker(ctx, rx));
        tx.send(()).unwrap();

        timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker should stop promptly after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn worker_fetches_a_queued_uri_before_idling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("HELLO", "text/plain"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(
            Fetcher::new(
                Cache::new(dir.path()),
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
        let uri = format!("{}/a", server.uri());
        queue.add_uristr(&uri).await.unwrap();
        // the seeded next_fetch equals the insertion timestamp; eligibility
        // requires strictly passing that instant.
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let ctx = Arc::new(Context::new(1, fetcher, queue.clone(), Arc::new(NullProcessor)));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_worker(ctx.clone(), rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(ctx.locate(&uri).await.is_some());

        tx.send(()).unwrap();
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
