// src/processor.rs

//! The format-dispatch capability: given a fetched [`Object`], discover
//! outbound URIs and enqueue them.

use crate::error::CrawlError;
use crate::object::Object;
use crate::queue::Queue;
use async_trait::async_trait;
use std::sync::Arc;

/// A processor inspects a fetched object's payload and discovers outbound
/// URIs, enqueuing each via the given [`Queue`]. Concrete extractors (RDF,
/// HTML, ...) are not part of this core; only the contract is.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Processes `obj`, fetched from `uri` with the given `content_type`.
    /// May call `queue.add_uristr` for each discovered link. Must not
    /// mutate `obj`.
    async fn process(
        &self,
        obj: &Object,
        uri: &str,
        content_type: Option<&str>,
        queue: &Arc<dyn Queue>,
    ) -> Result<(), CrawlError>;
}

/// A processor that discovers nothing. Useful as a default and in tests
/// that only exercise the fetch/queue pipeline.
#[derive(Debug, Default)]
pub struct NullProcessor;

#[async_trait]
impl Processor for NullProcessor {
    async fn process(
        &self,
        _obj: &Object,
        _uri: &str,
        _content_type: Option<&str>,
        _queue: &Arc<dyn Queue>,
    ) -> Result<(), CrawlError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;

    #[tokio::test]
    async fn null_processor_discovers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let obj = Object::for_uri(&cache, "http://example.com/a");
        let queue: Arc<dyn Queue> = Arc::new(crate::queue::SqlQueue::connect(
            crate::config::QueueConfig {
                db_uri: "sqlite::memory:".to_string(),
                ..crate::config::QueueConfig::default()
            },
        )
        .await
        .unwrap());

        let result = NullProcessor.process(&obj, "http://example.com/a", None, &queue).await;
        assert!(result.is_ok());
    }
}
