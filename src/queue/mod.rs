// src/queue/mod.rs

//! The persistent, shared queue: two tables (`crawl_root`, `crawl_resource`)
//! sharded by hash into crawl/cache buckets, with per-root rate limiting and
//! per-resource backoff.
//!
//! Connects through `sqlx`'s runtime-selected `Any` driver so the same core
//! runs against the SQLite file used by the test-suite and local
//! development, or a MySQL/Postgres-family server in production, per the
//! `db:uri` contract.

pub mod scheduling;
mod schema;

use crate::cache::key::{bucket_of, cache_key, short_key};
use crate::config::QueueConfig;
use crate::error::CrawlError;
use crate::metrics;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::any::{Any, AnyPoolOptions};
use sqlx::error::DatabaseError;
use sqlx::{AnyConnection, Pool, Row};
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use url::Url;

static DRIVERS_INSTALLED: OnceLock<()> = OnceLock::new();

fn ensure_drivers_installed() {
    DRIVERS_INSTALLED.get_or_init(|| {
        sqlx::any::install_default_drivers();
    });
}

fn now() -> i64 {
    Utc::now().timestamp()
}

/// The capability surface the driver and processor need from the queue.
/// Modelled as a trait so a test double can stand in for the real store.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Returns the highest-priority eligible URI for `crawler_id`, or `None`
    /// if nothing is eligible right now.
    async fn next(&self, crawler_id: u32) -> Result<Option<String>, CrawlError>;

    /// Ensures `uri` and its root are present in the queue, creating or
    /// re-bucketing as needed.
    async fn add_uristr(&self, uri: &str) -> Result<(), CrawlError>;

    /// Records a fetch outcome that produced (or confirmed) a concrete
    /// status, and schedules the next attempt.
    async fn updated(
        &self,
        uri: &str,
        updated_ts: i64,
        last_modified_ts: Option<i64>,
        status: u16,
        ttl_secs: i64,
    ) -> Result<(), CrawlError>;

    /// Records a lighter-weight outcome where nothing was committed: a 304
    /// (`was_failure = false`) or a rollback/transport failure
    /// (`was_failure = true`).
    async fn unchanged(&self, uri: &str, was_failure: bool) -> Result<(), CrawlError>;

    /// Counts resources currently eligible for fetch by `crawler_id`, for
    /// metrics sampling. Not used in the hot fetch path.
    async fn depth(&self, crawler_id: u32) -> Result<u64, CrawlError>;
}

/// A `Queue` backed by a relational store reached through `sqlx::Any`.
pub struct SqlQueue {
    pool: Pool<Any>,
    config: QueueConfig,
    crawlercount: u32,
    cachecount: u32,
}

impl SqlQueue {
    /// Connects to `config.db_uri` and ensures the schema exists. Bucket
    /// widths default to 1 (single-instance); call
    /// [`SqlQueue::with_partition_widths`] for a multi-instance deployment.
    pub async fn connect(config: QueueConfig) -> Result<Self, CrawlError> {
        ensure_drivers_installed();
        let pool = AnyPoolOptions::new()
            .max_connections(16)
            .connect(&config.db_uri)
            .await?;
        let queue = Self {
            pool,
            config,
            crawlercount: 1,
            cachecount: 1,
        };
        queue.init_schema().await?;
        Ok(queue)
    }

    async fn init_schema(&self) -> Result<(), CrawlError> {
        sqlx::query(schema::CREATE_ROOT_TABLE).execute(&self.pool).await?;
        sqlx::query(schema::CREATE_RESOURCE_TABLE).execute(&self.pool).await?;
        info!("queue schema ready");
        Ok(())
    }

    /// Classifies a `sqlx::Error` as transient (deadlock-shaped, worth
    /// retrying) or not.
    fn is_retryable(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db_err) => {
                // MySQL 1213 (deadlock) / 1205 (lock wait timeout); Postgres 40001/40P01.
                matches!(
                    db_err.code().as_deref(),
                    Some("1213") | Some("1205") | Some("40001") | Some("40P01")
                )
            }
            _ => false,
        }
    }

    /// Runs `op` inside a transaction, retrying on a classified-transient
    /// failure up to `config.deadlock_retries` times.
    async fn with_retry<F, Fut, T>(&self, op: F) -> Result<T, CrawlError>
    where
        F: Fn(Pool<Any>) -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match op(self.pool.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if Self::is_retryable(&e) && attempts < self.config.deadlock_retries => {
                    metrics::QUEUE_RETRIES_TOTAL.inc();
                    warn!(attempt = attempts, error = %e, "retrying transient queue failure");
                    continue;
                }
                Err(e) if Self::is_retryable(&e) => {
                    return Err(CrawlError::QueueRetryExhausted {
                        attempts,
                        source_msg: e.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Upserts the root row, run on the *same connection* as the caller's
    /// transaction so it is never racing a concurrent `crawl_resource`
    /// write made under a different connection.
    async fn ensure_root(conn: &mut AnyConnection, root_hash: &str, root_uri: &str, rate_ms: i64) -> Result<(), sqlx::Error> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM crawl_root WHERE hash = ?")
            .bind(root_hash)
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_none() {
            let ts = now();
            sqlx::query(
                "INSERT INTO crawl_root (hash, uri, added, last_updated, earliest_update, rate_ms) \
                 VALUES (?, ?, ?, NULL, 0, ?)",
            )
            .bind(root_hash)
            .bind(root_uri)
            .bind(ts)
            .bind(rate_ms)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Queue for SqlQueue {
    async fn next(&self, crawler_id: u32) -> Result<Option<String>, CrawlError> {
        let crawler_id = crawler_id as i64;
        let ts = now();
        let row = self
            .with_retry(move |pool| async move {
                sqlx::query(
                    "SELECT r.hash AS hash, r.uri AS uri FROM crawl_resource r \
                     JOIN crawl_root root ON r.root = root.hash \
                     WHERE r.crawl_bucket = ? AND root.earliest_update < ? AND r.next_fetch < ? \
                     ORDER BY root.earliest_update ASC, r.next_fetch ASC LIMIT 1",
                )
                .bind(crawler_id)
                .bind(ts)
                .bind(ts)
                .fetch_optional(&pool)
                .await
            })
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let hash: String = row.try_get("hash")?;
        let uri: String = row.try_get("uri")?;

        sqlx::query("UPDATE crawl_resource SET crawl_instance = ? WHERE hash = ?")
            .bind(crawler_id)
            .bind(&hash)
            .execute(&self.pool)
            .await?;

        Ok(Some(uri))
    }

    async fn depth(&self, crawler_id: u32) -> Result<u64, CrawlError> {
        let crawler_id = crawler_id as i64;
        let ts = now();
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM crawl_resource r \
             JOIN crawl_root root ON r.root = root.hash \
             WHERE r.crawl_bucket = ? AND root.earliest_update < ? AND r.next_fetch < ?",
        )
        .bind(crawler_id)
        .bind(ts)
        .bind(ts)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn add_uristr(&self, uri: &str) -> Result<(), CrawlError> {
        let parsed = Url::parse(uri).map_err(|e| CrawlError::InvalidUri(uri.to_string(), e.to_string()))?;
        let canonical = parsed.to_string();
        let key = cache_key(&canonical);
        let short = short_key(&key);
        let crawl_bucket = bucket_of(short, self.config_crawlercount());
        let cache_bucket = bucket_of(short, self.config_cachecount());
        let root = scheduling::root_uri(&parsed)?;
        let root_hash = cache_key(&root);
        let rate_ms = self.config.default_root_rate_ms;

        self.with_retry(move |pool| {
            let canonical = canonical.clone();
            let key = key.clone();
            let root = root.clone();
            let root_hash = root_hash.clone();
            async move {
                let mut tx = pool.begin().await?;
                Self::ensure_root(&mut *tx, &root_hash, &root, rate_ms).await?;

                let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM crawl_resource WHERE hash = ?")
                    .bind(&key)
                    .fetch_optional(&mut *tx)
                    .await?;

                if exists.is_some() {
                    sqlx::query("UPDATE crawl_resource SET crawl_bucket = ?, cache_bucket = ? WHERE hash = ?")
                        .bind(crawl_bucket as i64)
                        .bind(cache_bucket as i64)
                        .bind(&key)
                        .execute(&mut *tx)
                        .await?;
                } else {
                    let ts = now();
                    sqlx::query(
                        "INSERT INTO crawl_resource \
                         (hash, shorthash, crawl_bucket, cache_bucket, crawl_instance, root, added, \
                          updated, last_modified, status, uri, next_fetch, error_count, soft_error_count, last_ttl) \
                         VALUES (?, ?, ?, ?, NULL, ?, ?, NULL, NULL, NULL, ?, ?, 0, 0, NULL)",
                    )
                    .bind(&key)
                    .bind(short as i64)
                    .bind(crawl_bucket as i64)
                    .bind(cache_bucket as i64)
                    .bind(&root_hash)
                    .bind(ts)
                    .bind(&canonical)
                    .bind(ts)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await?;
                Ok(())
            }
        })
        .await?;

        debug!(uri = %uri, crawl_bucket, cache_bucket, "queued uri");
        Ok(())
    }

    async fn updated(
        &self,
        uri: &str,
        updated_ts: i64,
        last_modified_ts: Option<i64>,
        status: u16,
        ttl_secs: i64,
    ) -> Result<(), CrawlError> {
        let key = cache_key(uri);
        let ttl = scheduling::floor_ttl(status, ttl_secs, self.config.ttl_2xx_secs, self.config.ttl_other_secs);
        let next_fetch = updated_ts + ttl;
        let rate_ms = self.config.default_root_rate_ms;

        self.with_retry(move |pool| {
            let key = key.clone();
            async move {
                let mut tx = pool.begin().await?;
                let row = sqlx::query("SELECT error_count, soft_error_count, root FROM crawl_resource WHERE hash = ?")
                    .bind(&key)
                    .fetch_optional(&mut *tx)
                    .await?;
                let Some(row) = row else {
                    tx.commit().await?;
                    return Ok(());
                };
                let error_count: i64 = row.try_get("error_count")?;
                let soft_error_count: i64 = row.try_get("soft_error_count")?;
                let root_hash: String = row.try_get("root")?;
                let (error_count, soft_error_count) =
                    scheduling::next_error_counts(status, error_count, soft_error_count);

                sqlx::query(
                    "UPDATE crawl_resource SET status = ?, updated = ?, last_modified = ?, \
                     next_fetch = ?, error_count = ?, soft_error_count = ?, last_ttl = ?, crawl_instance = NULL \
                     WHERE hash = ?",
                )
                .bind(status as i64)
                .bind(updated_ts)
                .bind(last_modified_ts)
                .bind(next_fetch)
                .bind(error_count)
                .bind(soft_error_count)
                .bind(ttl)
                .bind(&key)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "UPDATE crawl_root SET earliest_update = ?, last_updated = ? WHERE hash = ?",
                )
                .bind(updated_ts + rate_ms / 1000)
                .bind(updated_ts)
                .bind(&root_hash)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok(())
            }
        })
        .await?;

        Ok(())
    }

    async fn unchanged(&self, uri: &str, was_failure: bool) -> Result<(), CrawlError> {
        let key = cache_key(uri);
        let ttl_2xx = self.config.ttl_2xx_secs;
        let ttl_other = self.config.ttl_other_secs;
        let rate_ms = self.config.default_root_rate_ms;
        let ts = now();

        self.with_retry(move |pool| {
            let key = key.clone();
            async move {
                let mut tx = pool.begin().await?;
                let row = sqlx::query("SELECT error_count, soft_error_count, root FROM crawl_resource WHERE hash = ?")
                    .bind(&key)
                    .fetch_optional(&mut *tx)
                    .await?;
                let Some(row) = row else {
                    tx.commit().await?;
                    return Ok(());
                };
                let error_count: i64 = row.try_get("error_count")?;
                let soft_error_count: i64 = row.try_get("soft_error_count")?;
                let root_hash: String = row.try_get("root")?;
                let (error_count, soft_error_count) =
                    scheduling::unchanged_error_counts(was_failure, error_count, soft_error_count);
                let ttl = if was_failure { ttl_other } else { ttl_2xx };
                let next_fetch = ts + ttl;

                sqlx::query(
                    "UPDATE crawl_resource SET next_fetch = ?, error_count = ?, soft_error_count = ?, \
                     last_ttl = ?, crawl_instance = NULL WHERE hash = ?",
                )
                .bind(next_fetch)
                .bind(error_count)
                .bind(soft_error_count)
                .bind(ttl)
                .bind(&key)
                .execute(&mut *tx)
                .await?;

                sqlx::query("UPDATE crawl_root SET earliest_update = ? WHERE hash = ?")
                    .bind(ts + rate_ms / 1000)
                    .bind(&root_hash)
                    .execute(&mut *tx)
                    .await?;

                tx.commit().await?;
                Ok(())
            }
        })
        .await?;

        Ok(())
    }
}

impl SqlQueue {
    fn config_crawlercount(&self) -> u32 {
        // Exposed as a method (rather than a field read) so a future
        // dynamic-resize mechanism can hook in without changing callers.
        self.crawlercount
    }
    fn config_cachecount(&self) -> u32 {
        self.cachecount
    }
}

// The bucket widths are read from the instance config at construction time
// and stored directly on the queue so `add_uristr` doesn't need to thread a
// second config type through every call.
impl SqlQueue {
    pub fn with_partition_widths(mut self, crawlercount: u32, cachecount: u32) -> Self {
        self.crawlercount = crawlercount;
        self.cachecount = cachecount;
        self
    }
}
