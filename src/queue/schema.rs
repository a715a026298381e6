// src/queue/schema.rs

//! The two-table queue schema. Applied idempotently with `CREATE TABLE IF
//! NOT EXISTS` on startup, per the core's scope: a full migration engine is
//! out of scope here and owned by the queue-hosting deployment instead.

pub const CREATE_ROOT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS crawl_root (
    hash VARCHAR(64) PRIMARY KEY,
    uri TEXT NOT NULL,
    added BIGINT NOT NULL,
    last_updated BIGINT,
    earliest_update BIGINT NOT NULL,
    rate_ms BIGINT NOT NULL
)
"#;

pub const CREATE_RESOURCE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS crawl_resource (
    hash VARCHAR(64) PRIMARY KEY,
    shorthash BIGINT NOT NULL,
    crawl_bucket INTEGER NOT NULL,
    cache_bucket INTEGER NOT NULL,
    crawl_instance INTEGER,
    root VARCHAR(64) NOT NULL,
    added BIGINT NOT NULL,
    updated BIGINT,
    last_modified BIGINT,
    status INTEGER,
    uri TEXT NOT NULL,
    next_fetch BIGINT NOT NULL,
    error_count INTEGER NOT NULL DEFAULT 0,
    soft_error_count INTEGER NOT NULL DEFAULT 0,
    last_ttl BIGINT
)
"#;
