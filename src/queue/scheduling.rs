// src/queue/scheduling.rs

//! Pure scheduling-policy helpers, kept free of any database dependency so
//! they can be exercised directly: TTL flooring, the error-count state
//! machine, and root-uri derivation.

use crate::error::CrawlError;
use url::Url;

/// Derives the rate-limiting root for a URI: scheme + authority, path
/// replaced with `/`.
pub fn root_uri(uri: &Url) -> Result<String, CrawlError> {
    let mut root = uri.clone();
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);
    Ok(root.to_string())
}

/// Floors a caller-supplied TTL to the configured minimum for the outcome
/// class, per the table in the fetch pipeline design: 2xx outcomes floor to
/// `ttl_2xx_secs`, everything else floors to `ttl_other_secs`.
pub fn floor_ttl(status: u16, requested_ttl_secs: i64, ttl_2xx_secs: i64, ttl_other_secs: i64) -> i64 {
    let floor = if (200..300).contains(&status) {
        ttl_2xx_secs
    } else {
        ttl_other_secs
    };
    requested_ttl_secs.max(floor)
}

/// The error-count state machine from the data-model invariants: a 4xx
/// status increments `error_count` and zeroes `soft_error_count`; a 5xx
/// status resets `error_count` and increments `soft_error_count`; any other
/// status resets both.
pub fn next_error_counts(status: u16, error_count: i64, soft_error_count: i64) -> (i64, i64) {
    if (400..500).contains(&status) {
        (error_count + 1, 0)
    } else if (500..600).contains(&status) {
        (0, soft_error_count + 1)
    } else {
        (0, 0)
    }
}

/// The lighter-weight error bookkeeping used by `unchanged()`, which never
/// carries a concrete status: a failure (5xx-with-cache rollback, or a
/// transport failure) increments `soft_error_count` and leaves
/// `error_count` untouched; a non-failure outcome (304) resets both.
pub fn unchanged_error_counts(was_failure: bool, error_count: i64, soft_error_count: i64) -> (i64, i64) {
    if was_failure {
        (error_count, soft_error_count + 1)
    } else {
        (0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_strips_path_query_and_fragment() {
        let uri = Url::parse("http://example.com/a/b?q=1#frag").unwrap();
        assert_eq!(root_uri(&uri).unwrap(), "http://example.com/");
    }

    #[test]
    fn floor_ttl_uses_2xx_floor() {
        assert_eq!(floor_ttl(200, 0, 3600, 86_400), 3600);
        assert_eq!(floor_ttl(200, 7200, 3600, 86_400), 7200);
    }

    #[test]
    fn floor_ttl_uses_other_floor_for_non_2xx() {
        assert_eq!(floor_ttl(404, 0, 3600, 86_400), 86_400);
        assert_eq!(floor_ttl(301, 0, 3600, 86_400), 86_400);
    }

    #[test]
    fn error_counts_for_4xx_increments_error_and_zeroes_soft() {
        assert_eq!(next_error_counts(404, 2, 5), (3, 0));
    }

    #[test]
    fn error_counts_for_5xx_resets_error_and_increments_soft() {
        assert_eq!(next_error_counts(503, 2, 5), (0, 6));
    }

    #[test]
    fn error_counts_for_2xx_resets_both() {
        assert_eq!(next_error_counts(200, 2, 5), (0, 0));
    }

    #[test]
    fn unchanged_failure_increments_soft_only() {
        assert_eq!(unchanged_error_counts(true, 2, 5), (2, 6));
    }

    #[test]
    fn unchanged_success_resets_both() {
        assert_eq!(unchanged_error_counts(false, 2, 5), (0, 0));
    }
}
