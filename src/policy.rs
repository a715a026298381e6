// src/policy.rs

//! The two admission gates: a pre-fetch URI policy, and a post-headers
//! checkpoint policy that may downgrade the fetch status based on
//! Content-Type.

use crate::config::PolicyConfig;
use wildmatch::WildMatch;

/// Outcome of the pre-fetch URI policy gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed with the fetch.
    Proceed,
    /// Silently skip: no cache activity, no callbacks.
    Skip,
    /// Reject outright, as an error condition.
    Reject,
}

/// The HTTP status substituted for content the checkpoint policy rejects.
pub const REJECTED_CONTENT_STATUS: u16 = 406;

fn matches_any(patterns: &[String], value: &str) -> bool {
    let value_lower = value.to_ascii_lowercase();
    patterns
        .iter()
        .any(|p| WildMatch::new(&p.to_ascii_lowercase()).matches(&value_lower))
}

/// Matches URI schemes and response Content-Types against configured
/// whitelist/blacklist patterns. An empty whitelist admits everything not
/// on the blacklist; a non-empty whitelist requires a match.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    schemes_whitelist: Vec<String>,
    schemes_blacklist: Vec<String>,
    content_types_whitelist: Vec<String>,
    content_types_blacklist: Vec<String>,
}

impl Policy {
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            schemes_whitelist: config.schemes_whitelist.clone(),
            schemes_blacklist: config.schemes_blacklist.clone(),
            content_types_whitelist: config.content_types_whitelist.clone(),
            content_types_blacklist: config.content_types_blacklist.clone(),
        }
    }

    /// The pre-fetch URI policy gate: admits or rejects a URI by scheme.
    pub fn admit_uri(&self, scheme: &str) -> Admission {
        if matches_any(&self.schemes_blacklist, scheme) {
            return Admission::Skip;
        }
        if !self.schemes_whitelist.is_empty() && !matches_any(&self.schemes_whitelist, scheme) {
            return Admission::Skip;
        }
        Admission::Proceed
    }

    /// The post-headers checkpoint policy: returns `Some(downgraded_status)`
    /// if the bare media type is rejected, or `None` if the content is
    /// admitted unchanged.
    pub fn checkpoint(&self, bare_content_type: Option<&str>) -> Option<u16> {
        let Some(ct) = bare_content_type else {
            return None;
        };
        if matches_any(&self.content_types_blacklist, ct) {
            return Some(REJECTED_CONTENT_STATUS);
        }
        if !self.content_types_whitelist.is_empty() && !matches_any(&self.content_types_whitelist, ct) {
            return Some(REJECTED_CONTENT_STATUS);
        }
        None
    }
}
