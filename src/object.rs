// src/object.rs

//! The in-memory record of a cached resource and its metadata dictionary.

use crate::cache::{cache_key, Cache};
use crate::error::CrawlError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

/// A header's value: the status-line entry (key `":"`) is a bare string,
/// every other header is an array of values (even when there's only one),
/// matching the wire format described in the metadata schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    StatusLine(String),
    Values(Vec<String>),
}

impl HeaderValue {
    pub fn as_values(&self) -> Vec<String> {
        match self {
            HeaderValue::StatusLine(s) => vec![s.clone()],
            HeaderValue::Values(v) => v.clone(),
        }
    }
}

/// Header block key under which the raw HTTP status line is stored.
pub const STATUS_LINE_KEY: &str = ":";

/// The JSON metadata sidecar stored alongside the payload file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub status: u16,
    pub updated: i64,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, HeaderValue>,
}

impl Metadata {
    /// Returns the bare media type (parameters after `;` stripped, surrounding
    /// whitespace trimmed), used by the checkpoint policy.
    pub fn bare_content_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
    }
}

/// In-memory handle to a cached resource, populated either by [`Object::locate`]
/// (read metadata from disk) or by the fetcher after a successful commit.
#[derive(Debug, Clone)]
pub struct Object {
    pub key: String,
    pub uri: String,
    pub info: Option<Metadata>,
    pub updated: i64,
    pub status: u16,
    /// Set when the current fetch produced new bytes, as opposed to a
    /// `locate()` of a pre-existing entry or a 304 response.
    pub fresh: bool,
    pub payload: PathBuf,
    pub size: u64,
}

impl Object {
    /// Constructs an empty, not-yet-fetched object for `uri`.
    pub fn for_uri(cache: &Cache, uri: &str) -> Self {
        let key = cache_key(uri);
        let payload = cache.payload_path(&key);
        Self {
            key,
            uri: uri.to_string(),
            info: None,
            updated: 0,
            status: 0,
            fresh: false,
            payload,
            size: 0,
        }
    }

    /// Reads `<key>.json` from the cache and populates this object's derived
    /// fields. Returns [`CrawlError::NotPresent`] if the entry does not
    /// exist, and [`CrawlError::MalformedMetadata`] if it cannot be parsed.
    pub async fn locate(cache: &Cache, uri: &str) -> Result<Self, CrawlError> {
        let mut object = Self::for_uri(cache, uri);
        let mut file = cache.open_info_read(&object.key).await?;
        let mut buf = String::new();
        file.read_to_string(&mut buf).await?;
        let metadata: Metadata = serde_json::from_str(&buf)?;
        object.replace(metadata);
        Ok(object)
    }

    /// Deep-replaces this object's metadata and refreshes the derived
    /// fields (`status`, `updated`, `size`). Called by the fetcher after a
    /// successful commit so the caller observes the post-fetch state without
    /// re-reading from disk.
    pub fn replace(&mut self, metadata: Metadata) {
        self.status = metadata.status;
        self.updated = metadata.updated;
        self.size = metadata.size;
        self.info = Some(metadata);
    }

    /// Returns the `headers` sub-dictionary, cloned.
    pub fn headers(&self) -> HashMap<String, HeaderValue> {
        self.info
            .as_ref()
            .map(|m| m.headers.clone())
            .unwrap_or_default()
    }

    pub fn redirect(&self) -> Option<&str> {
        self.info.as_ref().and_then(|m| m.redirect.as_deref())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.info.as_ref().and_then(|m| m.content_type.as_deref())
    }

    pub fn payload_path(&self) -> &std::path::Path {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn locate_missing_entry_reports_not_present() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let err = Object::locate(&cache, "http://example.com/missing")
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::NotPresent));
    }

    #[tokio::test]
    async fn locate_round_trips_committed_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let uri = "http://example.com/a";
        let key = cache_key(uri);

        let mut headers = HashMap::new();
        headers.insert(STATUS_LINE_KEY.to_string(), HeaderValue::StatusLine("HTTP/1.1 200 OK".into()));
        headers.insert("Content-Type".to_string(), HeaderValue::Values(vec!["text/plain".into()]));
        let metadata = Metadata {
            status: 200,
            updated: 1_700_000_000,
            size: 5,
            redirect: None,
            content_type: Some("text/plain".into()),
            headers,
        };

        let mut file = cache.open_info_write(&key).await.unwrap();
        file.write_all(serde_json::to_string(&metadata).unwrap().as_bytes())
            .await
            .unwrap();
        cache.commit_info(&key, file).await.unwrap();

        let object = Object::locate(&cache, uri).await.unwrap();
        assert_eq!(object.status, 200);
        assert_eq!(object.updated, 1_700_000_000);
        assert_eq!(object.info.unwrap(), metadata);
    }

    #[test]
    fn bare_content_type_strips_parameters() {
        let metadata = Metadata {
            status: 200,
            updated: 0,
            size: 0,
            redirect: None,
            content_type: Some("text/html; charset=utf-8".into()),
            headers: HashMap::new(),
        };
        assert_eq!(metadata.bare_content_type().as_deref(), Some("text/html"));
    }
}
