// src/cache/mod.rs

//! The content-addressed, on-disk cache.
//!
//! Each key maps to two sibling files, `<key>.json` (metadata) and
//! `<key>.payload` (body bytes), stored under a two-level directory prefix
//! derived from the key itself. Writers always write to a `.tmp` sibling
//! first; `commit_*` atomically renames it into place, `rollback_*` removes
//! it. The pair is committed or rolled back together by the fetcher (see
//! [`crate::fetcher`]) — the cache itself only guarantees atomicity of each
//! individual file.

pub mod key;

pub use key::{bucket_of, cache_key, short_key};

use crate::error::CrawlError;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const INFO_SUFFIX: &str = "json";
const PAYLOAD_SUFFIX: &str = "payload";
const TMP_SUFFIX: &str = "tmp";

/// Which half of the metadata+payload pair an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Info,
    Payload,
}

impl Slot {
    fn suffix(self) -> &'static str {
        match self {
            Slot::Info => INFO_SUFFIX,
            Slot::Payload => PAYLOAD_SUFFIX,
        }
    }
}

/// A content-addressed two-file cache rooted at a base directory.
#[derive(Debug, Clone)]
pub struct Cache {
    base: PathBuf,
}

impl Cache {
    /// Opens a cache rooted at `base`. Does not touch the filesystem; the
    /// prefix directories are created lazily on first write.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// The two-level prefix directory for a key, e.g. `<base>/ab/cd/`.
    fn prefix_dir(&self, key: &str) -> PathBuf {
        self.base.join(&key[0..2]).join(&key[2..4])
    }

    fn final_path(&self, key: &str, slot: Slot) -> PathBuf {
        self.prefix_dir(key).join(format!("{key}.{}", slot.suffix()))
    }

    fn tmp_path(&self, key: &str, slot: Slot) -> PathBuf {
        self.prefix_dir(key)
            .join(format!("{key}.{}.{TMP_SUFFIX}", slot.suffix()))
    }

    /// Path to the final `.json` metadata file for `key`, for out-of-band
    /// readers.
    pub fn info_path(&self, key: &str) -> PathBuf {
        self.final_path(key, Slot::Info)
    }

    /// Path to the final `.payload` body file for `key`, for out-of-band
    /// streaming by a processor.
    pub fn payload_path(&self, key: &str) -> PathBuf {
        self.final_path(key, Slot::Payload)
    }

    /// Opens the final metadata file for reading, failing with
    /// [`CrawlError::NotPresent`] if it does not exist.
    pub async fn open_info_read(&self, key: &str) -> Result<File, CrawlError> {
        File::open(self.info_path(key)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CrawlError::NotPresent
            } else {
                e.into()
            }
        })
    }

    /// Opens the `.tmp` write target for `slot`, creating the two-level
    /// prefix directory on demand.
    async fn open_write(&self, key: &str, slot: Slot) -> Result<File, CrawlError> {
        let dir = self.prefix_dir(key);
        fs::create_dir_all(&dir).await?;
        let path = self.tmp_path(key, slot);
        let file = File::create(&path).await?;
        debug!(path = %path.display(), "opened cache write transaction");
        Ok(file)
    }

    /// Opens `.json.tmp` for writing.
    pub async fn open_info_write(&self, key: &str) -> Result<File, CrawlError> {
        self.open_write(key, Slot::Info).await
    }

    /// Opens `.payload.tmp` for writing.
    pub async fn open_payload_write(&self, key: &str) -> Result<File, CrawlError> {
        self.open_write(key, Slot::Payload).await
    }

    /// Flushes and closes `file`, then atomically renames the `.tmp` file
    /// into its final location.
    async fn commit(&self, key: &str, slot: Slot, mut file: File) -> Result<(), CrawlError> {
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        let tmp = self.tmp_path(key, slot);
        let dest = self.final_path(key, slot);
        fs::rename(&tmp, &dest).await?;
        debug!(path = %dest.display(), "committed cache write");
        Ok(())
    }

    /// Commits the info `.tmp` file, making it the new `.json`.
    pub async fn commit_info(&self, key: &str, file: File) -> Result<(), CrawlError> {
        self.commit(key, Slot::Info, file).await
    }

    /// Commits the payload `.tmp` file, making it the new `.payload`.
    pub async fn commit_payload(&self, key: &str, file: File) -> Result<(), CrawlError> {
        self.commit(key, Slot::Payload, file).await
    }

    /// Drops `file` and unlinks its `.tmp` path without touching the final
    /// location.
    async fn rollback(&self, key: &str, slot: Slot, file: File) -> Result<(), CrawlError> {
        drop(file);
        let tmp = self.tmp_path(key, slot);
        match fs::remove_file(&tmp).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %tmp.display(), error = %e, "failed to remove cache tmp file during rollback");
                Err(e.into())
            }
        }
    }

    /// Rolls back the info `.tmp` file.
    pub async fn rollback_info(&self, key: &str, file: File) -> Result<(), CrawlError> {
        self.rollback(key, Slot::Info, file).await
    }

    /// Rolls back the payload `.tmp` file.
    pub async fn rollback_payload(&self, key: &str, file: File) -> Result<(), CrawlError> {
        self.rollback(key, Slot::Payload, file).await
    }
}
