// src/cache/key.rs

//! Cache key derivation and the short-key / bucket sharding scheme built on
//! top of it.

use sha2::{Digest, Sha256};

/// Number of bytes of the SHA-256 digest used to build the cache key.
const KEY_BYTES: usize = 16;

/// Strips everything from the first `#` onward, mirroring how a browser
/// treats the fragment as client-side-only and never sends it to the origin.
fn strip_fragment(uri: &str) -> &str {
    match uri.find('#') {
        Some(idx) => &uri[..idx],
        None => uri,
    }
}

/// Derives the 32-character lowercase hex cache key for a URI: the first 16
/// bytes of SHA-256 of the fragment-stripped URI, taken over its raw byte
/// representation.
pub fn cache_key(uri: &str) -> String {
    let stripped = strip_fragment(uri);
    let digest = Sha256::digest(stripped.as_bytes());
    hex::encode(&digest[..KEY_BYTES])
}

/// Parses the first 8 hex characters of a cache key as an unsigned 32-bit
/// integer. Used only for bucket assignment.
pub fn short_key(key: &str) -> u32 {
    u32::from_str_radix(&key[..8], 16).expect("cache_key always produces valid hex")
}

/// Assigns a 1-based bucket id out of `n` buckets for the given short key.
pub fn bucket_of(short: u32, n: u32) -> u32 {
    assert!(n > 0, "bucket count must be positive");
    (short % n) + 1
}
