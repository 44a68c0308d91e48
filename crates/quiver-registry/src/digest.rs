use std::collections::BTreeMap;

use sha2::{Digest, Sha256, Sha512};

use crate::error::{FetchError, FetchResult};

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub(crate) fn sha512_hex(bytes: &[u8]) -> String {
    hex::encode(Sha512::digest(bytes))
}

/// Check every declared supported hash. Unknown algorithms are rejected at
/// lock file validation, so they are ignored here.
pub(crate) fn verify_hashes(
    name: &str,
    bytes: &[u8],
    hashes: &BTreeMap<String, String>,
) -> FetchResult<()> {
    for (algorithm, expected) in hashes {
        let actual = match algorithm.to_ascii_lowercase().as_str() {
            "sha256" => sha256_hex(bytes),
            "sha512" => sha512_hex(bytes),
            _ => continue,
        };
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(FetchError::integrity(
                name,
                format!("{} mismatch: expected {}, got {}", algorithm, expected, actual),
            ));
        }
    }
    Ok(())
}

/// Short stable key for a URL: 16 hex chars of its sha256.
pub(crate) fn url_key(url: &str) -> String {
    sha256_hex(url.trim().as_bytes())[..16].to_string()
}
