//! Credential identity fingerprints
//!
//! Every persisted file (checkpoints, export metadata, stored credentials, locks) is
//! namespaced by a fingerprint of the consumer key, so state from one application key is
//! never picked up by another.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters kept from the SHA-256 digest
const FINGERPRINT_LEN: usize = 16;

/// Stable identifier derived from a consumer key
///
/// # Examples
///
/// ```
/// use pocket_export::Fingerprint;
///
/// let fp = Fingerprint::from_consumer_key("1234-abcd");
/// assert_eq!(fp.as_str().len(), 16);
/// assert_eq!(fp, Fingerprint::from_consumer_key("1234-abcd"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash a consumer key: first 16 hex characters of its SHA-256 digest
    pub fn from_consumer_key(consumer_key: &str) -> Self {
        let digest = Sha256::digest(consumer_key.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self(hex[..FINGERPRINT_LEN].to_string())
    }

    /// Fingerprint as a string slice, safe for use in file names
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
