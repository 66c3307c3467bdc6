//! Backend API keys
//!
//! Keys live in [`SecretString`], whose `Debug` and `Display` never print the
//! value. Log lines use [`SecretString::masked`] or [`SecretString::fingerprint`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const REDACTED: &str = "[REDACTED]";

/// Vendor prefixes left visible when masking, longest first
const KEY_PREFIXES: [&str; 2] = ["sk-ant-", "sk-"];

#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw key, for request headers only
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Blank or whitespace-only
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Vendor prefix and last four characters, e.g. `sk-...cdef`
    ///
    /// Keys too short to mask safely are fully redacted.
    pub fn masked(&self) -> String {
        let key = self.0.as_str();
        if key.is_empty() {
            return "[EMPTY]".to_string();
        }
        if key.len() <= 8 || !key.is_ascii() {
            return REDACTED.to_string();
        }

        let tail = &key[key.len() - 4..];
        match KEY_PREFIXES.iter().find(|prefix| key.starts_with(**prefix)) {
            Some(prefix) if prefix.len() + 4 < key.len() => format!("{prefix}...{tail}"),
            _ => format!("{}...{}", &key[..2], &key[key.len() - 2..]),
        }
    }

    /// Short SHA-256 digest, stable across runs, for telling keys apart in logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        digest[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Describe a value for logs without exposing credentials
pub trait SafeLogging {
    fn safe_for_logging(&self) -> String;
}
