//! Content-derived feed identity.
//!
//! A feed is identified by the set of series it follows. The fingerprint is
//! a SHA-256 digest over that set in canonical form, so the same set always
//! maps to the same feed regardless of how the caller spelled or ordered it.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

const FINGERPRINT_LEN: usize = 64;

/// Lowercase hex SHA-256 of a canonical identifier set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedFingerprint(String);

impl FeedFingerprint {
    /// Computes the fingerprint of an identifier set.
    ///
    /// Entries are trimmed and lowercased, empty entries are dropped, and the
    /// remainder is deduplicated and sorted. Each element is hashed as its
    /// byte length (u64, little-endian) followed by its bytes, so element
    /// boundaries are part of the digest: `{"1", "23"}` and `{"12", "3"}`
    /// differ.
    pub fn compute<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let canonical: BTreeSet<String> = entries
            .into_iter()
            .filter_map(|entry| normalize_entry(entry.as_ref()))
            .collect();

        let mut hasher = Sha256::new();
        for entry in &canonical {
            hasher.update((entry.len() as u64).to_le_bytes());
            hasher.update(entry.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Accepts exactly 64 lowercase hex characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == FINGERPRINT_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trims and lowercases a feed entry. Returns `None` if nothing is left.
pub fn normalize_entry(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
}
