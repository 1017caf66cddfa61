pub mod fs;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use thiserror::Error;

use crate::domain::UnitId;

/// SHA-256 digest of candidate or artifact content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Compute the SHA-256 digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hash);
        Self(bytes)
    }

    /// Hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex().chars().take(12).collect::<String>())
    }
}

impl FromStr for Digest {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| StoreError::InvalidDigest(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(StoreError::InvalidDigest(s.to_string()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

/// Errors from candidate store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no candidate for unit {unit} ordinal {ordinal}")]
    NoCandidates { unit: UnitId, ordinal: u32 },

    #[error("candidate not found: unit {unit} ordinal {ordinal} attempt {attempt}")]
    NotFound {
        unit: UnitId,
        ordinal: u32,
        attempt: u32,
    },

    #[error("candidate changed on disk: unit {unit} ordinal {ordinal} attempt {attempt}")]
    Corrupt {
        unit: UnitId,
        ordinal: u32,
        attempt: u32,
    },

    #[error("attempt {attempt} already exists for unit {unit} ordinal {ordinal}")]
    Conflict {
        unit: UnitId,
        ordinal: u32,
        attempt: u32,
    },

    #[error("ordinal must be at least 1")]
    InvalidOrdinal,

    #[error("invalid digest hex: {0}")]
    InvalidDigest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable, append-only map from (unit, ordinal, attempt) to candidate text.
///
/// Attempt numbers start at 1 and strictly increase per (unit, ordinal).
/// Nothing is ever overwritten or deleted through this interface.
pub trait CandidateStore: Send + Sync {
    /// Store `text` as the next attempt and return its number. Durable on return.
    fn put(&self, unit: &UnitId, ordinal: u32, text: &str) -> Result<u32>;

    /// Retrieve the text of one attempt.
    fn get(&self, unit: &UnitId, ordinal: u32, attempt: u32) -> Result<String>;

    /// All stored attempt numbers, ascending.
    fn attempts(&self, unit: &UnitId, ordinal: u32) -> Result<Vec<u32>>;

    /// Highest stored attempt number.
    fn latest(&self, unit: &UnitId, ordinal: u32) -> Result<u32> {
        self.attempts(unit, ordinal)?
            .last()
            .copied()
            .ok_or_else(|| StoreError::NoCandidates {
                unit: unit.clone(),
                ordinal,
            })
    }

    fn exists(&self, unit: &UnitId, ordinal: u32, attempt: u32) -> Result<bool> {
        Ok(self.attempts(unit, ordinal)?.contains(&attempt))
    }

    /// `put`, then read the text back and compare digests.
    fn put_verified(&self, unit: &UnitId, ordinal: u32, text: &str) -> Result<u32> {
        let attempt = self.put(unit, ordinal, text)?;
        let stored = self.get(unit, ordinal, attempt)?;
        if Digest::compute(stored.as_bytes()) != Digest::compute(text.as_bytes()) {
            return Err(StoreError::Corrupt {
                unit: unit.clone(),
                ordinal,
                attempt,
            });
        }
        Ok(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_display_fromstr_roundtrip() {
        let d = Digest::compute(b"int main(void) { return 0; }");
        let hex = d.to_string();
        assert_eq!(hex.len(), 64);
        let parsed: Digest = hex.parse().unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn digest_fromstr_rejects_bad_input() {
        assert!("not-valid-hex".parse::<Digest>().is_err());
        assert!("abcd".parse::<Digest>().is_err());
    }

    #[test]
    fn store_error_messages_name_the_key() {
        let err = StoreError::NotFound {
            unit: UnitId::new("server-abc-t1"),
            ordinal: 2,
            attempt: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("server-abc-t1"));
        assert!(msg.contains("attempt 7"));
    }
}
