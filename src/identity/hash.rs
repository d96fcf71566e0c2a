use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// 64-bit content hash (xxh3).
///
/// Used for change detection only, never for security. Combined hashes
/// (render keys, tree hashes) are built by feeding the little-endian bytes of
/// their parts back through the same function, so they stay stable across
/// runs and platforms.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(u64);

impl ContentHash {
    /// Hashes raw bytes.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(xxh3_64(bytes))
    }

    /// Hash of empty content.
    #[must_use]
    pub fn empty() -> Self {
        Self::of(&[])
    }

    /// Order-sensitive combination of several hashes.
    #[must_use]
    pub fn combine<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let mut buf = Vec::new();
        for part in parts {
            buf.extend_from_slice(&part.0.to_le_bytes());
        }
        Self::of(&buf)
    }

    /// Hashes a JSON value. Object keys are sorted first, so equal values
    /// hash the same whatever order their keys were inserted in.
    #[must_use]
    pub fn of_json(value: &Value) -> Self {
        match serde_json::to_vec(&sorted_keys(value)) {
            Ok(bytes) => Self::of(&bytes),
            Err(_) => Self::empty(),
        }
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

fn sorted_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k.clone(), sorted_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_keys).collect()),
        other => other.clone(),
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:016x})", self.0)
    }
}
