//! Deterministic digest of a canonicalized input, used as the cache and
//! coalescing key (spec §3 "Cache entry", §6 "hash function suitable for
//! fingerprinting").

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque fixed-width digest of a canonicalized input plus scope key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash an arbitrary serializable input together with a scope key.
    ///
    /// The scope key partitions the cache/coalescer between engines or
    /// callers sharing the same infrastructure (spec §6
    /// `fingerprint_scope_key`) without ever being part of the input itself.
    pub fn of(input: &impl Serialize, scope: &str) -> Self {
        let canonical = canonicalize(input);
        let mut hasher = Sha256::new();
        hasher.update(scope.as_bytes());
        hasher.update(b"\0");
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Canonical-JSON serialization: object keys sorted, no insignificant
/// whitespace. Matches spec §3's "LLM request" canonicalization rule,
/// generalized to any serializable input.
pub fn canonicalize(value: &impl Serialize) -> String {
    let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    let sorted = sort_keys(json);
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_keys).collect())
        }
        other => other,
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Example {
        b: u32,
        a: u32,
    }

    #[derive(Serialize)]
    struct Reordered {
        a: u32,
        b: u32,
    }

    #[test]
    fn key_order_does_not_affect_fingerprint() {
        let f1 = Fingerprint::of(&Example { b: 2, a: 1 }, "scope");
        let f2 = Fingerprint::of(&Reordered { a: 1, b: 2 }, "scope");
        assert_eq!(f1, f2);
    }

    #[test]
    fn scope_partitions_the_fingerprint() {
        let input = Example { a: 1, b: 2 };
        let f1 = Fingerprint::of(&input, "engine-a");
        let f2 = Fingerprint::of(&input, "engine-b");
        assert_ne!(f1, f2);
    }

    #[test]
    fn display_is_short_hex() {
        let f = Fingerprint::of(&"x", "scope");
        assert_eq!(format!("{f}").len(), 16);
    }
}
