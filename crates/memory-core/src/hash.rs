//! Content hashing
//!
//! Deterministic identity for a [`crate::memory::Memory`]: the same logical
//! content and static metadata always produce the same hash, independent of
//! key order, platform, or process.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Metadata keys excluded from the hash because they are volatile or
/// derived, not part of the logical content.
const VOLATILE_KEYS: [&str; 3] = ["timestamp", "content_hash", "embedding"];

/// Compute the content hash of `content` plus the static subset of
/// `metadata`.
///
/// Content is normalised with `trim()` + lowercasing before hashing.
/// Metadata is filtered to drop [`VOLATILE_KEYS`], then serialised with
/// sorted keys so that two callers passing the same logical metadata in a
/// different key order get the same hash.
pub fn content_hash(content: &str, metadata: Option<&Map<String, Value>>) -> String {
    let normalized = content.trim().to_lowercase();

    let mut hash_input = normalized;

    if let Some(metadata) = metadata {
        let static_metadata: Map<String, Value> = metadata
            .iter()
            .filter(|(k, _)| !VOLATILE_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if !static_metadata.is_empty() {
            // BTreeMap-backed serialization of serde_json::Map sorts keys
            // when the `preserve_order` feature is off (our default), giving
            // us sorted JSON deterministically; `ascii_escape_json` then
            // \u-escapes non-ASCII characters to match the original's
            // `json.dumps(..., ensure_ascii=True)` byte-for-byte.
            let sorted: std::collections::BTreeMap<String, Value> =
                static_metadata.into_iter().collect();
            let canonical =
                serde_json::to_string(&sorted).expect("BTreeMap<String, Value> always serializes");
            hash_input.push_str(&ascii_escape_json(&canonical));
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(hash_input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Re-encodes every non-ASCII character as a `\uXXXX` escape (a surrogate
/// pair for characters outside the BMP), matching Python's
/// `json.dumps(..., ensure_ascii=True)` default so hashes stay portable
/// across implementations for metadata containing non-ASCII text.
fn ascii_escape_json(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut buf = [0u16; 2];
            for unit in ch.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stable_across_whitespace_and_case() {
        let a = content_hash("  Hello World  ", None);
        let b = content_hash("hello world", None);
        assert_eq!(a, b);
    }

    #[test]
    fn stable_across_metadata_key_order() {
        let mut m1 = Map::new();
        m1.insert("a".into(), json!(1));
        m1.insert("b".into(), json!(2));

        let mut m2 = Map::new();
        m2.insert("b".into(), json!(2));
        m2.insert("a".into(), json!(1));

        assert_eq!(
            content_hash("same content", Some(&m1)),
            content_hash("same content", Some(&m2))
        );
    }

    #[test]
    fn volatile_keys_are_excluded() {
        let mut with_volatile = Map::new();
        with_volatile.insert("timestamp".into(), json!(12345));
        with_volatile.insert("content_hash".into(), json!("whatever"));
        with_volatile.insert("embedding".into(), json!([0.1, 0.2]));

        let without_volatile = Map::new();

        assert_eq!(
            content_hash("content", Some(&with_volatile)),
            content_hash("content", Some(&without_volatile))
        );
    }

    #[test]
    fn distinct_content_gives_distinct_hash() {
        assert_ne!(
            content_hash("content", None),
            content_hash("contentx", None)
        );
    }

    #[test]
    fn non_ascii_metadata_is_ascii_escaped_like_the_python_original() {
        let escaped = ascii_escape_json("caf\u{e9}");
        assert!(escaped.is_ascii());
        assert_eq!(escaped, "caf\\u00e9");

        let mut metadata = Map::new();
        metadata.insert("note".into(), json!("café"));
        // Just exercises the full content_hash path with non-ASCII metadata
        // without panicking on the escape step.
        content_hash("content", Some(&metadata));
    }
}
