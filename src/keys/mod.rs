//! Key Manager Module
//!
//! Derives deterministic, content-addressed cache keys from
//! (namespace, identifier, payload).

mod canonical;

#[cfg(test)]
mod property_tests;

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

pub use canonical::CanonicalValue;

// == Public Constants ==
/// Length of the hex digest that follows the namespace prefix (128 bits).
pub const DIGEST_HEX_LEN: usize = 32;

/// Leading digest characters derived from (namespace, identifier) only.
pub const IDENTIFIER_HEX_LEN: usize = 16;

/// Separator between the namespace prefix and the digest.
pub const NAMESPACE_SEPARATOR: char = ':';

// == Cache Key ==
/// A generated cache key of the form `{namespace}:{32 hex chars}`.
///
/// The namespace stays readable so whole namespaces can be invalidated;
/// the digest covers namespace, identifier and canonical payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the namespace portion of the key.
    pub fn namespace(&self) -> &str {
        namespace_of(&self.0).unwrap_or_default()
    }

    /// Returns the hex digest portion of the key.
    pub fn digest(&self) -> &str {
        &self.0[self.0.len() - DIGEST_HEX_LEN..]
    }

    /// Returns the part of the digest shared by all payloads of the
    /// identifier.
    pub fn identifier_digest(&self) -> &str {
        &self.digest()[..IDENTIFIER_HEX_LEN]
    }

    /// Consumes the key, returning the underlying string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// == Generate Key ==
/// Derives the cache key for a lookup.
///
/// Pure and deterministic: the payload is canonicalized (mapping keys sorted,
/// numbers normalized) and rendered as compact JSON. The digest has two
/// halves, both SHA-256 over length-prefixed fields and truncated to 64 bits:
/// the first covers (namespace, identifier), the second adds the canonical
/// payload. Every payload variant of one identifier therefore shares the
/// first half, which is what [`identifier_digest`] returns.
///
/// # Errors
/// `CacheError::Serialization` if the payload holds non-representable members
/// such as NaN or composite map keys.
///
/// # Example
/// ```
/// use serde_json::json;
/// use tiered_cache::keys::generate_key;
///
/// let a = generate_key("embedding", "hello", &json!({"model": "bge-m3", "dim": 1024})).unwrap();
/// let b = generate_key("embedding", "hello", &json!({"dim": 1024, "model": "bge-m3"})).unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.namespace(), "embedding");
/// ```
pub fn generate_key<P>(namespace: &str, identifier: &str, payload: &P) -> Result<CacheKey>
where
    P: Serialize + ?Sized,
{
    let canonical = CanonicalValue::from_serialize(payload)?.to_canonical_json()?;

    let mut hasher = Sha256::new();
    update_framed(&mut hasher, namespace.as_bytes());
    update_framed(&mut hasher, identifier.as_bytes());
    update_framed(&mut hasher, canonical.as_bytes());
    let payload_digest = hasher.finalize();

    Ok(CacheKey(format!(
        "{}{}{}{}",
        namespace,
        NAMESPACE_SEPARATOR,
        identifier_digest(namespace, identifier),
        hex::encode(&payload_digest[..(DIGEST_HEX_LEN - IDENTIFIER_HEX_LEN) / 2])
    )))
}

/// Returns the digest prefix shared by every key of one identifier.
pub fn identifier_digest(namespace: &str, identifier: &str) -> String {
    let mut hasher = Sha256::new();
    update_framed(&mut hasher, namespace.as_bytes());
    update_framed(&mut hasher, identifier.as_bytes());
    hex::encode(&hasher.finalize()[..IDENTIFIER_HEX_LEN / 2])
}

/// Length-prefixes each field so ("ab", "c") and ("a", "bc") differ.
fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

// == Namespace Helpers ==
/// Extracts the namespace from a raw key string produced by [`generate_key`].
///
/// Returns `None` for strings that are not generated keys.
pub fn namespace_of(key: &str) -> Option<&str> {
    split_key(key).map(|(namespace, _)| namespace)
}

/// Returns true if `key` is a generated key of `namespace` whose digest
/// starts with `identifier_digest`.
pub fn belongs_to_identifier(key: &str, namespace: &str, identifier_digest: &str) -> bool {
    split_key(key).is_some_and(|(ns, digest)| {
        ns == namespace && digest[..IDENTIFIER_HEX_LEN] == *identifier_digest
    })
}

fn split_key(key: &str) -> Option<(&str, &str)> {
    let (namespace, digest) = key.rsplit_once(NAMESPACE_SEPARATOR)?;
    if digest.len() == DIGEST_HEX_LEN && digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some((namespace, digest))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use serde_json::json;

    #[test]
    fn test_key_shape() {
        let key = generate_key("embedding", "hello", &json!({"model": "bge-m3"})).unwrap();

        assert!(key.as_str().starts_with("embedding:"));
        assert_eq!(key.as_str().len(), "embedding:".len() + DIGEST_HEX_LEN);
        assert_eq!(key.namespace(), "embedding");
        assert!(key.digest().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_is_stable_across_calls() {
        let payload = json!({"model": "bge-m3", "top_k": 5});
        let first = generate_key("search_result", "query", &payload).unwrap();
        let second = generate_key("search_result", "query", &payload).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_key_order_independence() {
        let a = generate_key("search_result", "q", &json!({"top_k": 5, "filters": {"b": 2, "a": 1}}))
            .unwrap();
        let b = generate_key("search_result", "q", &json!({"filters": {"a": 1, "b": 2}, "top_k": 5}))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let payload = json!({"model": "bge-m3"});
        let a = generate_key("embedding", "hello", &payload).unwrap();
        let b = generate_key("search_result", "hello", &payload).unwrap();
        assert_ne!(a, b);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_field_framing_prevents_boundary_collisions() {
        let a = generate_key("ab", "c", &()).unwrap();
        let b = generate_key("a", "bc", &()).unwrap();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_payload_differences_change_the_key() {
        let a = generate_key("embedding", "hello", &json!({"model": "bge-m3"})).unwrap();
        let b = generate_key("embedding", "hello", &json!({"model": "other"})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_integral_float_payload_matches_integer_payload() {
        let a = generate_key("search_result", "q", &json!({"top_k": 5})).unwrap();
        let b = generate_key("search_result", "q", &json!({"top_k": 5.0})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_non_representable_payload_fails() {
        let result = generate_key("embedding", "hello", &vec![f64::NAN]);
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[test]
    fn test_namespace_of() {
        let key = generate_key("rag:embeddings", "hello", &()).unwrap();
        assert_eq!(namespace_of(key.as_str()), Some("rag:embeddings"));
        assert_eq!(key.namespace(), "rag:embeddings");
        assert_eq!(namespace_of("no-digest-here"), None);
        assert_eq!(namespace_of("ns:short"), None);
    }

    #[test]
    fn test_unicode_identifier() {
        let key = generate_key("embedding", "안녕하세요", &json!({"model": "bge-m3"})).unwrap();
        assert_eq!(key.namespace(), "embedding");
        assert_ne!(
            key,
            generate_key("embedding", "안녕", &json!({"model": "bge-m3"})).unwrap()
        );
    }

    #[test]
    fn test_payload_variants_share_identifier_digest() {
        let a = generate_key("embedding", "hello", &json!({"model": "bge-m3"})).unwrap();
        let b = generate_key("embedding", "hello", &json!({"model": "other"})).unwrap();
        let c = generate_key("embedding", "bye", &json!({"model": "bge-m3"})).unwrap();

        assert_ne!(a, b);
        assert_eq!(a.identifier_digest(), b.identifier_digest());
        assert_ne!(a.identifier_digest(), c.identifier_digest());
        assert_eq!(a.identifier_digest(), identifier_digest("embedding", "hello"));
    }

    #[test]
    fn test_belongs_to_identifier() {
        let key = generate_key("embedding", "hello", &()).unwrap();
        let digest = identifier_digest("embedding", "hello");

        assert!(belongs_to_identifier(key.as_str(), "embedding", &digest));
        assert!(!belongs_to_identifier(key.as_str(), "search_result", &digest));
        assert!(!belongs_to_identifier(
            key.as_str(),
            "embedding",
            &identifier_digest("embedding", "bye")
        ));
        assert!(!belongs_to_identifier("embedding:short", "embedding", &digest));
    }

    #[test]
    fn test_scalar_map_keys_hash_as_text() {
        let mut numeric = std::collections::BTreeMap::new();
        numeric.insert(1u8, "x");

        assert_eq!(
            generate_key("ns", "id", &numeric).unwrap(),
            generate_key("ns", "id", &json!({"1": "x"})).unwrap()
        );
    }
}
