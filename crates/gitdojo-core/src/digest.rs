//! Content addressing for simulated objects.
//!
//! Commit and blob ids are lowercase SHA-256 hex. Structured objects are hashed
//! over their canonical JSON form (object keys sorted recursively, arrays kept
//! in order, no whitespace), so the same content always yields the same id.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Domain prefix mixed into commit hashes so a commit can never collide with a blob.
const COMMIT_DOMAIN: &[u8] = b"gitdojo-commit-v1\n";
const BLOB_DOMAIN: &[u8] = b"gitdojo-blob-v1\n";
const SHAPE_DOMAIN: &[u8] = b"gitdojo-shape-v1\n";

fn sha256_hex(domain: &[u8], bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Canonical JSON bytes of any serializable value.
///
/// Returns `None` only when the value cannot be represented as JSON
/// (e.g. a map with non-string keys), which none of the model types produce.
pub fn canonical_json(value: &impl Serialize) -> Option<Vec<u8>> {
    let raw = serde_json::to_value(value).ok()?;
    serde_json::to_vec(&sorted(raw)).ok()
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<(String, Value)> =
                map.into_iter().map(|(k, v)| (k, sorted(v))).collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(pairs.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// Id of a commit body (everything except the id itself).
///
/// # Panics
///
/// If `body` has no JSON form. Commit bodies are strings, integers and
/// string-keyed maps, so this only fires on a programming error.
pub fn commit_hash(body: &impl Serialize) -> String {
    let bytes = canonical_json(body).expect("commit body must serialize to JSON");
    sha256_hex(COMMIT_DOMAIN, &bytes)
}

/// Id of a file's content.
pub fn blob_hash(content: &str) -> String {
    sha256_hex(BLOB_DOMAIN, content.as_bytes())
}

/// Structural signature of a commit given its parents' signatures, in parent order.
pub fn shape_hash(parent_shapes: &[String]) -> String {
    sha256_hex(SHAPE_DOMAIN, parent_shapes.join(",").as_bytes())
}
