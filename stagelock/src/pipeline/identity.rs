//! Content-addressed identifiers for stage executions.
//!
//! An identifier is a pure function of the input mapping and a seed: the
//! mapping is serialized canonically (keys sorted at every depth, no
//! whitespace) inside an envelope that also holds the seed, the bytes are
//! hashed with SHA-256, and a fixed-length prefix of the hex digest is kept.
//! Caller keys live one level below the seed, so no input key can shadow it.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::Payload;

/// Envelope field holding the caller's input mapping.
pub const INPUTS_FIELD: &str = "inputs";

/// Envelope field holding the seed.
pub const SEED_FIELD: &str = "seed";

/// Number of hex characters kept by [`compute_id`].
pub const DEFAULT_ID_LENGTH: usize = 16;

/// Computes the identifier for `inputs` under `seed`, prefixed by `prefix`.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use stagelock::pipeline::compute_id;
///
/// let a = json!({"b": 2, "a": 1});
/// let b = json!({"a": 1, "b": 2});
/// let id = compute_id(a.as_object().unwrap(), "seed", "prs-");
/// assert_eq!(id, compute_id(b.as_object().unwrap(), "seed", "prs-"));
/// assert!(id.starts_with("prs-"));
/// assert_eq!(id.len(), 4 + 16);
/// ```
#[must_use]
pub fn compute_id(inputs: &Payload, seed: &str, prefix: &str) -> String {
    compute_id_with_length(inputs, seed, prefix, DEFAULT_ID_LENGTH)
}

/// Like [`compute_id`] but keeps `length` hex characters (at most 64).
#[must_use]
pub fn compute_id_with_length(inputs: &Payload, seed: &str, prefix: &str, length: usize) -> String {
    let mut envelope = Payload::new();
    envelope.insert(INPUTS_FIELD.to_string(), Value::Object(inputs.clone()));
    envelope.insert(SEED_FIELD.to_string(), Value::String(seed.to_string()));

    let canonical = canonical_json(&Value::Object(envelope));
    let digest = Sha256::digest(canonical.as_bytes());
    let hex_digest = hex::encode(digest);

    let keep = length.min(hex_digest.len());
    format!("{prefix}{}", &hex_digest[..keep])
}

/// Serializes a JSON value with object keys sorted at every depth and no
/// incidental whitespace.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        // Scalars already have a single compact form.
        Value::Null | Value::Bool(_) | Value::Number(_) => out.push_str(&value.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    // Display of a JSON string value is its escaped, quoted form.
    out.push_str(&Value::String(s.to_string()).to_string());
}
