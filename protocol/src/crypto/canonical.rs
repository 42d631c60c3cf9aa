//! # Canonical Serialization
//!
//! RFC 8785 (JCS) canonical JSON via `serde_jcs`: keys sorted
//! lexicographically, no insignificant whitespace, UTF-8, normalized
//! numbers. Two semantically equal mandates produce byte-identical output,
//! which is what makes a signature over those bytes meaningful.
//!
//! Amounts in this crate are integers, so number normalization never has
//! to round anything.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("failed to serialize canonical json: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Canonical JSON bytes of `value`.
///
/// # Example
///
/// ```
/// use ap2_protocol::crypto::canonical;
/// use serde_json::json;
///
/// let bytes = canonical::to_vec(&json!({"b": 2, "a": 1})).unwrap();
/// assert_eq!(bytes, br#"{"a":1,"b":2}"#);
/// ```
pub fn to_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    Ok(serde_jcs::to_vec(value)?)
}

/// Canonical JSON as a string.
pub fn to_string<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalError> {
    Ok(serde_jcs::to_string(value)?)
}
