//! # Hashing Utilities
//!
//! Two hash functions, each with one job:
//!
//! - **SHA-256** derives signer identities from public keys. Identities leave
//!   the process (they are embedded in signed envelopes and shown to
//!   operators), so they use the hash every external verifier already has.
//!
//! - **BLAKE3** chains the audit log. It never leaves our storage, so we use
//!   the faster hash, with `derive_key` domain separation so an audit entry
//!   hash can never be confused with any other digest in the system.

use sha2::{Digest, Sha256};

/// SHA-256 digest as a fixed-size array.
///
/// # Example
///
/// ```
/// use ap2_protocol::crypto::hash::sha256_array;
///
/// assert_eq!(sha256_array(b"ap2").len(), 32);
/// ```
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// Plain BLAKE3 digest.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Domain-separated BLAKE3 over several parts, fed sequentially into a
/// `derive_key` hasher.
///
/// Every part is length-prefixed (u64 little-endian) before it is absorbed,
/// so `["ab", "c"]` and `["a", "bc"]` hash differently.
pub fn domain_hash(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let hash = sha256_array(b"");
        assert_eq!(
            hex::encode(hash),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn blake3_deterministic() {
        assert_eq!(blake3_hash(b"ap2"), blake3_hash(b"ap2"));
        assert_ne!(blake3_hash(b"ap2"), blake3_hash(b"AP2"));
    }

    #[test]
    fn test_domain_separation() {
        let a = domain_hash("context-a", &[b"same"]);
        let b = domain_hash("context-b", &[b"same"]);
        assert_ne!(a, b);
        assert_ne!(a, blake3_hash(b"same"));
    }

    #[test]
    fn test_part_boundaries_matter() {
        let a = domain_hash("ctx", &[b"ab", b"c"]);
        let b = domain_hash("ctx", &[b"a", b"bc"]);
        assert_ne!(a, b);
    }
}
