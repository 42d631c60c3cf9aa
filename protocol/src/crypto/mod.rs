//! # Cryptographic Primitives
//!
//! Everything that touches key material or produces a digest lives here.
//! The mandate layer above never calls `ed25519-dalek`, `sha2` or `blake3`
//! directly.
//!
//! - **Ed25519** for mandate signatures (deterministic, 64 bytes).
//! - **SHA-256** for signer identities, because external verifiers have it.
//! - **BLAKE3** for the audit hash chain, because it is internal and fast.
//! - **JCS (RFC 8785)** for the canonical bytes that get signed.
//!
//! Nothing in here is novel cryptography. It is a thin typed layer over
//! audited crates.

pub mod canonical;
pub mod hash;
pub mod keys;
pub mod signatures;

pub use canonical::CanonicalError;
pub use hash::{blake3_hash, domain_hash, sha256_array};
pub use keys::{KeyError, MandateSignature, SignerIdentity, SignerKeypair, SignerPublicKey};
pub use signatures::{pae, sign_payload, verify_payload, SignatureError};
