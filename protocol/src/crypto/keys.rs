//! # Signer Keys
//!
//! Ed25519 keypairs for every party that signs a mandate: the user, the
//! shopping and merchant agents, and the payment processor.
//!
//! ## Signer identity
//!
//! A mandate never carries a raw public key. It carries a *signer identity*:
//! `ed25519:` followed by the hex SHA-256 digest of the 32-byte public key.
//! The identity is stable, short enough to log, and useless to an attacker
//! on its own. Resolving it back to a key is the job of the
//! [`KeyDirectory`](crate::registry::KeyDirectory).
//!
//! ## Security considerations
//!
//! - Key generation uses `OsRng`.
//! - Secret key bytes are never logged and never appear in `Debug` output.
//! - `SignerKeypair` does not implement `Serialize`. Writing a secret key to
//!   disk is an explicit `to_hex()` call, not a side effect of putting a
//!   keypair in a struct.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

use crate::config::{
    SIGNATURE_LENGTH, SIGNER_IDENTITY_PREFIX, SIGNING_KEY_LENGTH, VERIFYING_KEY_LENGTH,
};
use crate::crypto::hash::sha256_array;

/// Errors that can occur during key operations.
///
/// Deliberately vague: error messages never describe key material.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or malformed hex")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid signature bytes: expected {SIGNATURE_LENGTH} bytes")]
    InvalidSignature,

    #[error("invalid signer identity: {0}")]
    InvalidIdentity(String),
}

// ---------------------------------------------------------------------------
// SignerIdentity
// ---------------------------------------------------------------------------

/// Public identifier of a signer, derived from (never equal to) its public
/// key. Format: `ed25519:<64 hex chars>`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignerIdentity(String);

impl SignerIdentity {
    /// Derive the identity of a public key.
    pub fn from_public_key(pk: &SignerPublicKey) -> Self {
        let digest = sha256_array(pk.as_bytes());
        Self(format!("{SIGNER_IDENTITY_PREFIX}{}", hex::encode(digest)))
    }

    /// Parse an identity string, checking prefix and digest shape.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        let digest = s
            .strip_prefix(SIGNER_IDENTITY_PREFIX)
            .ok_or_else(|| KeyError::InvalidIdentity(format!("missing prefix in {s:?}")))?;
        if digest.len() != 64 || hex::decode(digest).is_err() {
            return Err(KeyError::InvalidIdentity(format!(
                "digest must be 64 hex chars, got {s:?}"
            )));
        }
        Ok(Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SignerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Prefix plus the first 8 digest chars is plenty to tell signers apart.
        let end = self.0.len().min(SIGNER_IDENTITY_PREFIX.len() + 8);
        write!(f, "SignerIdentity({}..)", &self.0[..end])
    }
}

// ---------------------------------------------------------------------------
// SignerKeypair
// ---------------------------------------------------------------------------

/// An Ed25519 signing keypair held by one mandate issuer.
///
/// # Examples
///
/// ```
/// use ap2_protocol::crypto::keys::SignerKeypair;
///
/// let kp = SignerKeypair::generate();
/// let sig = kp.sign(b"intent: up to 100 USD on electronics");
/// assert!(kp.public_key().verify(b"intent: up to 100 USD on electronics", &sig));
/// ```
pub struct SignerKeypair {
    signing_key: SigningKey,
}

impl SignerKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. In Ed25519 the seed *is*
    /// the secret key. Tests and fixtures only; production keys come from
    /// [`generate`](Self::generate).
    pub fn from_seed(seed: &[u8; SIGNING_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load a keypair from a hex-encoded secret key (what `ap2-node keygen`
    /// writes).
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let arr: [u8; SIGNING_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&arr))
    }

    /// Hex-encoded secret key. Handle with care: this string is the signer.
    pub fn to_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn public_key(&self) -> SignerPublicKey {
        SignerPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// The identity recorded in every envelope this keypair signs.
    pub fn identity(&self) -> SignerIdentity {
        SignerIdentity::from_public_key(&self.public_key())
    }

    /// Sign arbitrary bytes. Ed25519 is deterministic, so the same
    /// (key, message) pair always yields the same signature.
    pub fn sign(&self, message: &[u8]) -> MandateSignature {
        MandateSignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }
}

impl Clone for SignerKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for SignerKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secret material, not even partially.
        write!(f, "SignerKeypair(id={})", self.identity())
    }
}

// ---------------------------------------------------------------------------
// SignerPublicKey
// ---------------------------------------------------------------------------

/// The public half of a signer keypair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerPublicKey {
    bytes: [u8; VERIFYING_KEY_LENGTH],
}

impl SignerPublicKey {
    /// Build from raw bytes, rejecting anything that is not a valid curve
    /// point.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; VERIFYING_KEY_LENGTH] =
            slice.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::try_from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; VERIFYING_KEY_LENGTH] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn identity(&self) -> SignerIdentity {
        SignerIdentity::from_public_key(self)
    }

    /// Verify a signature. Any malformed input is simply `false`.
    pub fn verify(&self, message: &[u8], signature: &MandateSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Some(sig) = signature.to_dalek_signature() else {
            return false;
        };
        verifying_key.verify(message, &sig).is_ok()
    }
}

impl Hash for SignerPublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for SignerPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SignerPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignerPublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// MandateSignature
// ---------------------------------------------------------------------------

/// A detached Ed25519 signature. Always 64 bytes when produced by
/// [`SignerKeypair::sign`]; anything else fails verification.
#[derive(Clone, PartialEq, Eq)]
pub struct MandateSignature {
    bytes: Vec<u8>,
}

impl MandateSignature {
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidSignature)?;
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(KeyError::InvalidSignature);
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    fn to_dalek_signature(&self) -> Option<DalekSignature> {
        let arr: [u8; SIGNATURE_LENGTH] = self.bytes.as_slice().try_into().ok()?;
        Some(DalekSignature::from_bytes(&arr))
    }
}

impl fmt::Debug for MandateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        if hex_str.len() >= 16 {
            write!(f, "MandateSignature({}..)", &hex_str[..16])
        } else {
            write!(f, "MandateSignature({hex_str})")
        }
    }
}
