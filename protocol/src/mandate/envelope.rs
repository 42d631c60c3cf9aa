//! # Signature Envelope
//!
//! [`SignedMandate`] wraps a mandate payload with a detached Ed25519
//! signature, the signer's identity and the algorithm identifier.
//!
//! ## Signing flow
//!
//! 1. Serialize the mandate canonically (JCS).
//! 2. Wrap the bytes in the DSSE pre-authentication encoding under
//!    [`MANDATE_PAYLOAD_TYPE`].
//! 3. Sign with Ed25519; record `ed25519:<sha256(pubkey)>` as the signer.
//!
//! Verification repeats steps 1 and 2 on the payload as received and checks
//! the signature against the public key the [`KeyDirectory`] holds for the
//! claimed signer. No chain state is consulted, and every failure (unknown
//! algorithm, unknown signer, bad hex, tampered payload) is a plain `false`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::Mandate;
use crate::config::{MANDATE_PAYLOAD_TYPE, SIGNING_ALGORITHM};
use crate::crypto::canonical::CanonicalError;
use crate::crypto::keys::{MandateSignature, SignerIdentity, SignerKeypair};
use crate::crypto::signatures::{sign_payload, verify_payload, SignatureError};
use crate::registry::keys::KeyDirectory;

/// Why an envelope failed to sign or verify.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("canonical serialization failed: {0}")]
    Canonical(#[from] CanonicalError),

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("unknown signer: {0}")]
    UnknownSigner(SignerIdentity),

    #[error("malformed signature encoding")]
    MalformedSignature,

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// A mandate plus its detached signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMandate {
    pub mandate: Mandate,
    pub algorithm: String,
    pub signer: SignerIdentity,
    /// Hex-encoded 64-byte Ed25519 signature.
    pub signature: String,
}

impl SignedMandate {
    /// Sign `mandate` with `keypair`.
    pub fn sign(mandate: Mandate, keypair: &SignerKeypair) -> Result<Self, EnvelopeError> {
        let payload = mandate.canonical_bytes()?;
        let signature = sign_payload(keypair, MANDATE_PAYLOAD_TYPE, &payload)?;
        Ok(Self {
            mandate,
            algorithm: SIGNING_ALGORITHM.to_owned(),
            signer: keypair.identity(),
            signature: signature.to_hex(),
        })
    }

    /// `true` iff the signature is valid for the current payload under the
    /// key registered for `signer`.
    pub fn verify(&self, keys: &KeyDirectory) -> bool {
        self.verify_detailed(keys).is_ok()
    }

    /// Same as [`verify`](Self::verify) but says why. Meant for logs and the
    /// operator CLI; callers that make decisions should use the boolean.
    pub fn verify_detailed(&self, keys: &KeyDirectory) -> Result<(), EnvelopeError> {
        if self.algorithm != SIGNING_ALGORITHM {
            return Err(EnvelopeError::UnsupportedAlgorithm(self.algorithm.clone()));
        }
        let entry = keys
            .get(&self.signer)
            .ok_or_else(|| EnvelopeError::UnknownSigner(self.signer.clone()))?;
        let signature =
            MandateSignature::from_hex(&self.signature).map_err(|_| EnvelopeError::MalformedSignature)?;
        let payload = self.mandate.canonical_bytes()?;
        verify_payload(&entry.public_key, MANDATE_PAYLOAD_TYPE, &payload, &signature)?;
        Ok(())
    }

    /// Canonical bytes of the whole envelope, for transport.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, CanonicalError> {
        crate::crypto::canonical::to_vec(self)
    }
}
