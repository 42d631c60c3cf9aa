//! # Payload Signatures
//!
//! Signing and verification of typed payloads using the DSSE v1
//! pre-authentication encoding (PAE):
//!
//! ```text
//! PAE(type, payload) = "DSSEv1" SP LEN(type) SP type SP LEN(payload) SP payload
//! ```
//!
//! Binding the payload type into the signed bytes means a signature over a
//! mandate can never be lifted onto some other document that happens to
//! share the same JSON. Lengths are ASCII decimal byte counts.

use thiserror::Error;

use super::keys::{MandateSignature, SignerKeypair, SignerPublicKey};

/// Why a payload signature did not verify. Kept coarse on purpose: callers
/// learn *that* verification failed, not which byte was wrong.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("payload type must not be empty")]
    EmptyPayloadType,
}

/// Build the DSSE pre-authentication encoding.
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let type_len = payload_type.len().to_string();
    let payload_len = payload.len().to_string();

    let mut out =
        Vec::with_capacity(16 + type_len.len() + payload_type.len() + payload_len.len() + payload.len());
    out.extend_from_slice(b"DSSEv1 ");
    out.extend_from_slice(type_len.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload_type.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload_len.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload);
    out
}

/// Sign `payload` under `payload_type`.
pub fn sign_payload(
    keypair: &SignerKeypair,
    payload_type: &str,
    payload: &[u8],
) -> Result<MandateSignature, SignatureError> {
    if payload_type.is_empty() {
        return Err(SignatureError::EmptyPayloadType);
    }
    Ok(keypair.sign(&pae(payload_type, payload)))
}

/// Verify a signature produced by [`sign_payload`].
pub fn verify_payload(
    public_key: &SignerPublicKey,
    payload_type: &str,
    payload: &[u8],
    signature: &MandateSignature,
) -> Result<(), SignatureError> {
    if payload_type.is_empty() {
        return Err(SignatureError::EmptyPayloadType);
    }
    if public_key.verify(&pae(payload_type, payload), signature) {
        Ok(())
    } else {
        Err(SignatureError::VerificationFailed)
    }
}
