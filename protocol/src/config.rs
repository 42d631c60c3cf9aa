//! # Protocol Configuration & Constants
//!
//! Every magic number in the mandate core lives here, next to the
//! [`ProtocolConfig`] that operators load once at startup.
//!
//! Constants are the parts of the protocol that two parties must agree on
//! byte-for-byte (algorithm identifiers, payload types, schema versions).
//! Changing any of them silently breaks every signature ever produced, so
//! they are not configurable. The knobs in [`ProtocolConfig`] only affect
//! local policy: clock tolerance, how long replay entries are kept, how many
//! rejected submissions a transaction tolerates, and which keys we trust.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mandate::types::MandateKind;
use crate::registry::roles::Role;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Human-readable protocol version reported by the operator binary.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Mandate schema version. Embedded in every mandate and therefore covered
/// by its signature. Bump only with a new canonical layout.
pub const MANDATE_SCHEMA_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Algorithm identifier recorded in every signature envelope. Envelopes
/// carrying anything else fail verification.
pub const SIGNING_ALGORITHM: &str = "Ed25519";

/// Prefix of a signer identity. The remainder is the hex SHA-256 digest of
/// the signer's public key.
pub const SIGNER_IDENTITY_PREFIX: &str = "ed25519:";

/// DSSE payload type bound into the pre-authentication encoding, so a
/// mandate signature can never be replayed as a signature over some other
/// document type.
pub const MANDATE_PAYLOAD_TYPE: &str = "application/vnd.ap2.mandate+json";

/// Ed25519 secret key length in bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Ed25519 public key length in bytes.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Random bytes in a freshly generated nonce (hex-encoded on the wire).
/// 128 bits is enough that collisions between honest issuers never happen.
pub const NONCE_LENGTH: usize = 16;

/// Shortest nonce a mandate may carry, in characters.
pub const MIN_NONCE_CHARS: usize = 16;

// ---------------------------------------------------------------------------
// Policy Defaults
// ---------------------------------------------------------------------------

/// Clock skew tolerated when comparing `expires_at` against our clock.
/// Zero by default: an expired mandate is expired.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(0);

/// Extra time a replay entry is kept after the mandate that used it expired.
pub const DEFAULT_REPLAY_RETENTION_GRACE: Duration = Duration::from_secs(300);

/// Rejected submissions a transaction tolerates before it moves to `Failed`.
pub const DEFAULT_MAX_REJECTIONS: u32 = 3;

/// Command queue depth for a single transaction actor.
pub const TRANSACTION_QUEUE_CAPACITY: usize = 32;

/// Maximum line items in a cart. Keeps canonicalization and scope checks
/// bounded.
pub const MAX_CART_ITEMS: usize = 512;

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`ProtocolConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid trusted key {label}: {reason}")]
    InvalidTrustedKey { label: String, reason: String },
}

/// An additional capability grant on top of the minimum role table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: Role,
    pub kind: MandateKind,
}

/// Extra grants. Grants are additive: the minimum table can be extended but
/// never narrowed from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleGrants {
    pub issue: Vec<RoleGrant>,
    pub consume: Vec<RoleGrant>,
}

/// A signer key the local node trusts, bound to exactly one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedKeyConfig {
    /// Free-form label for logs ("alice", "acme-merchant").
    pub label: String,
    pub role: Role,
    /// Hex-encoded 32-byte Ed25519 public key.
    pub public_key: String,
}

/// Local policy loaded once at startup (YAML).
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub clock_skew_secs: u64,
    pub replay_retention_grace_secs: u64,
    pub max_rejections: u32,
    pub roles: RoleGrants,
    pub trusted_keys: Vec<TrustedKeyConfig>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            clock_skew_secs: DEFAULT_CLOCK_SKEW.as_secs(),
            replay_retention_grace_secs: DEFAULT_REPLAY_RETENTION_GRACE.as_secs(),
            max_rejections: DEFAULT_MAX_REJECTIONS,
            roles: RoleGrants::default(),
            trusted_keys: Vec::new(),
        }
    }
}

impl ProtocolConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(s)?)
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.clock_skew_secs as i64)
    }

    pub fn replay_retention_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.replay_retention_grace_secs as i64)
    }
}
