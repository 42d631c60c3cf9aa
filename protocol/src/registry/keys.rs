//! Key directory: signer identity -> (public key, role).
//!
//! Each trusted key is bound to exactly one role. The validator uses the
//! binding twice: to find the public key a signature must verify under, and
//! to check that whoever signed a mandate actually holds the role the
//! mandate claims as its issuer.

use std::collections::HashMap;

use crate::config::{ConfigError, TrustedKeyConfig};
use crate::crypto::keys::{SignerIdentity, SignerPublicKey};
use crate::registry::roles::Role;

/// One trusted signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub public_key: SignerPublicKey,
    pub role: Role,
    pub label: String,
}

/// Read-mostly map of trusted signers. Built at startup, then shared behind
/// an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct KeyDirectory {
    entries: HashMap<SignerIdentity, KeyEntry>,
}

impl KeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration, rejecting malformed keys and keys bound to
    /// two different roles.
    pub fn from_config(trusted: &[TrustedKeyConfig]) -> Result<Self, ConfigError> {
        let mut dir = Self::new();
        for cfg in trusted {
            let public_key = SignerPublicKey::from_hex(&cfg.public_key).map_err(|e| {
                ConfigError::InvalidTrustedKey {
                    label: cfg.label.clone(),
                    reason: e.to_string(),
                }
            })?;
            if let Some(existing) = dir.entries.get(&public_key.identity()) {
                if existing.role != cfg.role {
                    return Err(ConfigError::InvalidTrustedKey {
                        label: cfg.label.clone(),
                        reason: format!("key already bound to role {}", existing.role),
                    });
                }
            }
            dir.register(public_key, cfg.role, cfg.label.clone());
        }
        tracing::debug!(keys = dir.len(), "key directory loaded");
        Ok(dir)
    }

    /// Register (or replace) a signer. Returns its identity.
    pub fn register(
        &mut self,
        public_key: SignerPublicKey,
        role: Role,
        label: impl Into<String>,
    ) -> SignerIdentity {
        let identity = public_key.identity();
        self.entries.insert(
            identity.clone(),
            KeyEntry {
                public_key,
                role,
                label: label.into(),
            },
        );
        identity
    }

    pub fn get(&self, identity: &SignerIdentity) -> Option<&KeyEntry> {
        self.entries.get(identity)
    }

    pub fn role_of(&self, identity: &SignerIdentity) -> Option<Role> {
        self.entries.get(identity).map(|e| e.role)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
