//! # Role Registry
//!
//! Which role may issue, and which may consume, each mandate kind.
//!
//! ## Design
//!
//! Capability dispatch is a lookup table (`Role` x `MandateKind` -> bool),
//! not a trait hierarchy. The minimum table is:
//!
//! | Role                 | May issue | May consume |
//! |----------------------|-----------|-------------|
//! | User                 | Intent    |             |
//! | Shopping Agent       | Cart      | Intent      |
//! | Merchant Agent       | Cart      | Intent      |
//! | Credentials Provider |           | Payment     |
//! | Payment Processor    | Payment   | Payment     |
//!
//! Configuration may *add* grants, never remove one. The registry is built
//! once at startup and is read-only afterwards; [`install`] publishes it
//! process-wide and refuses a second installation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::config::{RoleGrant, RoleGrants};
use crate::mandate::types::MandateKind;

/// A protocol participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    ShoppingAgent,
    MerchantAgent,
    CredentialsProvider,
    PaymentProcessor,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Self::User,
        Self::ShoppingAgent,
        Self::MerchantAgent,
        Self::CredentialsProvider,
        Self::PaymentProcessor,
    ];

    fn index(self) -> usize {
        match self {
            Self::User => 0,
            Self::ShoppingAgent => 1,
            Self::MerchantAgent => 2,
            Self::CredentialsProvider => 3,
            Self::PaymentProcessor => 4,
        }
    }

    /// Stable string form, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::ShoppingAgent => "shopping_agent",
            Self::MerchantAgent => "merchant_agent",
            Self::CredentialsProvider => "credentials_provider",
            Self::PaymentProcessor => "payment_processor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| RegistryError::UnknownRole(s.to_owned()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("role registry already installed")]
    AlreadyInstalled,
}

type Table = [[bool; 3]; 5];

// Rows follow `Role::index`, columns follow `MandateKind::index`.
const MIN_ISSUE: Table = [
    [true, false, false],  // User: Intent
    [false, true, false],  // ShoppingAgent: Cart
    [false, true, false],  // MerchantAgent: Cart
    [false, false, false], // CredentialsProvider
    [false, false, true],  // PaymentProcessor: Payment
];

const MIN_CONSUME: Table = [
    [false, false, false], // User
    [true, false, false],  // ShoppingAgent: Intent
    [true, false, false],  // MerchantAgent: Intent
    [false, false, true],  // CredentialsProvider: Payment
    [false, false, true],  // PaymentProcessor: Payment
];

/// Static capability table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRegistry {
    issue: Table,
    consume: Table,
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl RoleRegistry {
    /// The minimum table.
    pub fn standard() -> Self {
        Self {
            issue: MIN_ISSUE,
            consume: MIN_CONSUME,
        }
    }

    /// Minimum table plus the configured extra grants.
    pub fn from_config(grants: &RoleGrants) -> Self {
        let mut registry = Self::standard();
        for RoleGrant { role, kind } in &grants.issue {
            registry.issue[role.index()][kind.index()] = true;
        }
        for RoleGrant { role, kind } in &grants.consume {
            registry.consume[role.index()][kind.index()] = true;
        }
        registry
    }

    pub fn can_issue(&self, role: Role, kind: MandateKind) -> bool {
        self.issue[role.index()][kind.index()]
    }

    pub fn can_consume(&self, role: Role, kind: MandateKind) -> bool {
        self.consume[role.index()][kind.index()]
    }

    /// Every role allowed to issue `kind`.
    pub fn issuers_of(&self, kind: MandateKind) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|r| self.can_issue(*r, kind))
            .collect()
    }
}

static GLOBAL: OnceLock<Arc<RoleRegistry>> = OnceLock::new();

/// Publish the process-wide registry. Only the first call succeeds.
pub fn install(registry: RoleRegistry) -> Result<Arc<RoleRegistry>, RegistryError> {
    let arc = Arc::new(registry);
    GLOBAL
        .set(Arc::clone(&arc))
        .map_err(|_| RegistryError::AlreadyInstalled)?;
    tracing::info!("role registry installed");
    Ok(arc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use MandateKind::*;

    #[test]
    fn standard_table_matches_minimum_grants() {
        let r = RoleRegistry::standard();
        assert!(r.can_issue(Role::User, Intent));
        assert!(!r.can_issue(Role::User, Cart));
        assert!(!r.can_issue(Role::User, Payment));

        assert!(r.can_issue(Role::ShoppingAgent, Cart));
        assert!(r.can_consume(Role::ShoppingAgent, Intent));
        assert!(r.can_issue(Role::MerchantAgent, Cart));
        assert!(r.can_consume(Role::MerchantAgent, Intent));

        assert!(!r.can_issue(Role::CredentialsProvider, Payment));
        assert!(r.can_consume(Role::CredentialsProvider, Payment));

        assert!(r.can_issue(Role::PaymentProcessor, Payment));
        assert!(r.can_consume(Role::PaymentProcessor, Payment));
        assert!(!r.can_consume(Role::User, Intent));
    }

    #[test]
    fn config_grants_are_additive() {
        let grants = RoleGrants {
            issue: vec![RoleGrant {
                role: Role::CredentialsProvider,
                kind: Payment,
            }],
            consume: vec![],
        };
        let r = RoleRegistry::from_config(&grants);
        assert!(r.can_issue(Role::CredentialsProvider, Payment));
        for role in Role::ALL {
            for kind in MandateKind::ALL {
                if RoleRegistry::standard().can_issue(role, kind) {
                    assert!(r.can_issue(role, kind));
                }
            }
        }
    }

    #[test]
    fn issuers_of_cart() {
        assert_eq!(
            RoleRegistry::standard().issuers_of(Cart),
            vec![Role::ShoppingAgent, Role::MerchantAgent]
        );
    }

    #[test]
    fn role_string_roundtrip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
        assert!("wizard".parse::<Role>().is_err());
    }
}
