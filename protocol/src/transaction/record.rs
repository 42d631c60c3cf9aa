//! The per-purchase aggregate: state, mandate arena, audit log and
//! settlement outcome.
//!
//! A record is created in `Created` and mutated only by the transitions in
//! [`super::machine`]. Once terminal it refuses every further transition
//! without touching its log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::arena::MandateArena;
use super::audit::{AuditLog, IntegrityError};
use super::state::{TransactionState, Transition};
use crate::config::DEFAULT_MAX_REJECTIONS;
use crate::mandate::{MandateKind, SignedMandate};
use crate::registry::{Role, RoleRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the payment processor reported back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementReport {
    Settled { processor_reference: String },
    Failed { reason_code: String },
}

/// Settlement as recorded on the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub report: SettlementReport,
    pub recorded_at: DateTime<Utc>,
}

/// Refusals that leave the record untouched (or, for an invalid transition,
/// touched only by the audit entry recording the attempt).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction is terminal ({0}); no further transitions")]
    Terminal(TransactionState),

    #[error("{transition} is not permitted from {state}")]
    InvalidTransition {
        state: TransactionState,
        transition: Transition,
    },

    #[error("state corruption detected: {0}")]
    StateCorruption(#[from] IntegrityError),

    #[error("transaction halted after state corruption")]
    Halted,

    #[error("mandate chain is not frozen yet")]
    NotFrozen,

    #[error("role {role} may not consume payment mandates")]
    NotPermitted { role: Role },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub(crate) id: TransactionId,
    pub(crate) state: TransactionState,
    pub(crate) arena: MandateArena,
    pub(crate) audit: AuditLog,
    pub(crate) settlement: Option<Settlement>,
    pub(crate) rejection_count: u32,
    pub(crate) max_rejections: u32,
    pub(crate) halted: bool,
    pub(crate) created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self::with_max_rejections(created_at, DEFAULT_MAX_REJECTIONS)
    }

    pub fn with_max_rejections(created_at: DateTime<Utc>, max_rejections: u32) -> Self {
        Self {
            id: TransactionId::generate(),
            state: TransactionState::Created,
            arena: MandateArena::new(),
            audit: AuditLog::new(),
            settlement: None,
            rejection_count: 0,
            max_rejections: max_rejections.max(1),
            halted: false,
            created_at,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn arena(&self) -> &MandateArena {
        &self.arena
    }

    pub fn settlement(&self) -> Option<&Settlement> {
        self.settlement.as_ref()
    }

    pub fn rejection_count(&self) -> u32 {
        self.rejection_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Earliest expiry across the active chain. Once it passes, the chain
    /// can never be completed.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.arena
            .active_chain()
            .map(|m| m.mandate.expires_at)
            .min()
    }

    /// Replay the audit log and compare it with the record. On failure the
    /// record is halted for good.
    pub fn verify_integrity(&mut self) -> Result<(), TransactionError> {
        if self.halted {
            return Err(TransactionError::Halted);
        }
        let outcome = self.audit.verify().and_then(|log_state| {
            if log_state == self.state {
                Ok(())
            } else {
                Err(IntegrityError::FinalStateMismatch {
                    log: log_state,
                    record: self.state,
                })
            }
        });
        if let Err(e) = outcome {
            self.halted = true;
            tracing::error!(tx = %self.id, error = %e, "audit log corrupted; transaction halted");
            return Err(TransactionError::StateCorruption(e));
        }
        Ok(())
    }

    /// The frozen [intent, cart, payment] chain, for a role allowed to
    /// consume payment mandates.
    pub fn frozen_chain_for(
        &self,
        role: Role,
        registry: &RoleRegistry,
    ) -> Result<Vec<SignedMandate>, TransactionError> {
        if !registry.can_consume(role, MandateKind::Payment) {
            return Err(TransactionError::NotPermitted { role });
        }
        let frozen = matches!(
            self.state,
            TransactionState::PaymentAuthorized | TransactionState::Settled
        ) || (self.state == TransactionState::Failed && self.settlement.is_some());
        if !frozen || self.arena.active(MandateKind::Payment).is_none() {
            return Err(TransactionError::NotFrozen);
        }
        Ok(self.arena.active_chain().cloned().collect())
    }
}
