//! # Audit Log
//!
//! Append-only record of every transition attempt on a transaction.
//!
//! ## Integrity
//!
//! Entries are hash-chained the same way blocks are: each entry stores the
//! hash of its predecessor and a BLAKE3 hash over its own fields (plus that
//! predecessor hash). [`AuditLog::verify`] replays the log from `Created`
//! and checks three things:
//!
//! 1. sequence numbers are contiguous from zero and the hash chain is
//!    intact;
//! 2. every accepted entry is a legal edge of the state machine starting
//!    where the previous entry left off;
//! 3. every rejected or refused entry leaves the state unchanged.
//!
//! A log that fails any of these no longer describes a valid path, and the
//! owning transaction halts.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::{TransactionState, Transition};
use crate::crypto::hash::domain_hash;
use crate::mandate::MandateId;
use crate::validation::RejectReason;

const AUDIT_HASH_CONTEXT: &str = "ap2-mandates 2026 audit entry v1";

/// What happened to one transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    /// The transition was applied.
    Accepted,
    /// The validator rejected the submitted chain.
    Rejected(RejectReason),
    /// The transition is not permitted from the current state.
    Refused,
}

impl AuditOutcome {
    fn label(&self) -> String {
        match self {
            Self::Accepted => "accepted".into(),
            Self::Rejected(r) => format!("rejected:{r}"),
            Self::Refused => "refused".into(),
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub transition: Transition,
    pub from: TransactionState,
    pub to: TransactionState,
    pub mandate_id: Option<MandateId>,
    pub outcome: AuditOutcome,
    pub reason: Option<String>,
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
}

impl AuditEntry {
    fn compute_hash(&self) -> [u8; 32] {
        let seq = self.seq.to_le_bytes();
        let ts = self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let mandate = self.mandate_id.as_ref().map(|m| m.as_str()).unwrap_or("");
        let outcome = self.outcome.label();
        let reason = self.reason.as_deref().unwrap_or("");
        domain_hash(
            AUDIT_HASH_CONTEXT,
            &[
                &seq,
                ts.as_bytes(),
                self.transition.as_str().as_bytes(),
                self.from.as_str().as_bytes(),
                self.to.as_str().as_bytes(),
                mandate.as_bytes(),
                outcome.as_bytes(),
                reason.as_bytes(),
                &self.prev_hash,
            ],
        )
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Why an audit log failed verification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("entry {index} has sequence number {seq}")]
    SequenceGap { index: usize, seq: u64 },

    #[error("entry {seq} does not link to its predecessor")]
    BrokenHashChain { seq: u64 },

    #[error("entry {seq} hash does not match its contents")]
    HashMismatch { seq: u64 },

    #[error("entry {seq} starts from {from} but the log is at {expected}")]
    DiscontinuousState {
        seq: u64,
        from: TransactionState,
        expected: TransactionState,
    },

    #[error("entry {seq}: {transition} cannot move {from} to {to}")]
    IllegalEdge {
        seq: u64,
        transition: Transition,
        from: TransactionState,
        to: TransactionState,
    },

    #[error("entry {seq} is not accepted but changes state")]
    RejectedEntryChangedState { seq: u64 },

    #[error("log ends at {log} but record is {record}")]
    FinalStateMismatch {
        log: TransactionState,
        record: TransactionState,
    },
}

/// Parameters of a new entry; `seq` and hashes are filled in by the log.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub timestamp: DateTime<Utc>,
    pub transition: Transition,
    pub from: TransactionState,
    pub to: TransactionState,
    pub mandate_id: Option<MandateId>,
    pub outcome: AuditOutcome,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, draft: AuditDraft) -> &AuditEntry {
        let prev_hash = self.entries.last().map(|e| e.hash).unwrap_or([0u8; 32]);
        let mut entry = AuditEntry {
            seq: self.entries.len() as u64,
            timestamp: draft.timestamp,
            transition: draft.transition,
            from: draft.from,
            to: draft.to,
            mandate_id: draft.mandate_id,
            outcome: draft.outcome,
            reason: draft.reason,
            prev_hash,
            hash: [0u8; 32],
        };
        entry.hash = entry.compute_hash();
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&AuditEntry> {
        self.entries.last()
    }

    /// Replay the log from `Created`; returns the state it ends in.
    pub fn verify(&self) -> Result<TransactionState, IntegrityError> {
        let mut state = TransactionState::Created;
        let mut prev_hash = [0u8; 32];

        for (index, entry) in self.entries.iter().enumerate() {
            if entry.seq != index as u64 {
                return Err(IntegrityError::SequenceGap {
                    index,
                    seq: entry.seq,
                });
            }
            if entry.prev_hash != prev_hash {
                return Err(IntegrityError::BrokenHashChain { seq: entry.seq });
            }
            if entry.compute_hash() != entry.hash {
                return Err(IntegrityError::HashMismatch { seq: entry.seq });
            }
            if entry.from != state {
                return Err(IntegrityError::DiscontinuousState {
                    seq: entry.seq,
                    from: entry.from,
                    expected: state,
                });
            }
            match entry.outcome {
                AuditOutcome::Accepted => {
                    if !entry.transition.is_valid_edge(entry.from, entry.to) {
                        return Err(IntegrityError::IllegalEdge {
                            seq: entry.seq,
                            transition: entry.transition,
                            from: entry.from,
                            to: entry.to,
                        });
                    }
                    state = entry.to;
                }
                AuditOutcome::Rejected(_) | AuditOutcome::Refused => {
                    if entry.to != entry.from {
                        return Err(IntegrityError::RejectedEntryChangedState { seq: entry.seq });
                    }
                }
            }
            prev_hash = entry.hash;
        }
        Ok(state)
    }

    /// Test-only access for corrupting a log on purpose.
    #[cfg(test)]
    pub(crate) fn entries_mut(&mut self) -> &mut Vec<AuditEntry> {
        &mut self.entries
    }
}
