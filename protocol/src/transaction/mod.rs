//! # Transaction Module
//!
//! Lifecycle of one purchase, from the first intent to settlement.
//!
//! ## Architecture
//!
//! ```text
//! state.rs   — TransactionState and the Transition table
//! audit.rs   — hash-chained, append-only audit log with replay verification
//! arena.rs   — every accepted mandate plus the active chain positions
//! record.rs  — TransactionRecord aggregate, ids, settlement, errors
//! machine.rs — submit/settle/timeout/abort transitions on a record
//! engine.rs  — one tokio actor per live transaction, retired once terminal
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Create** — a record starts in `Created` with an empty arena.
//! 2. **Submit** — intent, cart and payment mandates each extend the chain
//!    and are validated against everything accepted before them.
//! 3. **Freeze** — an accepted payment freezes the chain; only the
//!    processor's settlement report may move the record on.
//! 4. **Settle** — `Settled` or `Failed`, both terminal.
//!
//! `Expired` (deadline passed) and `Failed` (abort or rejection budget
//! exhausted) are reachable from every non-terminal state.
//!
//! ## Design Decisions
//!
//! - A rejected submission never changes state. The caller corrects the
//!   mandate and submits a new one with a fresh nonce.
//! - Timeout is a pure function of the clock and the active chain's
//!   earliest expiry, so it is the same on every replica that agrees on time.
//! - A corrupted audit log halts the record permanently; nothing else is
//!   fatal.

pub mod arena;
pub mod audit;
pub mod engine;
pub mod machine;
pub mod record;
pub mod state;

pub use arena::MandateArena;
pub use audit::{AuditEntry, AuditLog, AuditOutcome, IntegrityError};
pub use engine::{EngineError, RecoveryReport, TickReport, TransactionEngine};
pub use record::{Settlement, SettlementReport, TransactionError, TransactionId, TransactionRecord};
pub use state::{TransactionState, Transition};
