//! # Storage Module
//!
//! Persistence for transaction records and the replay-nonce set.
//!
//! ## Design Decisions
//!
//! 1. **sled.** Embedded, pure Rust, no external service. Named trees keep
//!    records, nonces and metadata in separate keyspaces.
//!
//! 2. **Bincode on disk.** Compact and fast. JSON is for the operator CLI
//!    and debugging; bincode is for storage.
//!
//! 3. **Records are stored whole.** A record carries its mandate arena and
//!    audit log, so recovery needs nothing but the record itself. The audit
//!    log is re-verified on load.
//!
//! 4. **One seam.** The engine only sees [`LedgerStore`]; [`LedgerDb`] is
//!    the implementation it is given in production.

pub mod db;
pub mod store;

pub use db::{DbError, DbResult, LedgerDb, NonceEntry};
pub use store::LedgerStore;
