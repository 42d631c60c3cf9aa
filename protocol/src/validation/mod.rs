//! # Chain Validation
//!
//! The [`MandateChainValidator`] and the two pieces of context it needs
//! besides the registry: a [`Clock`] and the shared [`ReplayGuard`].
//!
//! The validator is synchronous and side-effect-free apart from the replay
//! set. It never blocks on I/O, so it can run inside a transaction actor
//! without stalling the runtime.

pub mod chain;
pub mod clock;
pub mod replay;

pub use chain::{MandateChainValidator, RejectReason, ValidationResult};
pub use clock::{Clock, ManualClock, SystemClock};
pub use replay::{ReplayGuard, ReplayKey};
