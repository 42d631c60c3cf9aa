//! Transaction lifecycle states and the transition table.
//!
//! ```text
//! Created -> IntentAuthorized -> CartAuthorized -> PaymentAuthorized -> Settled
//!                                   ^        |
//!                                   +--------+  (cart supersession)
//!
//! any non-terminal --Timeout--> Expired
//! any non-terminal --Abort----> Failed
//! PaymentAuthorized --ConfirmSettlement--> Settled | Failed
//! ```
//!
//! Settled, Failed and Expired are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    Created,
    IntentAuthorized,
    CartAuthorized,
    PaymentAuthorized,
    Settled,
    Failed,
    Expired,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Failed | Self::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::IntentAuthorized => "IntentAuthorized",
            Self::CartAuthorized => "CartAuthorized",
            Self::PaymentAuthorized => "PaymentAuthorized",
            Self::Settled => "Settled",
            Self::Failed => "Failed",
            Self::Expired => "Expired",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// An event that may move a transaction between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    SubmitIntent,
    SubmitCart,
    SubmitPayment,
    ConfirmSettlement,
    Timeout,
    Abort,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SubmitIntent => "SubmitIntent",
            Self::SubmitCart => "SubmitCart",
            Self::SubmitPayment => "SubmitPayment",
            Self::ConfirmSettlement => "ConfirmSettlement",
            Self::Timeout => "Timeout",
            Self::Abort => "Abort",
        }
    }

    /// States this transition may be attempted from.
    pub fn permitted_from(self, from: TransactionState) -> bool {
        use TransactionState::*;
        match self {
            Self::SubmitIntent => from == Created,
            Self::SubmitCart => matches!(from, IntentAuthorized | CartAuthorized),
            Self::SubmitPayment => from == CartAuthorized,
            Self::ConfirmSettlement => from == PaymentAuthorized,
            Self::Timeout | Self::Abort => !from.is_terminal(),
        }
    }

    /// `true` when a *successful* application of this transition may move
    /// `from` to `to`. The audit integrity check replays the log against
    /// this table.
    pub fn is_valid_edge(self, from: TransactionState, to: TransactionState) -> bool {
        use TransactionState::*;
        if !self.permitted_from(from) {
            return false;
        }
        match self {
            Self::SubmitIntent => to == IntentAuthorized,
            Self::SubmitCart => to == CartAuthorized,
            Self::SubmitPayment => to == PaymentAuthorized,
            Self::ConfirmSettlement => matches!(to, Settled | Failed),
            Self::Timeout => to == Expired,
            Self::Abort => to == Failed,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
