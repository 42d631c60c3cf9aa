//! # Mandates
//!
//! The data model of the chain: Intent, Cart and Payment mandates, the
//! Payment Request shapes their scopes are built from, the builder that
//! refuses malformed mandates, and the signature envelope.
//!
//! ```text
//!   IntentMandate (user)
//!        ^ parent_id
//!   CartMandate (merchant / shopping agent)   0..1, replaceable until paid
//!        ^ parent_id
//!   PaymentMandate (payment processor)        exactly 1 on success
//! ```
//!
//! `parent_id` is a back-reference by id, never an ownership edge. Chains
//! are plain ordered sequences (see [`crate::transaction::arena`]).

pub mod builder;
pub mod envelope;
pub mod payment_request;
pub mod types;

pub use builder::{check_well_formed, generate_nonce, MandateBuilder, MandateError};
pub use envelope::{EnvelopeError, SignedMandate};
pub use payment_request::{
    Amount, ContactAddress, Currency, PaymentItem, PaymentMethodData, PaymentOptions,
    ShippingOption, ShippingType,
};
pub use types::{CartScope, IntentScope, Mandate, MandateId, MandateKind, PaymentScope, Scope};
