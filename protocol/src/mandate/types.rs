//! Core mandate types.
//!
//! A [`Mandate`] is an inert value object: an issuer's claim about what the
//! next party in the chain may do. Construction goes through
//! [`MandateBuilder`](super::builder::MandateBuilder), which checks
//! well-formedness. Signing goes through
//! [`SignedMandate::sign`](super::envelope::SignedMandate::sign).
//!
//! Every collection whose order carries no meaning (merchant categories,
//! merchants, accepted methods) is a `BTreeSet`, so two mandates that mean
//! the same thing serialize to the same canonical bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::payment_request::{
    Amount, ContactAddress, PaymentItem, PaymentMethodData, PaymentOptions, ShippingOption,
};
use crate::crypto::canonical::{self, CanonicalError};
use crate::registry::roles::Role;

// ---------------------------------------------------------------------------
// MandateKind
// ---------------------------------------------------------------------------

/// The three links of a mandate chain, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateKind {
    Intent,
    Cart,
    Payment,
}

impl MandateKind {
    pub const ALL: [MandateKind; 3] = [Self::Intent, Self::Cart, Self::Payment];

    /// Position in a chain: Intent 0, Cart 1, Payment 2.
    pub fn index(self) -> usize {
        match self {
            Self::Intent => 0,
            Self::Cart => 1,
            Self::Payment => 2,
        }
    }
}

impl fmt::Display for MandateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intent => write!(f, "Intent"),
            Self::Cart => write!(f, "Cart"),
            Self::Payment => write!(f, "Payment"),
        }
    }
}

// ---------------------------------------------------------------------------
// MandateId
// ---------------------------------------------------------------------------

/// Opaque mandate identifier. Immutable once issued; covered by the
/// signature like every other payload field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MandateId(String);

impl MandateId {
    /// Fresh random id, e.g. `cart-3f1c...`.
    pub fn generate(kind: MandateKind) -> Self {
        let prefix = match kind {
            MandateKind::Intent => "intent",
            MandateKind::Cart => "cart",
            MandateKind::Payment => "payment",
        };
        Self(format!("{prefix}-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MandateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// What the user delegates: which kinds of merchants, up to how much, and
/// under which conditions the agent may proceed without asking again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentScope {
    /// Natural-language description of the purchase ("noise-cancelling
    /// headphones under 100 USD").
    pub description: String,
    /// Allowed merchant categories. Never empty.
    pub merchant_categories: BTreeSet<String>,
    /// When present, only these merchants may produce a cart.
    pub merchants: Option<BTreeSet<String>>,
    /// Upper bound on the cart total, in the intent's currency.
    pub max_total: Amount,
    /// Every cart item must be refundable.
    pub requires_refundability: bool,
    /// Human-present flow: the user wants to confirm the cart before
    /// payment. Carried for agents; the validator does not gate on it.
    pub user_cart_confirmation_required: bool,
    /// When present, the cart must accept at least one of these method
    /// identifiers.
    pub payment_methods: Option<BTreeSet<String>>,
}

/// A concrete cart offered by a merchant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartScope {
    pub merchant: String,
    pub merchant_category: String,
    pub items: Vec<PaymentItem>,
    pub shipping: Option<ShippingOption>,
    /// Must equal the sum of `items` plus `shipping`, all in one currency.
    pub total: Amount,
    /// Payment methods the merchant accepts for this cart.
    pub accepted_methods: BTreeSet<String>,
    /// When set, the payment must ship to exactly this address.
    pub shipping_address: Option<ContactAddress>,
    /// Payer details the payment mandate has to supply.
    #[serde(default)]
    pub options: PaymentOptions,
}

/// The exact payment to execute against a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentScope {
    pub amount: Amount,
    pub method: PaymentMethodData,
    #[serde(default)]
    pub payer_name: Option<String>,
    pub payer_email: Option<String>,
    #[serde(default)]
    pub payer_phone: Option<String>,
    pub shipping_address: Option<ContactAddress>,
}

/// Kind-specific constraints of a mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Intent(IntentScope),
    Cart(CartScope),
    Payment(PaymentScope),
}

impl Scope {
    pub fn kind(&self) -> MandateKind {
        match self {
            Self::Intent(_) => MandateKind::Intent,
            Self::Cart(_) => MandateKind::Cart,
            Self::Payment(_) => MandateKind::Payment,
        }
    }

    pub fn as_intent(&self) -> Option<&IntentScope> {
        match self {
            Self::Intent(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_cart(&self) -> Option<&CartScope> {
        match self {
            Self::Cart(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_payment(&self) -> Option<&PaymentScope> {
        match self {
            Self::Payment(s) => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Mandate
// ---------------------------------------------------------------------------

/// One authorization claim in a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mandate {
    /// Schema version, see [`MANDATE_SCHEMA_VERSION`](crate::config::MANDATE_SCHEMA_VERSION).
    pub version: u16,
    pub id: MandateId,
    pub kind: MandateKind,
    pub issuer_role: Role,
    pub subject_role: Role,
    pub scope: Scope,
    /// The mandate this one narrows. `None` only for the root intent.
    pub parent_id: Option<MandateId>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Single-use token; (issuer role, nonce) may be accepted once.
    pub nonce: String,
}

impl Mandate {
    /// Canonical (JCS) bytes. This is exactly what gets signed.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CanonicalError> {
        canonical::to_vec(self)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
