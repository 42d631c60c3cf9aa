//! # Mandate Chain Validator
//!
//! Turns an ordered chain of signed mandates into a single verdict.
//!
//! ## Steps
//!
//! Each step runs over the whole chain, in chain order, before the next
//! step starts. The first failure wins.
//!
//! 1. **Structural** (`BrokenLink`, `InvalidMandate`): non-empty, at most
//!    Intent -> Cart -> Payment, root has no parent, each parent is the
//!    predecessor, ids unique, every mandate well-formed on its own.
//! 2. **Signature** (`InvalidSignature`).
//! 3. **Authority** (`UnauthorizedIssuer`): the issuer role may issue the
//!    kind, and the signer's key is registered to that same role.
//! 4. **Temporal** (`Expired`, `TemporalViolation`).
//! 5. **Scope** (`ScopeViolation`): every mandate narrows its parent.
//! 6. **Replay** (`ReplayDetected`): each new (issuer role, nonce) pair is
//!    unseen. This is the only step with a side effect, and it runs last so
//!    a chain rejected for any other reason consumes no nonces.
//!
//! The cheap structural checks go first; signature verification is the
//! expensive part and only runs on chains that are at least shaped right.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::clock::Clock;
use super::replay::{ReplayGuard, ReplayKey};
use crate::mandate::{
    check_well_formed, CartScope, IntentScope, MandateId, MandateKind, PaymentScope,
    SignedMandate,
};
use crate::registry::{KeyDirectory, RoleRegistry};

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// The rejection kinds a chain can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    InvalidMandate,
    InvalidSignature,
    UnauthorizedIssuer,
    Expired,
    TemporalViolation,
    ScopeViolation,
    ReplayDetected,
    BrokenLink,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidMandate => "InvalidMandate",
            Self::InvalidSignature => "InvalidSignature",
            Self::UnauthorizedIssuer => "UnauthorizedIssuer",
            Self::Expired => "Expired",
            Self::TemporalViolation => "TemporalViolation",
            Self::ScopeViolation => "ScopeViolation",
            Self::ReplayDetected => "ReplayDetected",
            Self::BrokenLink => "BrokenLink",
        };
        f.write_str(s)
    }
}

/// Outcome of validating a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationResult {
    Accepted,
    Rejected {
        reason: RejectReason,
        /// The first failing mandate. `None` only for an empty chain.
        mandate_id: Option<MandateId>,
        detail: String,
    },
}

impl ValidationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Accepted => None,
            Self::Rejected { reason, .. } => Some(*reason),
        }
    }

    pub fn mandate_id(&self) -> Option<&MandateId> {
        match self {
            Self::Accepted => None,
            Self::Rejected { mandate_id, .. } => mandate_id.as_ref(),
        }
    }
}

/// Internal short-circuit carrier; converted to [`ValidationResult`] at the
/// public boundary.
struct Rejection {
    reason: RejectReason,
    mandate_id: Option<MandateId>,
    detail: String,
}

impl Rejection {
    fn at(reason: RejectReason, signed: &SignedMandate, detail: impl Into<String>) -> Self {
        Self {
            reason,
            mandate_id: Some(signed.mandate.id.clone()),
            detail: detail.into(),
        }
    }
}

type StepResult = Result<(), Rejection>;

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Validates mandate chains against the role table, the key directory, the
/// clock, and the shared replay set.
///
/// Cheap to clone; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct MandateChainValidator {
    registry: Arc<RoleRegistry>,
    keys: Arc<KeyDirectory>,
    replay: Arc<ReplayGuard>,
    clock: Arc<dyn Clock>,
    clock_skew: Duration,
}

impl fmt::Debug for MandateChainValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MandateChainValidator")
            .field("keys", &self.keys.len())
            .field("replay", &self.replay)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

impl MandateChainValidator {
    pub fn new(
        registry: Arc<RoleRegistry>,
        keys: Arc<KeyDirectory>,
        replay: Arc<ReplayGuard>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            keys,
            replay,
            clock,
            clock_skew: Duration::zero(),
        }
    }

    /// Tolerate `skew` when comparing expiry against our clock.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    pub fn replay_guard(&self) -> &Arc<ReplayGuard> {
        &self.replay
    }

    /// `true` when `expires_at` is behind our clock, skew included.
    pub fn is_expired(&self, expires_at: DateTime<Utc>) -> bool {
        self.now() > expires_at + self.clock_skew
    }

    /// Validate a complete chain. Every nonce in the chain is checked and,
    /// on acceptance, consumed.
    pub fn validate(&self, chain: &[SignedMandate]) -> ValidationResult {
        self.validate_append(chain, 0)
    }

    /// Validate `chain` where the first `accepted_prefix` mandates were
    /// accepted earlier (and their nonces consumed then). All steps except
    /// replay run over the whole chain; replay runs over the new suffix only.
    pub fn validate_append(&self, chain: &[SignedMandate], accepted_prefix: usize) -> ValidationResult {
        let outcome = self
            .check_structure(chain)
            .and_then(|_| self.check_signatures(chain))
            .and_then(|_| self.check_authority(chain))
            .and_then(|_| self.check_temporal(chain))
            .and_then(|_| self.check_scope(chain))
            .and_then(|_| self.check_replay(chain, accepted_prefix.min(chain.len())));

        match outcome {
            Ok(()) => {
                tracing::debug!(len = chain.len(), "mandate chain accepted");
                ValidationResult::Accepted
            }
            Err(r) => {
                tracing::warn!(
                    reason = %r.reason,
                    mandate_id = r.mandate_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
                    detail = %r.detail,
                    "mandate chain rejected"
                );
                ValidationResult::Rejected {
                    reason: r.reason,
                    mandate_id: r.mandate_id,
                    detail: r.detail,
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // 1. Structural
    // -----------------------------------------------------------------------

    fn check_structure(&self, chain: &[SignedMandate]) -> StepResult {
        let Some(root) = chain.first() else {
            return Err(Rejection {
                reason: RejectReason::BrokenLink,
                mandate_id: None,
                detail: "empty chain".into(),
            });
        };
        if chain.len() > MandateKind::ALL.len() {
            return Err(Rejection::at(
                RejectReason::BrokenLink,
                &chain[MandateKind::ALL.len()],
                format!("chain has {} mandates, at most 3 allowed", chain.len()),
            ));
        }
        if root.mandate.parent_id.is_some() {
            return Err(Rejection::at(
                RejectReason::BrokenLink,
                root,
                "root mandate references a parent",
            ));
        }

        let mut ids = HashSet::with_capacity(chain.len());
        for (i, signed) in chain.iter().enumerate() {
            let m = &signed.mandate;
            let expected = MandateKind::ALL[i];
            if m.kind != expected {
                return Err(Rejection::at(
                    RejectReason::BrokenLink,
                    signed,
                    format!("position {i} must hold a {expected} mandate, found {}", m.kind),
                ));
            }
            if i > 0 && m.parent_id.as_ref() != Some(&chain[i - 1].mandate.id) {
                return Err(Rejection::at(
                    RejectReason::BrokenLink,
                    signed,
                    format!("parent does not match predecessor {}", chain[i - 1].mandate.id),
                ));
            }
            if !ids.insert(&m.id) {
                return Err(Rejection::at(
                    RejectReason::BrokenLink,
                    signed,
                    "duplicate mandate id in chain",
                ));
            }
        }

        for signed in chain {
            check_well_formed(&signed.mandate)
                .map_err(|e| Rejection::at(RejectReason::InvalidMandate, signed, e.to_string()))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 2. Signature
    // -----------------------------------------------------------------------

    fn check_signatures(&self, chain: &[SignedMandate]) -> StepResult {
        for signed in chain {
            signed
                .verify_detailed(&self.keys)
                .map_err(|e| Rejection::at(RejectReason::InvalidSignature, signed, e.to_string()))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 3. Authority
    // -----------------------------------------------------------------------

    fn check_authority(&self, chain: &[SignedMandate]) -> StepResult {
        for signed in chain {
            let m = &signed.mandate;
            if !self.registry.can_issue(m.issuer_role, m.kind) {
                return Err(Rejection::at(
                    RejectReason::UnauthorizedIssuer,
                    signed,
                    format!(
                        "role {} may not issue {} mandates (issuers: {})",
                        m.issuer_role,
                        m.kind,
                        self.registry
                            .issuers_of(m.kind)
                            .iter()
                            .map(|r| r.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                ));
            }
            match self.keys.role_of(&signed.signer) {
                Some(role) if role == m.issuer_role => {}
                Some(role) => {
                    return Err(Rejection::at(
                        RejectReason::UnauthorizedIssuer,
                        signed,
                        format!("signer holds role {role}, mandate claims {}", m.issuer_role),
                    ))
                }
                None => {
                    return Err(Rejection::at(
                        RejectReason::UnauthorizedIssuer,
                        signed,
                        "signer not registered",
                    ))
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 4. Temporal
    // -----------------------------------------------------------------------

    fn check_temporal(&self, chain: &[SignedMandate]) -> StepResult {
        for (i, signed) in chain.iter().enumerate() {
            let m = &signed.mandate;
            if self.is_expired(m.expires_at) {
                return Err(Rejection::at(
                    RejectReason::Expired,
                    signed,
                    format!("expired at {}", m.expires_at),
                ));
            }
            if i > 0 {
                let parent = &chain[i - 1].mandate;
                if m.issued_at < parent.issued_at {
                    return Err(Rejection::at(
                        RejectReason::TemporalViolation,
                        signed,
                        format!(
                            "issued at {} before parent issued at {}",
                            m.issued_at, parent.issued_at
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 5. Scope narrowing
    // -----------------------------------------------------------------------

    fn check_scope(&self, chain: &[SignedMandate]) -> StepResult {
        // Shapes are guaranteed by the structural step.
        let intent = chain.first().and_then(|s| s.mandate.scope.as_intent());
        let cart = chain.get(1).and_then(|s| s.mandate.scope.as_cart());
        let payment = chain.get(2).and_then(|s| s.mandate.scope.as_payment());

        if let (Some(intent), Some(cart)) = (intent, cart) {
            cart_narrows_intent(cart, intent).map_err(|d| {
                Rejection::at(RejectReason::ScopeViolation, &chain[1], d)
            })?;
        }
        if let (Some(cart), Some(payment)) = (cart, payment) {
            payment_matches_cart(payment, cart).map_err(|d| {
                Rejection::at(RejectReason::ScopeViolation, &chain[2], d)
            })?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 6. Replay
    // -----------------------------------------------------------------------

    fn check_replay(&self, chain: &[SignedMandate], accepted_prefix: usize) -> StepResult {
        let mut inserted: Vec<ReplayKey> = Vec::new();
        for signed in &chain[accepted_prefix..] {
            let m = &signed.mandate;
            let key = ReplayKey::new(m.issuer_role, m.nonce.clone());
            if !self.replay.check_and_insert(key.clone(), m.expires_at) {
                for k in &inserted {
                    self.replay.release(k);
                }
                tracing::warn!(mandate_id = %m.id, key = %key, "replay detected");
                return Err(Rejection::at(
                    RejectReason::ReplayDetected,
                    signed,
                    format!("nonce already used by {}", m.issuer_role),
                ));
            }
            inserted.push(key);
        }
        Ok(())
    }
}

/// Cart must stay inside every bound the intent set.
fn cart_narrows_intent(cart: &CartScope, intent: &IntentScope) -> Result<(), String> {
    if cart.total.currency != intent.max_total.currency {
        return Err(format!(
            "cart currency {} differs from intent currency {}",
            cart.total.currency, intent.max_total.currency
        ));
    }
    if cart.total.value > intent.max_total.value {
        return Err(format!(
            "cart total {} exceeds intent maximum {}",
            cart.total, intent.max_total
        ));
    }
    if !intent.merchant_categories.contains(&cart.merchant_category) {
        return Err(format!(
            "merchant category {:?} not allowed by intent",
            cart.merchant_category
        ));
    }
    if let Some(merchants) = &intent.merchants {
        if !merchants.contains(&cart.merchant) {
            return Err(format!("merchant {:?} not allowed by intent", cart.merchant));
        }
    }
    if intent.requires_refundability {
        if let Some(item) = cart.items.iter().find(|i| !i.is_refundable()) {
            return Err(format!("item {:?} is not refundable", item.label));
        }
    }
    if let Some(methods) = &intent.payment_methods {
        if cart.accepted_methods.is_disjoint(methods) {
            return Err("cart accepts none of the intent's payment methods".into());
        }
    }
    Ok(())
}

/// Payment must match the cart exactly: a final total, the same amount and
/// currency, an accepted method, the cart's shipping address, and every
/// payer detail the cart requested.
fn payment_matches_cart(payment: &PaymentScope, cart: &CartScope) -> Result<(), String> {
    if let Some(item) = cart.items.iter().find(|i| i.pending) {
        return Err(format!(
            "cart item {:?} is pending, the cart total is not final",
            item.label
        ));
    }
    if payment.amount.currency != cart.total.currency {
        return Err(format!(
            "payment currency {} differs from cart currency {}",
            payment.amount.currency, cart.total.currency
        ));
    }
    if payment.amount.value != cart.total.value {
        return Err(format!(
            "payment amount {} does not equal cart total {}",
            payment.amount, cart.total
        ));
    }
    if !cart.accepted_methods.contains(&payment.method.supported_methods) {
        return Err(format!(
            "payment method {:?} not accepted by cart",
            payment.method.supported_methods
        ));
    }

    let options = &cart.options;
    match (&cart.shipping_address, &payment.shipping_address) {
        (Some(expected), Some(actual)) if expected != actual => {
            return Err("payment ships to a different address than the cart".into())
        }
        (Some(_), None) => return Err("payment omits the cart's shipping address".into()),
        (None, None) if options.request_shipping => {
            return Err("cart requests shipping but payment has no shipping address".into())
        }
        (None, Some(_)) if !options.request_shipping => {
            return Err("payment carries a shipping address the cart did not request".into())
        }
        _ => {}
    }

    let requested = [
        (options.request_payer_name, &payment.payer_name, "payer_name"),
        (options.request_payer_email, &payment.payer_email, "payer_email"),
        (options.request_payer_phone, &payment.payer_phone, "payer_phone"),
    ];
    for (wanted, value, field) in requested {
        if wanted && value.as_deref().map_or(true, str::is_empty) {
            return Err(format!("cart requests {field} but payment does not carry it"));
        }
    }
    Ok(())
}
