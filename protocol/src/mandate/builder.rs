//! Mandate construction via the builder pattern.
//!
//! [`MandateBuilder`] collects caller-supplied fields, fills in the ones
//! that are safe to default (id, nonce, issue time, schema version) and
//! refuses to produce a [`Mandate`] that is not well-formed. The same
//! well-formedness check, [`check_well_formed`], runs again inside the
//! chain validator, because a mandate arriving off the wire never went
//! through our builder.
//!
//! The builder does not sign. That happens in [`super::envelope`], which
//! keeps construction testable without key material.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use thiserror::Error;

use super::payment_request::{Amount, Currency};
use super::types::{
    CartScope, IntentScope, Mandate, MandateId, MandateKind, PaymentScope, Scope,
};
use crate::config::{MANDATE_SCHEMA_VERSION, MAX_CART_ITEMS, MIN_NONCE_CHARS, NONCE_LENGTH};
use crate::registry::roles::Role;

/// Why a mandate is not well-formed. Every variant surfaces as the
/// `InvalidMandate` rejection kind.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MandateError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field must not be empty: {0}")]
    EmptyField(&'static str),

    #[error("mandate kind {kind} does not match {scope} scope")]
    KindScopeMismatch { kind: MandateKind, scope: MandateKind },

    #[error("expires_at ({expires_at}) must be after issued_at ({issued_at})")]
    InvalidTimeWindow {
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },

    #[error("root intent mandate must not reference a parent")]
    UnexpectedParent,

    #[error("unsupported mandate schema version {0}")]
    UnsupportedVersion(u16),

    #[error("nonce must be at least {MIN_NONCE_CHARS} visible ASCII characters")]
    InvalidNonce,

    #[error("cart has {0} items, limit is {MAX_CART_ITEMS}")]
    TooManyItems(usize),

    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    #[error("cart total {declared} does not equal items plus shipping ({computed})")]
    TotalMismatch { declared: Amount, computed: Amount },

    #[error("amount overflow while summing cart")]
    AmountOverflow,

    #[error("shipping_type is set but the cart does not request shipping")]
    ShippingTypeWithoutShipping,
}

// ---------------------------------------------------------------------------
// MandateBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Mandate`].
///
/// # Usage
///
/// ```rust
/// use std::collections::BTreeSet;
/// use chrono::Duration;
/// use ap2_protocol::mandate::{Amount, Currency, IntentScope, MandateBuilder};
/// use ap2_protocol::registry::Role;
///
/// let intent = MandateBuilder::intent(IntentScope {
///     description: "headphones".into(),
///     merchant_categories: BTreeSet::from(["electronics".to_string()]),
///     merchants: None,
///     max_total: Amount::new(10_000, Currency::USD),
///     requires_refundability: false,
///     user_cart_confirmation_required: false,
///     payment_methods: None,
/// })
/// .issuer(Role::User)
/// .subject(Role::ShoppingAgent)
/// .ttl(Duration::hours(1))
/// .build()
/// .unwrap();
/// assert!(intent.parent_id.is_none());
/// ```
pub struct MandateBuilder {
    scope: Scope,
    id: Option<MandateId>,
    issuer_role: Option<Role>,
    subject_role: Option<Role>,
    parent_id: Option<MandateId>,
    issued_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    ttl: Option<Duration>,
    nonce: Option<String>,
    version: u16,
}

impl MandateBuilder {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            id: None,
            issuer_role: None,
            subject_role: None,
            parent_id: None,
            issued_at: None,
            expires_at: None,
            ttl: None,
            nonce: None,
            version: MANDATE_SCHEMA_VERSION,
        }
    }

    pub fn intent(scope: IntentScope) -> Self {
        Self::new(Scope::Intent(scope))
    }

    pub fn cart(parent: &MandateId, scope: CartScope) -> Self {
        Self::new(Scope::Cart(scope)).parent(parent.clone())
    }

    pub fn payment(parent: &MandateId, scope: PaymentScope) -> Self {
        Self::new(Scope::Payment(scope)).parent(parent.clone())
    }

    pub fn id(mut self, id: MandateId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn issuer(mut self, role: Role) -> Self {
        self.issuer_role = Some(role);
        self
    }

    pub fn subject(mut self, role: Role) -> Self {
        self.subject_role = Some(role);
        self
    }

    pub fn parent(mut self, parent: MandateId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// Issue time. Defaults to now at build time.
    pub fn issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.issued_at = Some(at);
        self
    }

    /// Absolute expiry. Takes precedence over [`ttl`](Self::ttl).
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Expiry relative to the issue time.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Explicit nonce. Defaults to 16 random bytes, hex-encoded.
    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Only needed to test schema upgrades.
    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    /// Consume the builder. Fails with [`MandateError`] when a required
    /// field is missing or the result is not well-formed.
    pub fn build(self) -> Result<Mandate, MandateError> {
        let kind = self.scope.kind();
        let issuer_role = self.issuer_role.ok_or(MandateError::MissingField("issuer_role"))?;
        let subject_role = self
            .subject_role
            .ok_or(MandateError::MissingField("subject_role"))?;
        let issued_at = self.issued_at.unwrap_or_else(Utc::now);
        let expires_at = match (self.expires_at, self.ttl) {
            (Some(at), _) => at,
            (None, Some(ttl)) => issued_at
                .checked_add_signed(ttl)
                .ok_or(MandateError::MissingField("expires_at"))?,
            (None, None) => return Err(MandateError::MissingField("expires_at")),
        };

        let mandate = Mandate {
            version: self.version,
            id: self.id.unwrap_or_else(|| MandateId::generate(kind)),
            kind,
            issuer_role,
            subject_role,
            scope: self.scope,
            parent_id: self.parent_id,
            issued_at,
            expires_at,
            nonce: self.nonce.unwrap_or_else(generate_nonce),
        };
        check_well_formed(&mandate)?;
        Ok(mandate)
    }
}

/// 16 random bytes from the thread RNG, hex-encoded.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ---------------------------------------------------------------------------
// Well-formedness
// ---------------------------------------------------------------------------

/// Check everything about a single mandate that does not depend on the
/// rest of the chain.
pub fn check_well_formed(m: &Mandate) -> Result<(), MandateError> {
    if m.version != MANDATE_SCHEMA_VERSION {
        return Err(MandateError::UnsupportedVersion(m.version));
    }
    if m.id.as_str().is_empty() {
        return Err(MandateError::EmptyField("id"));
    }
    if m.kind != m.scope.kind() {
        return Err(MandateError::KindScopeMismatch {
            kind: m.kind,
            scope: m.scope.kind(),
        });
    }
    if m.expires_at <= m.issued_at {
        return Err(MandateError::InvalidTimeWindow {
            issued_at: m.issued_at,
            expires_at: m.expires_at,
        });
    }
    if m.nonce.len() < MIN_NONCE_CHARS || !m.nonce.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(MandateError::InvalidNonce);
    }
    match (m.kind, &m.parent_id) {
        (MandateKind::Intent, Some(_)) => return Err(MandateError::UnexpectedParent),
        (MandateKind::Cart | MandateKind::Payment, None) => {
            return Err(MandateError::MissingField("parent_id"))
        }
        _ => {}
    }

    match &m.scope {
        Scope::Intent(s) => check_intent(s),
        Scope::Cart(s) => check_cart(s),
        Scope::Payment(s) => check_payment(s),
    }
}

fn check_intent(s: &IntentScope) -> Result<(), MandateError> {
    if s.merchant_categories.is_empty() || s.merchant_categories.iter().any(|c| c.is_empty()) {
        return Err(MandateError::EmptyField("merchant_categories"));
    }
    // An empty allow-list would authorize nothing; absence means "any".
    if matches!(&s.merchants, Some(set) if set.is_empty()) {
        return Err(MandateError::EmptyField("merchants"));
    }
    if matches!(&s.payment_methods, Some(set) if set.is_empty()) {
        return Err(MandateError::EmptyField("payment_methods"));
    }
    Ok(())
}

fn check_cart(s: &CartScope) -> Result<(), MandateError> {
    if s.merchant.is_empty() {
        return Err(MandateError::EmptyField("merchant"));
    }
    if s.merchant_category.is_empty() {
        return Err(MandateError::EmptyField("merchant_category"));
    }
    if s.items.is_empty() {
        return Err(MandateError::EmptyField("items"));
    }
    if s.items.len() > MAX_CART_ITEMS {
        return Err(MandateError::TooManyItems(s.items.len()));
    }
    if s.accepted_methods.is_empty() {
        return Err(MandateError::EmptyField("accepted_methods"));
    }
    if s.options.shipping_type.is_some() && !s.options.request_shipping {
        return Err(MandateError::ShippingTypeWithoutShipping);
    }

    let currency = &s.total.currency;
    let mut sum = Amount::new(0, currency.clone());
    let priced = s
        .items
        .iter()
        .map(|item| &item.amount)
        .chain(s.shipping.iter().map(|opt| &opt.amount));
    for amount in priced {
        if &amount.currency != currency {
            return Err(MandateError::CurrencyMismatch {
                expected: currency.clone(),
                found: amount.currency.clone(),
            });
        }
        sum = sum.checked_add(amount).ok_or(MandateError::AmountOverflow)?;
    }
    if sum != s.total {
        return Err(MandateError::TotalMismatch {
            declared: s.total.clone(),
            computed: sum,
        });
    }
    Ok(())
}

fn check_payment(s: &PaymentScope) -> Result<(), MandateError> {
    if s.method.supported_methods.is_empty() {
        return Err(MandateError::EmptyField("method.supported_methods"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mandate::payment_request::{
        PaymentItem, PaymentMethodData, PaymentOptions, ShippingOption, ShippingType,
    };
    use std::collections::BTreeSet;

    fn usd(v: u64) -> Amount {
        Amount::new(v, Currency::USD)
    }

    fn intent_scope() -> IntentScope {
        IntentScope {
            description: "headphones".into(),
            merchant_categories: BTreeSet::from(["electronics".to_string()]),
            merchants: None,
            max_total: usd(10_000),
            requires_refundability: false,
            user_cart_confirmation_required: true,
            payment_methods: None,
        }
    }

    fn cart_scope(items: Vec<PaymentItem>, total: Amount) -> CartScope {
        CartScope {
            merchant: "acme".into(),
            merchant_category: "electronics".into(),
            items,
            shipping: None,
            total,
            accepted_methods: BTreeSet::from(["CARD".to_string()]),
            shipping_address: None,
            options: PaymentOptions::default(),
        }
    }

    fn intent_builder() -> MandateBuilder {
        MandateBuilder::intent(intent_scope())
            .issuer(Role::User)
            .subject(Role::ShoppingAgent)
            .ttl(Duration::hours(1))
    }

    #[test]
    fn builds_intent_with_defaults() {
        let m = intent_builder().build().unwrap();
        assert_eq!(m.kind, MandateKind::Intent);
        assert_eq!(m.version, MANDATE_SCHEMA_VERSION);
        assert_eq!(m.nonce.len(), NONCE_LENGTH * 2);
        assert_eq!(m.expires_at - m.issued_at, Duration::hours(1));
        assert!(m.id.as_str().starts_with("intent-"));
    }

    #[test]
    fn missing_expiry_is_rejected() {
        let err = MandateBuilder::intent(intent_scope())
            .issuer(Role::User)
            .subject(Role::ShoppingAgent)
            .build()
            .unwrap_err();
        assert_eq!(err, MandateError::MissingField("expires_at"));
    }

    #[test]
    fn missing_issuer_is_rejected() {
        let err = MandateBuilder::intent(intent_scope())
            .subject(Role::ShoppingAgent)
            .ttl(Duration::hours(1))
            .build()
            .unwrap_err();
        assert_eq!(err, MandateError::MissingField("issuer_role"));
    }

    #[test]
    fn expiry_equal_to_issue_time_is_rejected() {
        let now = Utc::now();
        let err = intent_builder()
            .issued_at(now)
            .expires_at(now)
            .build()
            .unwrap_err();
        assert!(matches!(err, MandateError::InvalidTimeWindow { .. }));
    }

    #[test]
    fn intent_with_parent_is_rejected() {
        let err = intent_builder()
            .parent(MandateId::new("intent-0"))
            .build()
            .unwrap_err();
        assert_eq!(err, MandateError::UnexpectedParent);
    }

    #[test]
    fn empty_categories_are_rejected() {
        let mut scope = intent_scope();
        scope.merchant_categories.clear();
        let err = MandateBuilder::intent(scope)
            .issuer(Role::User)
            .subject(Role::ShoppingAgent)
            .ttl(Duration::hours(1))
            .build()
            .unwrap_err();
        assert_eq!(err, MandateError::EmptyField("merchant_categories"));
    }

    #[test]
    fn cart_totals_must_add_up() {
        let parent = MandateId::new("intent-1");
        let items = vec![
            PaymentItem::new("headphones", usd(7_000)),
            PaymentItem::new("case", usd(500)),
        ];
        let mut scope = cart_scope(items, usd(8_000));
        scope.shipping = Some(ShippingOption {
            id: "std".into(),
            label: "Standard".into(),
            amount: usd(500),
        });
        let ok = MandateBuilder::cart(&parent, scope.clone())
            .issuer(Role::MerchantAgent)
            .subject(Role::User)
            .ttl(Duration::minutes(30))
            .build();
        assert!(ok.is_ok());

        scope.total = usd(9_000);
        let err = MandateBuilder::cart(&parent, scope)
            .issuer(Role::MerchantAgent)
            .subject(Role::User)
            .ttl(Duration::minutes(30))
            .build()
            .unwrap_err();
        assert!(matches!(err, MandateError::TotalMismatch { .. }));
    }

    #[test]
    fn cart_mixed_currency_is_rejected() {
        let items = vec![PaymentItem::new("tea", Amount::new(500, Currency::EUR))];
        let err = MandateBuilder::cart(&MandateId::new("i"), cart_scope(items, usd(500)))
            .issuer(Role::MerchantAgent)
            .subject(Role::User)
            .ttl(Duration::minutes(5))
            .build()
            .unwrap_err();
        assert!(matches!(err, MandateError::CurrencyMismatch { .. }));
    }

    #[test]
    fn empty_cart_is_rejected() {
        let err = MandateBuilder::cart(&MandateId::new("i"), cart_scope(vec![], usd(0)))
            .issuer(Role::MerchantAgent)
            .subject(Role::User)
            .ttl(Duration::minutes(5))
            .build()
            .unwrap_err();
        assert_eq!(err, MandateError::EmptyField("items"));
    }

    #[test]
    fn shipping_type_needs_requested_shipping() {
        let build = |options: PaymentOptions| {
            let mut scope = cart_scope(vec![PaymentItem::new("lamp", usd(900))], usd(900));
            scope.options = options;
            MandateBuilder::cart(&MandateId::new("i"), scope)
                .issuer(Role::MerchantAgent)
                .subject(Role::User)
                .ttl(Duration::minutes(5))
                .build()
        };
        assert!(build(PaymentOptions::shipping(ShippingType::Delivery)).is_ok());

        let mut options = PaymentOptions::shipping(ShippingType::Pickup);
        options.request_shipping = false;
        assert_eq!(build(options).unwrap_err(), MandateError::ShippingTypeWithoutShipping);
    }

    #[test]
    fn payment_requires_parent_and_method() {
        let scope = PaymentScope {
            amount: usd(8_000),
            method: PaymentMethodData::new(""),
            payer_name: None,
            payer_email: None,
            payer_phone: None,
            shipping_address: None,
        };
        let err = MandateBuilder::payment(&MandateId::new("cart-1"), scope.clone())
            .issuer(Role::PaymentProcessor)
            .subject(Role::CredentialsProvider)
            .ttl(Duration::minutes(5))
            .build()
            .unwrap_err();
        assert_eq!(err, MandateError::EmptyField("method.supported_methods"));

        let err = MandateBuilder::new(Scope::Payment(scope))
            .issuer(Role::PaymentProcessor)
            .subject(Role::CredentialsProvider)
            .ttl(Duration::minutes(5))
            .build()
            .unwrap_err();
        assert_eq!(err, MandateError::MissingField("parent_id"));
    }

    #[test]
    fn short_nonce_is_rejected() {
        let err = intent_builder().nonce("abc").build().unwrap_err();
        assert_eq!(err, MandateError::InvalidNonce);
    }

    #[test]
    fn kind_scope_mismatch_is_caught() {
        let mut m = intent_builder().build().unwrap();
        m.kind = MandateKind::Cart;
        assert!(matches!(
            check_well_formed(&m),
            Err(MandateError::KindScopeMismatch { .. })
        ));
    }
}
