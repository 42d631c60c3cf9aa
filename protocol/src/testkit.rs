//! Shared fixtures for unit tests: one keypair per role, a populated key
//! directory, a manual clock, and helpers for the canonical
//! headphones-under-100-USD chain.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::crypto::keys::SignerKeypair;
use crate::mandate::{
    Amount, CartScope, Currency, IntentScope, Mandate, MandateBuilder, MandateId, PaymentItem,
    PaymentMethodData, PaymentOptions, PaymentScope, SignedMandate,
};
use crate::registry::{KeyDirectory, Role, RoleRegistry};
use crate::validation::{ManualClock, MandateChainValidator, ReplayGuard};

pub fn usd(value: u64) -> Amount {
    Amount::new(value, Currency::USD)
}

pub struct Parties {
    pub user: SignerKeypair,
    pub shopper: SignerKeypair,
    pub merchant: SignerKeypair,
    pub credentials: SignerKeypair,
    pub processor: SignerKeypair,
    pub keys: Arc<KeyDirectory>,
    pub clock: Arc<ManualClock>,
    pub start: DateTime<Utc>,
}

impl Parties {
    pub fn new() -> Self {
        let user = SignerKeypair::from_seed(&[1u8; 32]);
        let shopper = SignerKeypair::from_seed(&[2u8; 32]);
        let merchant = SignerKeypair::from_seed(&[3u8; 32]);
        let credentials = SignerKeypair::from_seed(&[4u8; 32]);
        let processor = SignerKeypair::from_seed(&[5u8; 32]);

        let mut keys = KeyDirectory::new();
        keys.register(user.public_key(), Role::User, "user");
        keys.register(shopper.public_key(), Role::ShoppingAgent, "shopper");
        keys.register(merchant.public_key(), Role::MerchantAgent, "merchant");
        keys.register(credentials.public_key(), Role::CredentialsProvider, "credentials");
        keys.register(processor.public_key(), Role::PaymentProcessor, "processor");

        let start = Utc::now();
        Self {
            user,
            shopper,
            merchant,
            credentials,
            processor,
            keys: Arc::new(keys),
            clock: Arc::new(ManualClock::new(start)),
            start,
        }
    }

    pub fn validator(&self) -> MandateChainValidator {
        MandateChainValidator::new(
            Arc::new(RoleRegistry::standard()),
            Arc::clone(&self.keys),
            Arc::new(ReplayGuard::new(Duration::zero())),
            self.clock.clone(),
        )
    }

    pub fn intent_mandate(&self, max_total: u64) -> Mandate {
        MandateBuilder::intent(IntentScope {
            description: "noise-cancelling headphones".into(),
            merchant_categories: BTreeSet::from(["electronics".to_string()]),
            merchants: None,
            max_total: usd(max_total),
            requires_refundability: false,
            user_cart_confirmation_required: false,
            payment_methods: None,
        })
        .issuer(Role::User)
        .subject(Role::ShoppingAgent)
        .issued_at(self.start)
        .ttl(Duration::hours(1))
        .build()
        .unwrap()
    }

    pub fn intent(&self, max_total: u64) -> SignedMandate {
        SignedMandate::sign(self.intent_mandate(max_total), &self.user).unwrap()
    }

    pub fn cart_scope(&self, total: u64, category: &str) -> CartScope {
        CartScope {
            merchant: "acme-audio".into(),
            merchant_category: category.into(),
            items: vec![PaymentItem::new("headphones", usd(total))],
            shipping: None,
            total: usd(total),
            accepted_methods: BTreeSet::from(["CARD".to_string()]),
            shipping_address: None,
            options: PaymentOptions::default(),
        }
    }

    pub fn cart_mandate(&self, parent: &MandateId, scope: CartScope) -> Mandate {
        MandateBuilder::cart(parent, scope)
            .issuer(Role::MerchantAgent)
            .subject(Role::User)
            .issued_at(self.start + Duration::minutes(1))
            .ttl(Duration::minutes(30))
            .build()
            .unwrap()
    }

    pub fn cart(&self, parent: &MandateId, total: u64) -> SignedMandate {
        let m = self.cart_mandate(parent, self.cart_scope(total, "electronics"));
        SignedMandate::sign(m, &self.merchant).unwrap()
    }

    pub fn payment_mandate(&self, parent: &MandateId, amount: u64) -> Mandate {
        MandateBuilder::payment(
            parent,
            PaymentScope {
                amount: usd(amount),
                method: PaymentMethodData::new("CARD").with_detail("token", "tok_visa_4242"),
                payer_name: None,
                payer_email: Some("user@example.com".into()),
                payer_phone: None,
                shipping_address: None,
            },
        )
        .issuer(Role::PaymentProcessor)
        .subject(Role::CredentialsProvider)
        .issued_at(self.start + Duration::minutes(2))
        .ttl(Duration::minutes(10))
        .build()
        .unwrap()
    }

    pub fn payment(&self, parent: &MandateId, amount: u64) -> SignedMandate {
        SignedMandate::sign(self.payment_mandate(parent, amount), &self.processor).unwrap()
    }

    /// A valid intent(100) -> cart(80) -> payment(80) chain.
    pub fn happy_chain(&self) -> Vec<SignedMandate> {
        let intent = self.intent(10_000);
        let cart = self.cart(&intent.mandate.id, 8_000);
        let payment = self.payment(&cart.mandate.id, 8_000);
        vec![intent, cart, payment]
    }
}
