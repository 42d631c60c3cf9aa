// Mandate signing and chain validation benchmarks.
//
// Covers canonical serialization, envelope signing and verification, and
// full three-mandate chain validation (signatures dominate).

use chrono::{Duration, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeSet;
use std::sync::Arc;

use ap2_protocol::crypto::keys::SignerKeypair;
use ap2_protocol::mandate::{
    Amount, CartScope, Currency, IntentScope, Mandate, MandateBuilder, PaymentItem,
    PaymentMethodData, PaymentOptions, PaymentScope, SignedMandate,
};
use ap2_protocol::registry::{KeyDirectory, Role, RoleRegistry};
use ap2_protocol::validation::{MandateChainValidator, ReplayGuard, SystemClock};

struct Fixture {
    user: SignerKeypair,
    merchant: SignerKeypair,
    processor: SignerKeypair,
    keys: Arc<KeyDirectory>,
}

impl Fixture {
    fn new() -> Self {
        let user = SignerKeypair::generate();
        let merchant = SignerKeypair::generate();
        let processor = SignerKeypair::generate();
        let mut keys = KeyDirectory::new();
        keys.register(user.public_key(), Role::User, "user");
        keys.register(merchant.public_key(), Role::MerchantAgent, "merchant");
        keys.register(processor.public_key(), Role::PaymentProcessor, "processor");
        Self {
            user,
            merchant,
            processor,
            keys: Arc::new(keys),
        }
    }

    fn cart_mandate(&self, parent: &ap2_protocol::mandate::MandateId, items: usize) -> Mandate {
        let unit = 100u64;
        MandateBuilder::cart(
            parent,
            CartScope {
                merchant: "acme-audio".into(),
                merchant_category: "electronics".into(),
                items: (0..items)
                    .map(|i| PaymentItem::new(format!("item-{i}"), Amount::new(unit, Currency::USD)))
                    .collect(),
                shipping: None,
                total: Amount::new(unit * items as u64, Currency::USD),
                accepted_methods: BTreeSet::from(["CARD".to_string()]),
                shipping_address: None,
                options: PaymentOptions::default(),
            },
        )
        .issuer(Role::MerchantAgent)
        .subject(Role::User)
        .ttl(Duration::minutes(30))
        .build()
        .unwrap()
    }

    /// A fresh valid chain; nonces are random, so every call is replay-free.
    fn chain(&self, items: usize) -> Vec<SignedMandate> {
        let total = 100 * items as u64;
        let intent = MandateBuilder::intent(IntentScope {
            description: "bench".into(),
            merchant_categories: BTreeSet::from(["electronics".to_string()]),
            merchants: None,
            max_total: Amount::new(total, Currency::USD),
            requires_refundability: false,
            user_cart_confirmation_required: false,
            payment_methods: None,
        })
        .issuer(Role::User)
        .subject(Role::ShoppingAgent)
        .issued_at(Utc::now() - Duration::seconds(1))
        .ttl(Duration::hours(1))
        .build()
        .unwrap();
        let intent = SignedMandate::sign(intent, &self.user).unwrap();
        let cart = SignedMandate::sign(self.cart_mandate(&intent.mandate.id, items), &self.merchant).unwrap();
        let payment = MandateBuilder::payment(
            &cart.mandate.id,
            PaymentScope {
                amount: Amount::new(total, Currency::USD),
                method: PaymentMethodData::new("CARD"),
                payer_name: None,
                payer_email: None,
                payer_phone: None,
                shipping_address: None,
            },
        )
        .issuer(Role::PaymentProcessor)
        .subject(Role::CredentialsProvider)
        .ttl(Duration::minutes(10))
        .build()
        .unwrap();
        let payment = SignedMandate::sign(payment, &self.processor).unwrap();
        vec![intent, cart, payment]
    }

    fn validator(&self) -> MandateChainValidator {
        MandateChainValidator::new(
            Arc::new(RoleRegistry::standard()),
            Arc::clone(&self.keys),
            Arc::new(ReplayGuard::new(Duration::zero())),
            Arc::new(SystemClock),
        )
    }
}

fn bench_canonical_bytes(c: &mut Criterion) {
    let f = Fixture::new();
    let chain = f.chain(1);
    let mut group = c.benchmark_group("mandate/canonical_bytes");
    for items in [1usize, 16, 128] {
        let cart = f.cart_mandate(&chain[0].mandate.id, items);
        group.throughput(Throughput::Elements(items as u64));
        group.bench_with_input(BenchmarkId::from_parameter(items), &cart, |b, cart| {
            b.iter(|| cart.canonical_bytes().unwrap());
        });
    }
    group.finish();
}

fn bench_sign_and_verify(c: &mut Criterion) {
    let f = Fixture::new();
    let chain = f.chain(4);
    let cart = chain[1].mandate.clone();

    c.bench_function("envelope/sign_cart", |b| {
        b.iter(|| SignedMandate::sign(cart.clone(), &f.merchant).unwrap());
    });

    let signed = chain[1].clone();
    c.bench_function("envelope/verify_cart", |b| {
        b.iter(|| signed.verify(&f.keys));
    });
}

fn bench_validate_chain(c: &mut Criterion) {
    let f = Fixture::new();
    let mut group = c.benchmark_group("validator/full_chain");
    for items in [1usize, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(items), &items, |b, &items| {
            // Fresh validator per batch keeps the replay set from growing.
            b.iter_batched(
                || (f.validator(), f.chain(items)),
                |(v, chain)| v.validate(&chain),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_canonical_bytes,
    bench_sign_and_verify,
    bench_validate_chain
);
criterion_main!(benches);
