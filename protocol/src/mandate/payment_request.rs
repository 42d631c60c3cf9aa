//! Payment Request building blocks carried inside mandate scopes.
//!
//! These mirror the W3C Payment Request API shapes that AP2 agents exchange
//! (`PaymentCurrencyAmount`, `PaymentItem`, `PaymentShippingOption`,
//! `PaymentMethodData`, `PaymentOptions`, `ContactAddress`) with one deliberate difference:
//! amounts are integers in the currency's minor unit. No floating point goes
//! anywhere near a signed amount, which is what keeps the canonical
//! serialization byte-stable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// ISO 4217 currency code.
///
/// Common codes get their own variant; any other well-formed code (three
/// ASCII uppercase letters) lands in [`Currency::Other`]. Parsing always
/// picks the named variant when one exists, so `"USD"` can never become
/// `Other("USD")` and two equal codes always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    BRL,
    JPY,
    Other(String),
}

impl Currency {
    /// Minor-unit exponent, for display only. The protocol itself compares
    /// integer minor units and never rescales.
    pub fn decimals(&self) -> u8 {
        match self {
            Self::JPY => 0,
            _ => 2,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::BRL => "BRL",
            Self::JPY => "JPY",
            Self::Other(code) => code,
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = String;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(format!("invalid ISO 4217 currency code: {code:?}"));
        }
        Ok(match code.as_str() {
            "USD" => Self::USD,
            "EUR" => Self::EUR,
            "GBP" => Self::GBP,
            "BRL" => Self::BRL,
            "JPY" => Self::JPY,
            _ => Self::Other(code),
        })
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.code().to_owned()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// A monetary amount in the smallest unit of `currency`.
/// `Amount::new(8000, Currency::USD)` is 80.00 USD.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    pub currency: Currency,
    pub value: u64,
}

impl Amount {
    pub fn new(value: u64, currency: Currency) -> Self {
        Self { currency, value }
    }

    /// Sum of two amounts. `None` on currency mismatch or overflow.
    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        if self.currency != other.currency {
            return None;
        }
        Some(Amount::new(
            self.value.checked_add(other.value)?,
            self.currency.clone(),
        ))
    }

    /// Human-readable decimal form, e.g. `"80.00 USD"`.
    pub fn display_decimal(&self) -> String {
        let decimals = self.currency.decimals() as u32;
        if decimals == 0 {
            return format!("{} {}", self.value, self.currency);
        }
        let divisor = 10u64.pow(decimals);
        format!(
            "{}.{:0>width$} {}",
            self.value / divisor,
            self.value % divisor,
            self.currency,
            width = decimals as usize
        )
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}

// ---------------------------------------------------------------------------
// Items, shipping, methods, addresses
// ---------------------------------------------------------------------------

/// Default refund window for a line item, in days.
pub const DEFAULT_REFUND_PERIOD_DAYS: u32 = 30;

/// One line item in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentItem {
    pub label: String,
    pub amount: Amount,
    /// Amount may still change (e.g. tax estimated).
    pub pending: bool,
    /// Days during which the item can be refunded. `0` means final sale.
    pub refund_period_days: u32,
}

impl PaymentItem {
    pub fn new(label: impl Into<String>, amount: Amount) -> Self {
        Self {
            label: label.into(),
            amount,
            pending: false,
            refund_period_days: DEFAULT_REFUND_PERIOD_DAYS,
        }
    }

    pub fn final_sale(mut self) -> Self {
        self.refund_period_days = 0;
        self
    }

    pub fn is_refundable(&self) -> bool {
        self.refund_period_days > 0
    }
}

/// The shipping option the shopper selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingOption {
    pub id: String,
    pub label: String,
    pub amount: Amount,
}

/// A payment method identifier plus method-specific details.
///
/// `details` is opaque to the protocol: the Credentials Provider fills it
/// (tokenized card reference, wallet handle) and only the processor reads it.
/// A `BTreeMap` keeps the serialized key order fixed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentMethodData {
    pub supported_methods: String,
    pub details: BTreeMap<String, String>,
}

impl PaymentMethodData {
    pub fn new(supported_methods: impl Into<String>) -> Self {
        Self {
            supported_methods: supported_methods.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// How the goods reach the payer. Meaningful only when shipping is
/// requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingType {
    Shipping,
    Delivery,
    Pickup,
}

/// Payer details a cart asks for, after W3C `PaymentOptions`.
///
/// Each `request_*` flag obliges the payment mandate for the cart to carry
/// the corresponding field. All flags default to off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentOptions {
    pub request_payer_name: bool,
    pub request_payer_email: bool,
    pub request_payer_phone: bool,
    pub request_shipping: bool,
    pub shipping_type: Option<ShippingType>,
}

impl PaymentOptions {
    /// Shipping requested with the given type.
    pub fn shipping(shipping_type: ShippingType) -> Self {
        Self {
            request_shipping: true,
            shipping_type: Some(shipping_type),
            ..Self::default()
        }
    }

    pub fn with_payer_email(mut self) -> Self {
        self.request_payer_email = true;
        self
    }
}

/// Postal address, following the W3C `ContactAddress` field set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactAddress {
    pub recipient: Option<String>,
    pub organization: Option<String>,
    pub address_line: Vec<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub dependent_locality: Option<String>,
    pub postal_code: Option<String>,
    pub sorting_code: Option<String>,
    /// ISO 3166-1 alpha-2.
    pub country: Option<String>,
    pub phone_number: Option<String>,
}
