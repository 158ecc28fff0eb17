//! Value Objects for order fulfillment

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Human-facing short order number (three digits, 100..=999).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct OrderNumber(u16);

impl OrderNumber {
    pub const MIN: u16 = 100;
    pub const MAX: u16 = 999;

    pub fn new(value: u16) -> Result<Self, OrderNumberError> {
        if !(Self::MIN..=Self::MAX).contains(&value) { return Err(OrderNumberError::OutOfRange(value)); }
        Ok(Self(value))
    }

    /// Draws a candidate number; uniqueness is checked by the caller against the store.
    pub fn random<R: rand::Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(Self::MIN..=Self::MAX))
    }

    pub fn value(&self) -> u16 { self.0 }
}

impl TryFrom<u16> for OrderNumber {
    type Error = OrderNumberError;
    fn try_from(value: u16) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<OrderNumber> for u16 {
    fn from(n: OrderNumber) -> u16 { n.0 }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderNumberError {
    #[error("order number {0} is not a three digit number")]
    OutOfRange(u16),
}

/// Recipient phone number, normalized to digits with an optional leading `+`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Phone(String);

impl Phone {
    pub fn new(value: impl Into<String>) -> Result<Self, PhoneError> {
        let raw = value.into();
        let trimmed = raw.trim();
        let (plus, rest) = match trimmed.strip_prefix('+') { Some(r) => ("+", r), None => ("", trimmed) };
        let digits: String = rest.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
        if digits.is_empty() { return Err(PhoneError::Empty); }
        if !digits.chars().all(|c| c.is_ascii_digit()) { return Err(PhoneError::InvalidCharacters); }
        if digits.len() > 15 { return Err(PhoneError::TooLong); }
        Ok(Self(format!("{plus}{digits}")))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for Phone {
    type Error = PhoneError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Phone> for String {
    fn from(p: Phone) -> String { p.0 }
}

impl fmt::Display for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("phone number may only contain digits")]
    InvalidCharacters,
    #[error("phone number is too long")]
    TooLong,
}

pub const DEFAULT_CURRENCY: &str = "BDT";

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_string() } }
    pub fn bdt(amount: Decimal) -> Self { Self::new(amount, DEFAULT_CURRENCY) }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn is_negative(&self) -> bool { self.amount.is_sign_negative() && !self.amount.is_zero() }
    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency { return Err(MoneyError::CurrencyMismatch); }
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }
    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }
}

impl Default for Money { fn default() -> Self { Self::zero(DEFAULT_CURRENCY) } }

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("currency mismatch")]
    CurrencyMismatch,
}
