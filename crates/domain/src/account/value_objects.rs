//! Value objects for the account domain.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValueError;

/// ISO-4217 style currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Result<Self, ValueError> {
        let code = code.into();
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
            Ok(Self(code))
        } else {
            Err(ValueError::InvalidCurrency(code))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

/// A non-negative amount in minor units (cents) of a currency.
///
/// Arithmetic never mutates; it returns a new value or fails.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Money {
    minor_units: i64,
    currency: Currency,
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Parts {
            minor_units: i64,
            currency: Currency,
        }

        let parts = Parts::deserialize(deserializer)?;
        Money::new(parts.minor_units, parts.currency).map_err(serde::de::Error::custom)
    }
}

impl Money {
    pub fn new(minor_units: i64, currency: Currency) -> Result<Self, ValueError> {
        if minor_units < 0 {
            return Err(ValueError::NegativeAmount(minor_units));
        }
        Ok(Self {
            minor_units,
            currency,
        })
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            minor_units: 0,
            currency,
        }
    }

    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    pub fn is_positive(&self) -> bool {
        self.minor_units > 0
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, ValueError> {
        self.ensure_same_currency(other)?;
        let minor_units = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or(ValueError::Overflow)?;
        Money::new(minor_units, self.currency.clone())
    }

    /// Fails with [`ValueError::NegativeAmount`] when `other` is larger.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, ValueError> {
        self.ensure_same_currency(other)?;
        Money::new(self.minor_units - other.minor_units, self.currency.clone())
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), ValueError> {
        if self.currency != other.currency {
            return Err(ValueError::CurrencyMismatch {
                left: self.currency.to_string(),
                right: other.currency.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.minor_units / 100,
            self.minor_units % 100,
            self.currency
        )
    }
}

/// Name of the person or organisation owning an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountHolder(String);

impl AccountHolder {
    pub const MAX_LEN: usize = 100;

    /// Trims surrounding whitespace and validates length.
    pub fn new(name: impl AsRef<str>) -> Result<Self, ValueError> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(ValueError::EmptyHolderName);
        }
        if name.chars().count() > Self::MAX_LEN {
            return Err(ValueError::HolderNameTooLong { max: Self::MAX_LEN });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountHolder {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccountHolder> for String {
    fn from(holder: AccountHolder) -> Self {
        holder.0
    }
}
