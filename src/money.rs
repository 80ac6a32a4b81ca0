//! Money Module
//!
//! Currency-tagged decimal amounts. Every amount that reaches the payment API
//! or a settlement rail goes through [`Amount::new`], which enforces the
//! currency's precision.
//!
//! Amounts are never rounded: input with too many fractional digits is
//! rejected rather than truncated.
//!
//! ## Usage
//! ```rust
//! use payflow::money::{Amount, Currency};
//! use rust_decimal::Decimal;
//!
//! let amount = Amount::new(Decimal::new(2050, 2), Currency::Usdt).unwrap();
//! assert_eq!(amount.to_string(), "20.50 USDT");
//! ```

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Money validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Precision overflow: provided {provided} decimals, max allowed {max} for {currency}")]
    PrecisionOverflow {
        provided: u32,
        max: u32,
        currency: Currency,
    },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount exceeds the maximum of {max} {currency}")]
    AmountTooLarge { max: Decimal, currency: Currency },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Currency
// ============================================================================

/// Settlement currencies understood by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Tether on TON / exchange networks
    Usdt,
    /// USD Coin
    Usdc,
    /// Native TON
    Ton,
    /// Platform points, integral only
    Points,
}

impl Currency {
    /// Maximum number of fractional digits accepted for this currency
    pub fn decimals(&self) -> u32 {
        match self {
            Currency::Usdt | Currency::Usdc => 6,
            Currency::Ton => 9,
            Currency::Points => 0,
        }
    }

    /// Upper bound for a single payment
    pub fn max_amount(&self) -> Decimal {
        match self {
            Currency::Usdt | Currency::Usdc => Decimal::from(100_000),
            Currency::Ton => Decimal::from(50_000),
            Currency::Points => Decimal::from(10_000_000),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usdt => "USDT",
            Currency::Usdc => "USDC",
            Currency::Ton => "TON",
            Currency::Points => "POINTS",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USDT" => Ok(Currency::Usdt),
            "USDC" => Ok(Currency::Usdc),
            "TON" => Ok(Currency::Ton),
            "POINTS" => Ok(Currency::Points),
            other => Err(MoneyError::UnsupportedCurrency(other.to_string())),
        }
    }
}

// ============================================================================
// Amount
// ============================================================================

/// A positive decimal amount tagged with its currency
///
/// Deserialization goes through [`Amount::new`], so a stored or received
/// amount obeys the same rules as one built in code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAmount")]
pub struct Amount {
    value: Decimal,
    currency: Currency,
}

#[derive(Deserialize)]
struct RawAmount {
    value: Decimal,
    currency: Currency,
}

impl TryFrom<RawAmount> for Amount {
    type Error = MoneyError;

    fn try_from(raw: RawAmount) -> Result<Self, Self::Error> {
        Amount::new(raw.value, raw.currency)
    }
}

impl Amount {
    /// Validate and build an amount
    ///
    /// # Errors
    /// * `InvalidAmount` - zero or negative
    /// * `PrecisionOverflow` - more fractional digits than the currency allows
    /// * `AmountTooLarge` - above [`Currency::max_amount`]
    pub fn new(value: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        if value.is_sign_negative() || value.is_zero() {
            return Err(MoneyError::InvalidAmount);
        }

        let value = value.normalize();
        if value.scale() > currency.decimals() {
            return Err(MoneyError::PrecisionOverflow {
                provided: value.scale(),
                max: currency.decimals(),
                currency,
            });
        }

        let max = currency.max_amount();
        if value > max {
            return Err(MoneyError::AmountTooLarge { max, currency });
        }

        Ok(Self { value, currency })
    }

    /// Parse a client-entered string such as `"20.5"`
    pub fn parse(amount_str: &str, currency: Currency) -> Result<Self, MoneyError> {
        let trimmed = amount_str.trim();
        if trimmed.is_empty() {
            return Err(MoneyError::InvalidFormat("empty string".into()));
        }
        let value = Decimal::from_str(trimmed)
            .map_err(|e| MoneyError::InvalidFormat(format!("{}: {}", trimmed, e)))?;
        Self::new(value, currency)
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Amount without the currency code, at least two decimals unless the currency is integral
    pub fn format_plain(&self) -> String {
        format!(
            "{:.prec$}",
            self.value,
            prec = self.currency.decimals().min(2).max(self.value.scale()) as usize
        )
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.format_plain(), self.currency)
    }
}
