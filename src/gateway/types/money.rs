//! Money types for API boundary enforcement
//!
//! - `StrictDecimal`: Format- and scale-validated input type
//! - `DisplayAmount`: Output formatting, always a JSON string

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transfer::MAX_AMOUNT_SCALE;

// ============================================================================
// StrictDecimal: Format-Validated Decimal at Serde Layer
// ============================================================================

/// Why an amount string was refused before it reached the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountFormatError {
    #[error("Amount cannot be empty")]
    Empty,
    #[error("Invalid format: use 0.5 not .5")]
    BareFraction,
    #[error("Invalid format: use 5.0 not 5.")]
    TrailingPoint,
    #[error("Invalid format: scientific notation not allowed")]
    Exponent,
    #[error("Invalid format: + prefix not allowed")]
    PlusSign,
    #[error("Invalid decimal: {0}")]
    Unparsable(String),
    #[error("Amount cannot be negative")]
    Negative,
    #[error("Amount has more than {MAX_AMOUNT_SCALE} decimal places")]
    Scale,
}

/// Amount as clients must write it: a plain non-negative decimal string
/// with at most `MAX_AMOUNT_SCALE` significant decimal places.
///
/// JSON numbers are refused outright; they would pass through a float
/// before we see them. Zero is accepted here and judged by the
/// coordinator, which owns the business rules.
#[derive(Debug, Clone, Copy)]
pub struct StrictDecimal(Decimal);

impl StrictDecimal {
    pub fn parse(s: &str) -> Result<Self, AmountFormatError> {
        if s.is_empty() {
            return Err(AmountFormatError::Empty);
        }
        match (s.as_bytes()[0], s.as_bytes()[s.len() - 1]) {
            (b'.', _) => return Err(AmountFormatError::BareFraction),
            (_, b'.') => return Err(AmountFormatError::TrailingPoint),
            (b'+', _) => return Err(AmountFormatError::PlusSign),
            _ => {}
        }
        if s.contains(['e', 'E']) {
            return Err(AmountFormatError::Exponent);
        }

        let d = Decimal::from_str(s).map_err(|e| AmountFormatError::Unparsable(e.to_string()))?;
        if d.is_sign_negative() {
            return Err(AmountFormatError::Negative);
        }
        // Trailing zeros are formatting, not precision
        if d.normalize().scale() > MAX_AMOUNT_SCALE {
            return Err(AmountFormatError::Scale);
        }
        Ok(StrictDecimal(d))
    }

    pub fn inner(self) -> Decimal {
        self.0
    }
}

impl std::ops::Deref for StrictDecimal {
    type Target = Decimal;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for StrictDecimal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for StrictDecimal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

// ============================================================================
// DisplayAmount: Output for API Responses
// ============================================================================

/// Monetary output. Serializes as a JSON string so clients never parse a
/// balance through a float.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayAmount(String);

impl DisplayAmount {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Decimal> for DisplayAmount {
    fn from(d: Decimal) -> Self {
        Self(d.to_string())
    }
}

impl std::fmt::Display for DisplayAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for DisplayAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
