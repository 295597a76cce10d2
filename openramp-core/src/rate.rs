//! Fixed-point conversion rates
//!
//! A rate expresses fiat base units per token base unit. All conversion is
//! done in `rust_decimal` fixed point so results are deterministic across
//! platforms; the engine itself never rounds.
//!
//! Rounding convention: the fiat a payer owes is rounded up, the token
//! equivalent of a fiat amount is rounded down. Both directions favor the
//! liquidity provider.

use crate::Amount;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateError {
    #[error("conversion rate must be positive, got {0}")]
    NonPositive(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversionRate(Decimal);

impl ConversionRate {
    pub fn new(rate: Decimal) -> Result<Self, RateError> {
        if rate <= Decimal::ZERO {
            return Err(RateError::NonPositive(rate));
        }
        Ok(Self(rate))
    }

    /// Identity rate: one fiat base unit per token base unit.
    pub fn one() -> Self {
        Self(Decimal::ONE)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Fiat base units required to cover `token_amount`, rounded up.
    ///
    /// Returns `None` when the product does not fit fixed-point range or u64.
    pub fn fiat_required(&self, token_amount: Amount) -> Option<Amount> {
        let tokens = Decimal::from(token_amount.units());
        let fiat = tokens.checked_mul(self.0)?;
        fiat.ceil().to_u64().map(Amount)
    }

    /// Token base units purchasable with `fiat_amount`, rounded down.
    pub fn token_equivalent(&self, fiat_amount: Amount) -> Option<Amount> {
        let fiat = Decimal::from(fiat_amount.units());
        let tokens = fiat.checked_div(self.0)?;
        tokens.floor().to_u64().map(Amount)
    }
}

impl fmt::Display for ConversionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
