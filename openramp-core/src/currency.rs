//! Currency codes and their protocol-level ids
//!
//! Off-chain currencies are addressed by the digest of their upper-case
//! ISO code, so rails that report "EUR" and rails that report "eur" agree
//! on one id.

use crate::Digest32;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> Digest32 {
        currency_id(&self.0)
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest identifying a currency, derived from its upper-case code.
pub fn currency_id(code: &str) -> Digest32 {
    Digest32::of_str(&code.to_ascii_uppercase())
}
