//! Core vocabulary types for the openramp escrow protocol
//!
//! This crate holds the types shared between the escrow engine and the
//! read-side liquidity index: identifiers, base-unit amounts, fixed-point
//! conversion rates, 32-byte digests, currency ids and the PaymentFact
//! produced by payment verifiers.

pub mod amount;
pub mod currency;
pub mod digest;
pub mod ids;
pub mod payment;
pub mod rate;

pub use amount::Amount;
pub use currency::{currency_id, CurrencyCode};
pub use digest::Digest32;
pub use ids::{AccountId, DepositId, IntentId, TokenId, VerifierId};
pub use payment::PaymentFact;
pub use rate::ConversionRate;
