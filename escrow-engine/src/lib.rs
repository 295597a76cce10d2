//! Non-custodial escrow engine settling token deposits against fiat payments
//!
//! This crate implements the write side of the openramp protocol:
//! - Deposits of token liquidity, reservable in bounded increments
//! - Intents: time-bounded reservations pending proof of an off-chain payment
//! - A pluggable verifier family turning rail-specific proofs into PaymentFacts
//! - A write-once nullifier registry guaranteeing every payment settles once

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod nullifier;
pub mod registry;
pub mod verifiers;

use error::EscrowError;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
