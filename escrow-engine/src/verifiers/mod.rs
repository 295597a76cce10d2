//! Payment verifier family
//!
//! One verifier per payment rail, all satisfying the same `process_proof`
//! contract: validate the proof, normalize the payment into a
//! [`PaymentFact`], and consume the payment's claim key in the
//! [`NullifierRegistry`](crate::nullifier::NullifierRegistry) so it can
//! never unlock funds twice.
//!
//! The set of rails is closed: [`RailVerifier`] enumerates the supported
//! proof shapes and dispatches on the variant, keeping the engine oblivious
//! to rail-specific parsing.

mod attestation;
mod circuit;

pub use attestation::{
    AttestationConfig, AttestationVerifier, PaymentAttestation, SignedAttestation,
};
pub use circuit::{CircuitBackend, CircuitConfig, CircuitProof, CircuitVerifier, SignalsBuilder};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use openramp_core::{AccountId, Amount, Digest32, PaymentFact, VerifierId};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{error::EscrowError, EscrowResult};

/// The proof shapes the engine can settle against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RailProof {
    /// A structured payment record attested by a designated signing key
    Attestation(SignedAttestation),
    /// A succinct circuit proof with committed public outputs
    Circuit(CircuitProof),
}

/// Common contract every rail verifier satisfies.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    fn id(&self) -> &VerifierId;

    /// Verify `proof`, consume its claim key, and return the normalized
    /// payment. Callable only by the escrow engine the verifier was
    /// configured with.
    async fn process_proof(&self, caller: &AccountId, proof: &RailProof)
        -> EscrowResult<PaymentFact>;
}

/// Closed set of rail verifiers, dispatched by the intent's verifier id.
#[derive(Clone)]
pub enum RailVerifier {
    Attestation(AttestationVerifier),
    Circuit(CircuitVerifier),
}

#[async_trait]
impl PaymentVerifier for RailVerifier {
    fn id(&self) -> &VerifierId {
        match self {
            Self::Attestation(v) => v.id(),
            Self::Circuit(v) => v.id(),
        }
    }

    async fn process_proof(
        &self,
        caller: &AccountId,
        proof: &RailProof,
    ) -> EscrowResult<PaymentFact> {
        match self {
            Self::Attestation(v) => v.process_proof(caller, proof).await,
            Self::Circuit(v) => v.process_proof(caller, proof).await,
        }
    }
}

/// Configuration shared by every rail verifier instance.
#[derive(Debug, Clone)]
pub struct VerifierCommon {
    pub id: VerifierId,
    /// The only account allowed to call `process_proof`
    pub engine: AccountId,
    /// Added to payment timestamps to absorb clock skew between the rail
    /// and the engine
    pub timestamp_buffer: Duration,
}

impl VerifierCommon {
    pub fn new(id: VerifierId, engine: AccountId) -> Self {
        Self {
            id,
            engine,
            // The skew observed on supported rails is well under this.
            timestamp_buffer: Duration::seconds(30),
        }
    }

    pub fn with_timestamp_buffer(mut self, buffer: Duration) -> Self {
        self.timestamp_buffer = buffer;
        self
    }

    pub(crate) fn require_engine(&self, caller: &AccountId) -> EscrowResult<()> {
        if caller != &self.engine {
            return Err(EscrowError::unauthorized(format!(
                "{caller} may not call process_proof on {}",
                self.id
            )));
        }
        Ok(())
    }
}

/// Derive the rail-scoped claim key for an underlying payment identifier.
pub fn claim_key(rail: &VerifierId, payment_ref: &[u8]) -> Digest32 {
    Digest32::tagged(rail.rail_name(), payment_ref)
}

/// Normalize a rail timestamp in milliseconds to engine seconds, adding the
/// rail's skew buffer.
pub(crate) fn normalize_timestamp_ms(
    timestamp_ms: u64,
    buffer: Duration,
) -> EscrowResult<DateTime<Utc>> {
    let secs = (timestamp_ms / 1000) as i64;
    let base = Utc
        .timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| EscrowError::invalid_proof(format!("timestamp {timestamp_ms} out of range")))?;
    base.checked_add_signed(buffer)
        .ok_or_else(|| EscrowError::invalid_proof("timestamp overflow".to_string()))
}

/// Parse a rail amount string carrying the outgoing `-` marker into base
/// units at `decimals` precision.
///
/// Incoming payments (no marker) are rejected: only money the payer sent
/// can fulfill an intent.
pub(crate) fn parse_outgoing_amount(raw: &str, decimals: u32) -> EscrowResult<Amount> {
    let magnitude = raw
        .strip_prefix('-')
        .ok_or_else(|| EscrowError::invalid_proof(format!("amount {raw:?} is not an outgoing payment")))?;

    let parsed: Decimal = magnitude
        .parse()
        .map_err(|_| EscrowError::invalid_proof(format!("unparseable amount {raw:?}")))?;
    if parsed.is_sign_negative() {
        return Err(EscrowError::invalid_proof(format!("malformed amount {raw:?}")));
    }

    let scale = Decimal::from(10u64.pow(decimals));
    let scaled = parsed
        .checked_mul(scale)
        .ok_or_else(|| EscrowError::invalid_proof(format!("amount {raw:?} too large")))?;
    if scaled.fract() != Decimal::ZERO {
        return Err(EscrowError::invalid_proof(format!(
            "amount {raw:?} has more than {decimals} decimal places"
        )));
    }
    scaled
        .to_u64()
        .map(Amount)
        .ok_or_else(|| EscrowError::invalid_proof(format!("amount {raw:?} too large")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_amounts_require_the_marker() {
        assert_eq!(parse_outgoing_amount("-100", 6).unwrap(), Amount(100_000_000));
        assert_eq!(parse_outgoing_amount("-100.25", 2).unwrap(), Amount(10_025));
        assert!(parse_outgoing_amount("100", 6).is_err());
        assert!(parse_outgoing_amount("--5", 6).is_err());
        assert!(parse_outgoing_amount("-1.234", 2).is_err());
        assert!(parse_outgoing_amount("-abc", 6).is_err());
    }

    #[test]
    fn timestamps_convert_from_millis_and_add_buffer() {
        let ts = normalize_timestamp_ms(1_714_639_475_235, Duration::seconds(30)).unwrap();
        assert_eq!(ts.timestamp(), 1_714_639_475 + 30);
    }

    #[test]
    fn claim_keys_are_rail_scoped() {
        let a = claim_key(&VerifierId::new("rail-a"), b"t-1");
        let b = claim_key(&VerifierId::new("rail-b"), b"t-1");
        assert_ne!(a, b);
    }
}
