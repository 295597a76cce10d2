//! Circuit-proof verifier
//!
//! Settles rails whose payments are proven by a succinct zero-knowledge
//! circuit. The circuit's public signals already commit the payment fields
//! in hashed form; this verifier only checks satisfiability through an
//! injected backend and decodes the signals. The circuit's internal
//! parsing of the payment record is not re-checked here.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use openramp_core::{AccountId, Amount, Digest32, IntentId, PaymentFact, VerifierId};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{claim_key, RailProof, VerifierCommon};
use crate::{error::EscrowError, nullifier::NullifierRegistry, EscrowResult};

/// Fixed public-signal layout, one 32-byte word per field.
mod signal {
    pub const AMOUNT: usize = 0;
    pub const TIMESTAMP: usize = 1;
    pub const PAYEE_ID_HASH: usize = 2;
    pub const PAYER_ID_HASH: usize = 3;
    pub const CURRENCY_ID: usize = 4;
    pub const INTENT_ID: usize = 5;
    pub const NULLIFIER: usize = 6;
    pub const KEYSET_HASH: usize = 7;
    pub const COUNT: usize = 8;
}

/// A succinct proof plus its public signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitProof {
    pub proof: Vec<u8>,
    pub public_signals: Vec<[u8; 32]>,
}

/// Opaque circuit-satisfiability check.
///
/// The proving system itself is outside this crate; tests substitute a
/// stub, deployments wire the real prover's verification routine.
pub trait CircuitBackend: Send + Sync {
    fn verify_proof(&self, proof: &[u8], public_signals: &[[u8; 32]]) -> bool;
}

/// Static expectations for one circuit rail instance.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Commitment to the key set the circuit verified the payment record
    /// against (mail-server or notary keys). Message-origin metadata.
    pub expected_keyset_hash: Digest32,
}

/// Verifier for circuit-proven payments.
#[derive(Clone)]
pub struct CircuitVerifier {
    common: VerifierCommon,
    config: CircuitConfig,
    backend: Arc<dyn CircuitBackend>,
    nullifiers: Arc<NullifierRegistry>,
}

impl CircuitVerifier {
    pub fn new(
        common: VerifierCommon,
        config: CircuitConfig,
        backend: Arc<dyn CircuitBackend>,
        nullifiers: Arc<NullifierRegistry>,
    ) -> Self {
        Self {
            common,
            config,
            backend,
            nullifiers,
        }
    }

    pub fn id(&self) -> &VerifierId {
        &self.common.id
    }

    /// Rotate the expected key-set commitment.
    pub fn set_expected_keyset(&mut self, keyset_hash: Digest32) {
        self.config.expected_keyset_hash = keyset_hash;
    }

    pub(crate) async fn process_proof(
        &self,
        caller: &AccountId,
        proof: &RailProof,
    ) -> EscrowResult<PaymentFact> {
        self.common.require_engine(caller)?;

        let circuit = match proof {
            RailProof::Circuit(circuit) => circuit,
            RailProof::Attestation(_) => {
                return Err(EscrowError::invalid_proof(format!(
                    "verifier {} expects circuit proofs",
                    self.common.id
                )))
            }
        };

        if circuit.public_signals.len() < signal::COUNT {
            return Err(EscrowError::invalid_proof(format!(
                "expected {} public signals, got {}",
                signal::COUNT,
                circuit.public_signals.len()
            )));
        }

        // 1. Satisfiability, delegated to the opaque backend.
        if !self
            .backend
            .verify_proof(&circuit.proof, &circuit.public_signals)
        {
            return Err(EscrowError::invalid_proof(
                "circuit proof does not verify".to_string(),
            ));
        }

        // 2. Message origin: the committed key set must be the one this
        //    rail instance is configured to trust.
        let keyset = Digest32(circuit.public_signals[signal::KEYSET_HASH]);
        if keyset != self.config.expected_keyset_hash {
            return Err(EscrowError::OriginMismatch {
                expected: self.config.expected_keyset_hash.to_hex(),
                actual: keyset.to_hex(),
            });
        }

        // 3./4. The circuit only proves confirmed, outgoing payments; the
        // amount signal is already unsigned base units.
        let amount = Amount(decode_u64(&circuit.public_signals[signal::AMOUNT]));

        // 5. Timestamp signal is in seconds; apply the skew buffer.
        let secs = decode_u64(&circuit.public_signals[signal::TIMESTAMP]) as i64;
        let timestamp = Utc
            .timestamp_opt(secs, 0)
            .single()
            .and_then(|t| t.checked_add_signed(self.common.timestamp_buffer))
            .ok_or_else(|| EscrowError::invalid_proof(format!("timestamp {secs} out of range")))?;

        let bound_intent_id = decode_intent_id(&circuit.public_signals[signal::INTENT_ID]);

        // 6. Consume the claim key committed by the circuit.
        let key = claim_key(
            &self.common.id,
            &circuit.public_signals[signal::NULLIFIER],
        );
        self.nullifiers.try_claim(&self.common.id, key).await?;

        debug!(rail = %self.common.id, intent = %bound_intent_id, "circuit proof verified");

        // 7. Normalized fact.
        Ok(PaymentFact {
            amount,
            timestamp,
            payer_id_hash: Some(Digest32(circuit.public_signals[signal::PAYER_ID_HASH])),
            payee_id_hash: Digest32(circuit.public_signals[signal::PAYEE_ID_HASH]),
            currency_id: Digest32(circuit.public_signals[signal::CURRENCY_ID]),
            bound_intent_id,
        })
    }
}

/// Big-endian u64 from the last eight bytes of a signal word.
fn decode_u64(word: &[u8; 32]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..32]);
    u64::from_be_bytes(buf)
}

/// Intent id from the first sixteen bytes of a signal word.
fn decode_intent_id(word: &[u8; 32]) -> IntentId {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&word[..16]);
    IntentId(Uuid::from_bytes(buf))
}

/// Builder for the public-signal array; used by tests and proof tooling.
#[derive(Debug, Clone)]
pub struct SignalsBuilder {
    signals: Vec<[u8; 32]>,
}

impl SignalsBuilder {
    pub fn new() -> Self {
        Self {
            signals: vec![[0u8; 32]; signal::COUNT],
        }
    }

    pub fn amount(mut self, amount: Amount) -> Self {
        self.signals[signal::AMOUNT][24..32].copy_from_slice(&amount.units().to_be_bytes());
        self
    }

    pub fn timestamp_secs(mut self, secs: u64) -> Self {
        self.signals[signal::TIMESTAMP][24..32].copy_from_slice(&secs.to_be_bytes());
        self
    }

    pub fn payee_id_hash(mut self, hash: Digest32) -> Self {
        self.signals[signal::PAYEE_ID_HASH] = hash.0;
        self
    }

    pub fn payer_id_hash(mut self, hash: Digest32) -> Self {
        self.signals[signal::PAYER_ID_HASH] = hash.0;
        self
    }

    pub fn currency_id(mut self, id: Digest32) -> Self {
        self.signals[signal::CURRENCY_ID] = id.0;
        self
    }

    pub fn intent_id(mut self, id: IntentId) -> Self {
        self.signals[signal::INTENT_ID][..16].copy_from_slice(id.0.as_bytes());
        self
    }

    pub fn nullifier(mut self, nullifier: Digest32) -> Self {
        self.signals[signal::NULLIFIER] = nullifier.0;
        self
    }

    pub fn keyset_hash(mut self, hash: Digest32) -> Self {
        self.signals[signal::KEYSET_HASH] = hash.0;
        self
    }

    pub fn build(self) -> Vec<[u8; 32]> {
        self.signals
    }
}

impl Default for SignalsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
