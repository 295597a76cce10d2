//! Signed-attestation verifier
//!
//! Settles rails where a designated notary fetches the payment record from
//! the rail's own interface and signs it. The attestation's recovered
//! signing key must equal the currently configured key exactly; there is no
//! fallback key and no grace period after rotation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use openramp_core::{currency_id, AccountId, Digest32, IntentId, PaymentFact, VerifierId};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, VerifyOnly};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{claim_key, normalize_timestamp_ms, parse_outgoing_amount, RailProof, VerifierCommon};
use crate::{error::EscrowError, nullifier::NullifierRegistry, EscrowResult};

/// The structured payment record a notary attests to.
///
/// Field order is the signing order: the signature covers the SHA-256 of
/// this record's canonical JSON encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttestation {
    /// Request line the notary observed, e.g.
    /// `GET https://rail.example/api/transactions/<transfer id>`
    pub endpoint: String,
    /// Host the record was fetched from
    pub host: String,
    /// Rail-side identifier of the transfer; nullifier input
    pub transfer_id: String,
    /// Rail-side identity of the payee
    pub recipient_id: String,
    /// Raw amount string as the rail reports it; outgoing payments carry a
    /// leading `-`
    pub amount: String,
    /// Currency code as the rail reports it
    pub currency: String,
    /// Rail-side payment status
    pub status: String,
    /// Payment timestamp in milliseconds
    pub timestamp_ms: u64,
    /// The intent this payment was made for
    pub intent_id: IntentId,
}

impl PaymentAttestation {
    /// Digest the notary signs.
    pub fn signing_digest(&self) -> Digest32 {
        // Canonical encoding: serde_json with the struct's field order.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        Digest32::of_bytes(&bytes)
    }
}

/// A payment attestation with its 65-byte recoverable signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAttestation {
    pub attestation: PaymentAttestation,
    /// 64-byte compact signature followed by the recovery id byte
    pub signature: Vec<u8>,
}

impl SignedAttestation {
    /// Sign `attestation` with a notary secret key.
    pub fn sign(attestation: PaymentAttestation, key: &SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let msg = Message::from_digest(attestation.signing_digest().0);
        let (recid, compact) = secp
            .sign_ecdsa_recoverable(&msg, key)
            .serialize_compact();

        let mut signature = compact.to_vec();
        signature.push(recid.to_i32() as u8);
        Self {
            attestation,
            signature,
        }
    }
}

/// Static expectations for one attestation rail instance.
#[derive(Debug, Clone)]
pub struct AttestationConfig {
    /// Endpoint template; `*` stands for the transfer id
    pub expected_endpoint: String,
    /// Host the attestation must have been fetched from
    pub expected_host: String,
    /// The rail's confirmed-sent sentinel, e.g. `COMPLETED`
    pub status_sentinel: String,
    /// Decimal places of the rail's fiat amounts
    pub currency_decimals: u32,
}

/// Verifier for notary-signed payment records.
#[derive(Clone)]
pub struct AttestationVerifier {
    common: VerifierCommon,
    config: AttestationConfig,
    signing_key: PublicKey,
    nullifiers: Arc<NullifierRegistry>,
    secp: Secp256k1<VerifyOnly>,
}

impl AttestationVerifier {
    pub fn new(
        common: VerifierCommon,
        config: AttestationConfig,
        signing_key: PublicKey,
        nullifiers: Arc<NullifierRegistry>,
    ) -> Self {
        Self {
            common,
            config,
            signing_key,
            nullifiers,
            secp: Secp256k1::verification_only(),
        }
    }

    pub fn id(&self) -> &VerifierId {
        &self.common.id
    }

    /// Rotate the expected notary signing key. Proofs signed by the old key
    /// stop verifying immediately.
    pub fn set_signing_key(&mut self, key: PublicKey) {
        self.signing_key = key;
    }

    /// Update the expected message origin.
    pub fn set_expected_origin(&mut self, endpoint: String, host: String) {
        self.config.expected_endpoint = endpoint;
        self.config.expected_host = host;
    }

    pub(crate) async fn process_proof(
        &self,
        caller: &AccountId,
        proof: &RailProof,
    ) -> EscrowResult<PaymentFact> {
        self.common.require_engine(caller)?;

        let signed = match proof {
            RailProof::Attestation(signed) => signed,
            RailProof::Circuit(_) => {
                return Err(EscrowError::invalid_proof(format!(
                    "verifier {} expects attestation proofs",
                    self.common.id
                )))
            }
        };
        let att = &signed.attestation;

        // 1. Cryptographic integrity: recovered key must equal the
        //    configured key exactly.
        let recovered = self.recover_signer(signed)?;
        if recovered != self.signing_key {
            return Err(EscrowError::invalid_proof(
                "attestation signer does not match configured signing key".to_string(),
            ));
        }

        // 2. Message origin.
        let expected_endpoint = self
            .config
            .expected_endpoint
            .replace('*', &att.transfer_id);
        if att.endpoint != expected_endpoint {
            return Err(EscrowError::OriginMismatch {
                expected: expected_endpoint,
                actual: att.endpoint.clone(),
            });
        }
        if att.host != self.config.expected_host {
            return Err(EscrowError::OriginMismatch {
                expected: self.config.expected_host.clone(),
                actual: att.host.clone(),
            });
        }

        // 3. Confirmed-sent status.
        if att.status != self.config.status_sentinel {
            return Err(EscrowError::PaymentNotConfirmed(att.status.clone()));
        }

        // 4. Outgoing amount, scaled to base units.
        let amount = parse_outgoing_amount(&att.amount, self.config.currency_decimals)?;

        // 5. Timestamp normalization with skew buffer.
        let timestamp: DateTime<Utc> =
            normalize_timestamp_ms(att.timestamp_ms, self.common.timestamp_buffer)?;

        // 6. Consume the claim key.
        let key = claim_key(&self.common.id, att.transfer_id.as_bytes());
        self.nullifiers.try_claim(&self.common.id, key).await?;

        debug!(rail = %self.common.id, transfer = %att.transfer_id, "attestation verified");

        // 7. Normalized fact.
        Ok(PaymentFact {
            amount,
            timestamp,
            payer_id_hash: None,
            payee_id_hash: Digest32::of_str(&att.recipient_id),
            currency_id: currency_id(&att.currency),
            bound_intent_id: att.intent_id,
        })
    }

    fn recover_signer(&self, signed: &SignedAttestation) -> EscrowResult<PublicKey> {
        if signed.signature.len() != 65 {
            return Err(EscrowError::invalid_proof(format!(
                "signature must be 65 bytes, got {}",
                signed.signature.len()
            )));
        }
        let recid = RecoveryId::from_i32(signed.signature[64] as i32)
            .map_err(|e| EscrowError::invalid_proof(format!("bad recovery id: {e}")))?;
        let sig = RecoverableSignature::from_compact(&signed.signature[..64], recid)
            .map_err(|e| EscrowError::invalid_proof(format!("malformed signature: {e}")))?;

        let msg = Message::from_digest(signed.attestation.signing_digest().0);
        self.secp
            .recover_ecdsa(&msg, &sig)
            .map_err(|e| EscrowError::invalid_proof(format!("signature recovery failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::rand::thread_rng;

    fn notary_keys() -> (SecretKey, PublicKey) {
        Secp256k1::new().generate_keypair(&mut thread_rng())
    }

    fn verifier(
        notary: PublicKey,
        nullifiers: Arc<NullifierRegistry>,
    ) -> (AttestationVerifier, AccountId) {
        let engine = AccountId::new("engine");
        let common = VerifierCommon::new(VerifierId::new("wire:attest:v1"), engine.clone());
        let config = AttestationConfig {
            expected_endpoint: "GET https://rail.example/api/transactions/*".to_string(),
            expected_host: "rail.example".to_string(),
            status_sentinel: "COMPLETED".to_string(),
            currency_decimals: 6,
        };
        (
            AttestationVerifier::new(common, config, notary, nullifiers),
            engine,
        )
    }

    fn attestation() -> PaymentAttestation {
        PaymentAttestation {
            endpoint: "GET https://rail.example/api/transactions/t-100".to_string(),
            host: "rail.example".to_string(),
            transfer_id: "t-100".to_string(),
            recipient_id: "payee-7".to_string(),
            amount: "-100".to_string(),
            currency: "EUR".to_string(),
            status: "COMPLETED".to_string(),
            timestamp_ms: 1_714_639_475_235,
            intent_id: IntentId::random(),
        }
    }

    async fn allowed_registry(verifier_id: &VerifierId) -> Arc<NullifierRegistry> {
        let owner = AccountId::new("owner");
        let registry = Arc::new(NullifierRegistry::new(owner.clone()));
        registry
            .add_writer(&owner, verifier_id.clone())
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn verifies_a_well_formed_attestation() {
        let (sk, pk) = notary_keys();
        let registry = allowed_registry(&VerifierId::new("wire:attest:v1")).await;
        let (verifier, engine) = verifier(pk, registry);

        let att = attestation();
        let proof = RailProof::Attestation(SignedAttestation::sign(att.clone(), &sk));
        let fact = verifier.process_proof(&engine, &proof).await.unwrap();

        assert_eq!(fact.amount, openramp_core::Amount(100_000_000));
        assert_eq!(fact.timestamp.timestamp(), 1_714_639_475 + 30);
        assert_eq!(fact.payee_id_hash, Digest32::of_str("payee-7"));
        assert_eq!(fact.currency_id, currency_id("EUR"));
        assert_eq!(fact.bound_intent_id, att.intent_id);
    }

    #[tokio::test]
    async fn rejects_wrong_signer() {
        let (_sk, pk) = notary_keys();
        let (other_sk, _) = notary_keys();
        let registry = allowed_registry(&VerifierId::new("wire:attest:v1")).await;
        let (verifier, engine) = verifier(pk, registry);

        let proof = RailProof::Attestation(SignedAttestation::sign(attestation(), &other_sk));
        let err = verifier.process_proof(&engine, &proof).await.unwrap_err();
        assert!(matches!(err, EscrowError::InvalidProof(_)));
    }

    #[tokio::test]
    async fn rejects_tampered_record() {
        let (sk, pk) = notary_keys();
        let registry = allowed_registry(&VerifierId::new("wire:attest:v1")).await;
        let (verifier, engine) = verifier(pk, registry);

        let mut signed = SignedAttestation::sign(attestation(), &sk);
        signed.attestation.amount = "-100000".to_string();
        let err = verifier
            .process_proof(&engine, &RailProof::Attestation(signed))
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidProof(_)));
    }

    #[tokio::test]
    async fn rejects_wrong_host() {
        let (sk, pk) = notary_keys();
        let registry = allowed_registry(&VerifierId::new("wire:attest:v1")).await;
        let (verifier, engine) = verifier(pk, registry);

        let mut att = attestation();
        att.host = "rail.evil.example".to_string();
        let proof = RailProof::Attestation(SignedAttestation::sign(att, &sk));
        let err = verifier.process_proof(&engine, &proof).await.unwrap_err();
        assert!(matches!(err, EscrowError::OriginMismatch { .. }));
    }

    #[tokio::test]
    async fn rejects_pending_payment() {
        let (sk, pk) = notary_keys();
        let registry = allowed_registry(&VerifierId::new("wire:attest:v1")).await;
        let (verifier, engine) = verifier(pk, registry);

        let mut att = attestation();
        att.status = "PENDING".to_string();
        let proof = RailProof::Attestation(SignedAttestation::sign(att, &sk));
        assert_eq!(
            verifier.process_proof(&engine, &proof).await.unwrap_err(),
            EscrowError::PaymentNotConfirmed("PENDING".to_string())
        );
    }

    #[tokio::test]
    async fn rejects_incoming_payment() {
        let (sk, pk) = notary_keys();
        let registry = allowed_registry(&VerifierId::new("wire:attest:v1")).await;
        let (verifier, engine) = verifier(pk, registry);

        let mut att = attestation();
        att.amount = "100".to_string();
        let proof = RailProof::Attestation(SignedAttestation::sign(att, &sk));
        assert!(matches!(
            verifier.process_proof(&engine, &proof).await.unwrap_err(),
            EscrowError::InvalidProof(_)
        ));
    }

    #[tokio::test]
    async fn second_use_of_the_same_transfer_is_nullified() {
        let (sk, pk) = notary_keys();
        let registry = allowed_registry(&VerifierId::new("wire:attest:v1")).await;
        let (verifier, engine) = verifier(pk, registry);

        let proof = RailProof::Attestation(SignedAttestation::sign(attestation(), &sk));
        verifier.process_proof(&engine, &proof).await.unwrap();
        assert_eq!(
            verifier.process_proof(&engine, &proof).await.unwrap_err(),
            EscrowError::NullifierReused
        );
    }

    #[tokio::test]
    async fn only_the_engine_may_call() {
        let (sk, pk) = notary_keys();
        let registry = allowed_registry(&VerifierId::new("wire:attest:v1")).await;
        let (verifier, _engine) = verifier(pk, registry);

        let proof = RailProof::Attestation(SignedAttestation::sign(attestation(), &sk));
        let err = verifier
            .process_proof(&AccountId::new("attacker"), &proof)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn rotation_invalidates_old_signer() {
        let (sk, pk) = notary_keys();
        let registry = allowed_registry(&VerifierId::new("wire:attest:v1")).await;
        let (mut verifier, engine) = verifier(pk, registry);

        let (_new_sk, new_pk) = notary_keys();
        verifier.set_signing_key(new_pk);

        let proof = RailProof::Attestation(SignedAttestation::sign(attestation(), &sk));
        assert!(matches!(
            verifier.process_proof(&engine, &proof).await.unwrap_err(),
            EscrowError::InvalidProof(_)
        ));
    }
}
