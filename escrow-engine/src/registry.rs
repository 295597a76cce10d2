//! Verifier registry - allow-list and configuration of payment verifiers
//!
//! Owner-mutated, injected into the engine at construction. Holds each
//! rail's verifier instance together with protocol-level options: the fee
//! share its operator earns and whether its intents may be cancelled before
//! expiry.

use std::collections::HashMap;

use openramp_core::{AccountId, Digest32, VerifierId};
use secp256k1::PublicKey;
use tokio::sync::RwLock;
use tracing::info;

use crate::{
    error::EscrowError,
    verifiers::{PaymentVerifier, RailVerifier},
    EscrowResult,
};

/// Protocol options attached to a registered verifier.
#[derive(Debug, Clone)]
pub struct VerifierOptions {
    /// Share of each fulfillment paid to the verifier operator, in bps
    pub fee_share_bps: u16,
    /// Account credited with the fee share
    pub operator: Option<AccountId>,
    /// Whether intent owners may cancel before expiry on this rail
    pub allows_early_cancel: bool,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            fee_share_bps: 0,
            operator: None,
            allows_early_cancel: false,
        }
    }
}

struct RegisteredVerifier {
    verifier: RailVerifier,
    options: VerifierOptions,
}

struct RegistryState {
    verifiers: HashMap<VerifierId, RegisteredVerifier>,
    accept_all: bool,
}

/// Owner-gated allow-list of verifier modules.
pub struct VerifierRegistry {
    owner: AccountId,
    state: RwLock<RegistryState>,
}

impl VerifierRegistry {
    pub fn new(owner: AccountId) -> Self {
        Self {
            owner,
            state: RwLock::new(RegistryState {
                verifiers: HashMap::new(),
                accept_all: false,
            }),
        }
    }

    /// Register a verifier module. Owner-only.
    pub async fn register(
        &self,
        caller: &AccountId,
        verifier: RailVerifier,
        options: VerifierOptions,
    ) -> EscrowResult<()> {
        self.require_owner(caller)?;
        let id = verifier.id().clone();
        info!(verifier = %id, fee_share_bps = options.fee_share_bps, "verifier registered");
        self.state
            .write()
            .await
            .verifiers
            .insert(id, RegisteredVerifier { verifier, options });
        Ok(())
    }

    /// Remove a verifier module. Owner-only. Intents already bound to the
    /// verifier can no longer be fulfilled and will expire.
    pub async fn remove(&self, caller: &AccountId, id: &VerifierId) -> EscrowResult<()> {
        self.require_owner(caller)?;
        info!(verifier = %id, "verifier removed");
        self.state.write().await.verifiers.remove(id);
        Ok(())
    }

    /// When set, deposits may advertise verifiers that are not registered
    /// yet. Fulfillment still requires a registered verifier.
    pub async fn set_accept_all(&self, caller: &AccountId, accept_all: bool) -> EscrowResult<()> {
        self.require_owner(caller)?;
        info!(accept_all, "accept-all verifier policy updated");
        self.state.write().await.accept_all = accept_all;
        Ok(())
    }

    /// Update a verifier's fee share. Owner-only.
    pub async fn set_fee_share(
        &self,
        caller: &AccountId,
        id: &VerifierId,
        fee_share_bps: u16,
        operator: Option<AccountId>,
    ) -> EscrowResult<()> {
        self.require_owner(caller)?;
        let mut state = self.state.write().await;
        let entry = state
            .verifiers
            .get_mut(id)
            .ok_or(EscrowError::VerifierNotConfigured)?;
        entry.options.fee_share_bps = fee_share_bps;
        entry.options.operator = operator;
        Ok(())
    }

    /// Rotate an attestation verifier's expected signing key. Owner-only.
    /// Proofs signed by the previous key stop verifying immediately.
    pub async fn rotate_signing_key(
        &self,
        caller: &AccountId,
        id: &VerifierId,
        key: PublicKey,
    ) -> EscrowResult<()> {
        self.require_owner(caller)?;
        let mut state = self.state.write().await;
        match state.verifiers.get_mut(id) {
            Some(RegisteredVerifier {
                verifier: RailVerifier::Attestation(v),
                ..
            }) => {
                v.set_signing_key(key);
                info!(verifier = %id, "signing key rotated");
                Ok(())
            }
            Some(_) => Err(EscrowError::Config(format!(
                "verifier {id} has no signing key"
            ))),
            None => Err(EscrowError::VerifierNotConfigured),
        }
    }

    /// Update a verifier's expected message-origin metadata. Owner-only.
    pub async fn set_expected_origin(
        &self,
        caller: &AccountId,
        id: &VerifierId,
        origin: ExpectedOrigin,
    ) -> EscrowResult<()> {
        self.require_owner(caller)?;
        let mut state = self.state.write().await;
        let entry = state
            .verifiers
            .get_mut(id)
            .ok_or(EscrowError::VerifierNotConfigured)?;
        match (&mut entry.verifier, origin) {
            (RailVerifier::Attestation(v), ExpectedOrigin::Endpoint { endpoint, host }) => {
                v.set_expected_origin(endpoint, host);
                Ok(())
            }
            (RailVerifier::Circuit(v), ExpectedOrigin::KeysetHash(hash)) => {
                v.set_expected_keyset(hash);
                Ok(())
            }
            _ => Err(EscrowError::Config(format!(
                "origin kind does not match verifier {id}"
            ))),
        }
    }

    /// The verifier instance for `id`, if registered.
    pub async fn get(&self, id: &VerifierId) -> Option<RailVerifier> {
        self.state
            .read()
            .await
            .verifiers
            .get(id)
            .map(|entry| entry.verifier.clone())
    }

    pub async fn options(&self, id: &VerifierId) -> Option<VerifierOptions> {
        self.state
            .read()
            .await
            .verifiers
            .get(id)
            .map(|entry| entry.options.clone())
    }

    /// Whether a deposit may advertise `id` in its verifier configs.
    pub async fn is_usable(&self, id: &VerifierId) -> bool {
        let state = self.state.read().await;
        state.accept_all || state.verifiers.contains_key(id)
    }

    fn require_owner(&self, caller: &AccountId) -> EscrowResult<()> {
        if caller != &self.owner {
            return Err(EscrowError::unauthorized(format!(
                "{caller} is not the registry owner"
            )));
        }
        Ok(())
    }
}

/// Origin metadata update, shaped per proof family.
#[derive(Debug, Clone)]
pub enum ExpectedOrigin {
    Endpoint { endpoint: String, host: String },
    KeysetHash(Digest32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nullifier::NullifierRegistry;
    use crate::verifiers::{AttestationConfig, AttestationVerifier, VerifierCommon};
    use secp256k1::rand::thread_rng;
    use secp256k1::Secp256k1;
    use std::sync::Arc;

    fn attestation_verifier(id: &str) -> RailVerifier {
        let (_, pk) = Secp256k1::new().generate_keypair(&mut thread_rng());
        let nullifiers = Arc::new(NullifierRegistry::new(AccountId::new("owner")));
        RailVerifier::Attestation(AttestationVerifier::new(
            VerifierCommon::new(VerifierId::new(id), AccountId::new("engine")),
            AttestationConfig {
                expected_endpoint: "GET https://rail.example/tx/*".to_string(),
                expected_host: "rail.example".to_string(),
                status_sentinel: "COMPLETED".to_string(),
                currency_decimals: 6,
            },
            pk,
            nullifiers,
        ))
    }

    #[tokio::test]
    async fn registration_is_owner_gated() {
        let owner = AccountId::new("owner");
        let registry = VerifierRegistry::new(owner.clone());

        let err = registry
            .register(
                &AccountId::new("attacker"),
                attestation_verifier("rail-a"),
                VerifierOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::Unauthorized(_)));

        registry
            .register(&owner, attestation_verifier("rail-a"), VerifierOptions::default())
            .await
            .unwrap();
        assert!(registry.is_usable(&VerifierId::new("rail-a")).await);
        assert!(registry.get(&VerifierId::new("rail-a")).await.is_some());
    }

    #[tokio::test]
    async fn accept_all_admits_unregistered_ids() {
        let owner = AccountId::new("owner");
        let registry = VerifierRegistry::new(owner.clone());
        let unknown = VerifierId::new("rail-z");

        assert!(!registry.is_usable(&unknown).await);
        registry.set_accept_all(&owner, true).await.unwrap();
        assert!(registry.is_usable(&unknown).await);
        // Still not fulfillable: no instance registered.
        assert!(registry.get(&unknown).await.is_none());
    }

    #[tokio::test]
    async fn removal_revokes_use() {
        let owner = AccountId::new("owner");
        let registry = VerifierRegistry::new(owner.clone());
        let id = VerifierId::new("rail-a");

        registry
            .register(&owner, attestation_verifier("rail-a"), VerifierOptions::default())
            .await
            .unwrap();
        registry.remove(&owner, &id).await.unwrap();
        assert!(!registry.is_usable(&id).await);
    }

    #[tokio::test]
    async fn fee_share_updates_apply() {
        let owner = AccountId::new("owner");
        let registry = VerifierRegistry::new(owner.clone());
        let id = VerifierId::new("rail-a");

        registry
            .register(&owner, attestation_verifier("rail-a"), VerifierOptions::default())
            .await
            .unwrap();
        registry
            .set_fee_share(&owner, &id, 25, Some(AccountId::new("operator")))
            .await
            .unwrap();

        let options = registry.options(&id).await.unwrap();
        assert_eq!(options.fee_share_bps, 25);
        assert_eq!(options.operator, Some(AccountId::new("operator")));
    }

    #[tokio::test]
    async fn origin_update_rejects_wrong_kind() {
        let owner = AccountId::new("owner");
        let registry = VerifierRegistry::new(owner.clone());
        let id = VerifierId::new("rail-a");

        registry
            .register(&owner, attestation_verifier("rail-a"), VerifierOptions::default())
            .await
            .unwrap();
        let err = registry
            .set_expected_origin(
                &owner,
                &id,
                ExpectedOrigin::KeysetHash(Digest32::of_str("keyset")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::Config(_)));
    }
}
