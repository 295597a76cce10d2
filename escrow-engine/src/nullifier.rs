//! Nullifier registry - write-once set of payment claim keys
//!
//! Shared by all verifier modules. A claim key is consumed exactly once for
//! the lifetime of the system; there is no deletion. Each rail derives its
//! keys under its own name prefix, so rails can never collide.

use std::collections::HashSet;

use openramp_core::{AccountId, Digest32, VerifierId};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{error::EscrowError, EscrowResult};

/// Append-only registry of consumed claim keys with an owner-maintained
/// allow-list of verifier modules permitted to claim.
pub struct NullifierRegistry {
    owner: AccountId,
    writers: RwLock<HashSet<VerifierId>>,
    used: RwLock<HashSet<Digest32>>,
}

impl NullifierRegistry {
    pub fn new(owner: AccountId) -> Self {
        Self {
            owner,
            writers: RwLock::new(HashSet::new()),
            used: RwLock::new(HashSet::new()),
        }
    }

    /// Consume `key` on behalf of `caller`.
    ///
    /// Check-and-set: fails with `Unauthorized` for callers outside the
    /// allow-list and `NullifierReused` for keys already consumed. A
    /// successful claim can never be undone.
    pub async fn try_claim(&self, caller: &VerifierId, key: Digest32) -> EscrowResult<()> {
        if !self.writers.read().await.contains(caller) {
            return Err(EscrowError::unauthorized(format!(
                "verifier {caller} has no claim permission"
            )));
        }

        let mut used = self.used.write().await;
        if !used.insert(key) {
            return Err(EscrowError::NullifierReused);
        }
        debug!(verifier = %caller, key = %key, "claim key consumed");
        Ok(())
    }

    /// Whether `key` has been consumed. Observability only; the engine
    /// always claims as part of fulfillment rather than checking first.
    pub async fn is_claimed(&self, key: &Digest32) -> bool {
        self.used.read().await.contains(key)
    }

    /// Grant claim permission to a verifier module. Owner-only.
    pub async fn add_writer(&self, caller: &AccountId, verifier: VerifierId) -> EscrowResult<()> {
        self.require_owner(caller)?;
        info!(verifier = %verifier, "claim permission granted");
        self.writers.write().await.insert(verifier);
        Ok(())
    }

    /// Revoke claim permission. Owner-only. Already-consumed keys stay.
    pub async fn remove_writer(&self, caller: &AccountId, verifier: &VerifierId) -> EscrowResult<()> {
        self.require_owner(caller)?;
        info!(verifier = %verifier, "claim permission revoked");
        self.writers.write().await.remove(verifier);
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (NullifierRegistry, AccountId, VerifierId) {
        let owner = AccountId::new("owner");
        let verifier = VerifierId::new("rail-a");
        (NullifierRegistry::new(owner.clone()), owner, verifier)
    }

    #[tokio::test]
    async fn claims_succeed_once() {
        let (reg, owner, verifier) = registry();
        reg.add_writer(&owner, verifier.clone()).await.unwrap();

        let key = Digest32::of_str("transfer-1");
        reg.try_claim(&verifier, key).await.unwrap();
        assert_eq!(
            reg.try_claim(&verifier, key).await,
            Err(EscrowError::NullifierReused)
        );
        assert!(reg.is_claimed(&key).await);
    }

    #[tokio::test]
    async fn unauthorized_writers_cannot_claim() {
        let (reg, _owner, verifier) = registry();
        let key = Digest32::of_str("transfer-1");
        let err = reg.try_claim(&verifier, key).await.unwrap_err();
        assert!(matches!(err, EscrowError::Unauthorized(_)));
        assert!(!reg.is_claimed(&key).await);
    }

    #[tokio::test]
    async fn claim_survives_writer_removal() {
        let (reg, owner, verifier) = registry();
        reg.add_writer(&owner, verifier.clone()).await.unwrap();

        let key = Digest32::of_str("transfer-1");
        reg.try_claim(&verifier, key).await.unwrap();
        reg.remove_writer(&owner, &verifier).await.unwrap();

        // The key stays consumed even after the writer loses permission.
        assert!(reg.is_claimed(&key).await);
        let err = reg.try_claim(&verifier, key).await.unwrap_err();
        assert!(matches!(err, EscrowError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn writer_management_is_owner_gated() {
        let (reg, _owner, verifier) = registry();
        let attacker = AccountId::new("attacker");
        assert!(matches!(
            reg.add_writer(&attacker, verifier.clone()).await,
            Err(EscrowError::Unauthorized(_))
        ));
        assert!(matches!(
            reg.remove_writer(&attacker, &verifier).await,
            Err(EscrowError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn distinct_rails_use_distinct_keys() {
        let (reg, owner, rail_a) = registry();
        let rail_b = VerifierId::new("rail-b");
        reg.add_writer(&owner, rail_a.clone()).await.unwrap();
        reg.add_writer(&owner, rail_b.clone()).await.unwrap();

        // Same underlying transfer id, different rail prefixes: no collision.
        let key_a = Digest32::tagged(rail_a.rail_name(), b"transfer-1");
        let key_b = Digest32::tagged(rail_b.rail_name(), b"transfer-1");
        assert_ne!(key_a, key_b);

        reg.try_claim(&rail_a, key_a).await.unwrap();
        reg.try_claim(&rail_b, key_b).await.unwrap();
    }
}
