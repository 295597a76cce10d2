//! Core data models for the escrow engine
//!
//! Deposits, intents, per-rail verifier configuration and the append-only
//! audit event record. The engine is the only writer of these types.

use chrono::{DateTime, Utc};
use openramp_core::{
    AccountId, Amount, ConversionRate, DepositId, Digest32, IntentId, TokenId, VerifierId,
};
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

/// Bounds on the size of any single intent against a deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRange {
    pub min: Amount,
    pub max: Amount,
}

impl IntentRange {
    pub fn new(min: Amount, max: Amount) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, amount: Amount) -> bool {
        amount >= self.min && amount <= self.max
    }

    /// A range is usable when both bounds are positive and ordered.
    pub fn is_valid(&self) -> bool {
        !self.min.is_zero() && self.min <= self.max
    }
}

/// A currency the deposit accepts on a given rail, with its offered price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyEntry {
    /// Digest of the currency code (see `openramp_core::currency_id`)
    pub currency_id: Digest32,
    /// Fiat base units asked per token base unit
    pub conversion_rate: ConversionRate,
}

/// Gating service that must approve intents against this deposit config.
///
/// The service signs `(deposit_id, amount, recipient, verifier_id)` off-band;
/// the engine checks the recovered key against `signing_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatingService {
    pub id: AccountId,
    pub signing_key: PublicKey,
}

/// Per-rail advertisement attached to a deposit: where the depositor expects
/// to be paid and at which rates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositVerifierConfig {
    pub verifier_id: VerifierId,
    /// Digest of the depositor's rail-side payee identity
    pub payee_details_hash: Digest32,
    pub gating_service: Option<GatingService>,
    pub currencies: Vec<CurrencyEntry>,
}

impl DepositVerifierConfig {
    pub fn rate_for(&self, currency_id: &Digest32) -> Option<ConversionRate> {
        self.currencies
            .iter()
            .find(|c| &c.currency_id == currency_id)
            .map(|c| c.conversion_rate)
    }
}

/// A pool of locked value offered by a liquidity provider.
///
/// Invariant: `remaining_amount + outstanding_amount <= amount` at all times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub depositor: AccountId,
    pub token: TokenId,
    /// Original deposit size, grown by `increase_deposit`
    pub amount: Amount,
    /// Uncommitted liquidity, withdrawable or reservable
    pub remaining_amount: Amount,
    /// Sum of live intents against this deposit
    pub outstanding_amount: Amount,
    pub intent_range: IntentRange,
    pub verifier_configs: Vec<DepositVerifierConfig>,
    pub accepting_intents: bool,
    /// Back-references to live intents
    pub intent_ids: Vec<IntentId>,
    pub created_at: DateTime<Utc>,
}

impl Deposit {
    pub fn verifier_config(&self, verifier_id: &VerifierId) -> Option<&DepositVerifierConfig> {
        self.verifier_configs
            .iter()
            .find(|c| &c.verifier_id == verifier_id)
    }
}

/// Lifecycle of an intent. `Fulfilled` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStatus {
    /// Reservation live, awaiting proof of payment
    Created,
    /// Payment proven, funds released
    Fulfilled,
    /// Reservation released back to the deposit
    Cancelled,
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fulfilled | Self::Cancelled)
    }
}

/// A time-bounded reservation of part of a deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub id: IntentId,
    /// The on-ramper who signaled the intent
    pub owner: AccountId,
    /// Where released funds are credited
    pub recipient: AccountId,
    pub deposit_id: DepositId,
    pub amount: Amount,
    pub verifier_id: VerifierId,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Intent {
    /// Expiry is checked lazily on access; there is no timer.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Live means fulfillable: non-terminal and unexpired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == IntentStatus::Created && !self.is_expired(now)
    }
}

/// View of a deposit with its reclaimable liquidity, as served by the
/// engine's batched read API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositView {
    pub deposit_id: DepositId,
    pub deposit: Deposit,
    /// `remaining_amount` plus reservations whose intents have expired
    pub available_liquidity: Amount,
}

/// What happened, for the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    DepositReceived {
        deposit_id: DepositId,
        depositor: AccountId,
        amount: Amount,
    },
    DepositIncreased {
        deposit_id: DepositId,
        amount: Amount,
    },
    IntentSignaled {
        intent_id: IntentId,
        deposit_id: DepositId,
        owner: AccountId,
        amount: Amount,
    },
    IntentFulfilled {
        intent_id: IntentId,
        deposit_id: DepositId,
        recipient: AccountId,
        amount: Amount,
        fees: Amount,
    },
    IntentPruned {
        intent_id: IntentId,
        deposit_id: DepositId,
    },
    IntentCancelled {
        intent_id: IntentId,
        deposit_id: DepositId,
    },
    FundsReleased {
        intent_id: IntentId,
        deposit_id: DepositId,
        recipient: AccountId,
        amount: Amount,
    },
    DepositWithdrawn {
        deposit_id: DepositId,
        depositor: AccountId,
        amount: Amount,
    },
}

/// Escrow event for the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn intent(expires_in: i64) -> Intent {
        let now = Utc::now();
        Intent {
            id: IntentId::random(),
            owner: AccountId::new("onramper"),
            recipient: AccountId::new("onramper"),
            deposit_id: DepositId(0),
            amount: Amount(100),
            verifier_id: VerifierId::new("test"),
            status: IntentStatus::Created,
            created_at: now,
            expires_at: now + Duration::seconds(expires_in),
        }
    }

    #[test]
    fn range_validity() {
        assert!(IntentRange::new(Amount(10), Amount(500)).is_valid());
        assert!(!IntentRange::new(Amount(0), Amount(500)).is_valid());
        assert!(!IntentRange::new(Amount(500), Amount(10)).is_valid());
    }

    #[test]
    fn expired_intents_are_not_live() {
        let live = intent(600);
        let stale = intent(-1);
        let now = Utc::now();
        assert!(live.is_live(now));
        assert!(stale.is_expired(now));
        assert!(!stale.is_live(now));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!IntentStatus::Created.is_terminal());
        assert!(IntentStatus::Fulfilled.is_terminal());
        assert!(IntentStatus::Cancelled.is_terminal());
    }
}
