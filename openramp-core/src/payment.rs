//! The normalized result of successful proof verification

use crate::{Amount, Digest32, IntentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A verified, decoded off-chain payment.
///
/// Produced by a payment verifier after every rail-specific check has
/// passed and the underlying payment's claim key has been consumed. The
/// engine trusts these fields; it only cross-checks them against the intent
/// being fulfilled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFact {
    /// Paid amount in fiat base units, normalized by the verifier.
    pub amount: Amount,
    /// Payment timestamp in seconds, already including the rail's buffer.
    pub timestamp: DateTime<Utc>,
    /// Digest of the payer's rail-side identity.
    pub payer_id_hash: Option<Digest32>,
    /// Digest of the payee's rail-side identity.
    pub payee_id_hash: Digest32,
    /// Currency the payment was made in.
    pub currency_id: Digest32,
    /// Intent this payment was bound to at proof-generation time.
    pub bound_intent_id: IntentId,
}
