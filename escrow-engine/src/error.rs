//! Error types for the escrow engine
//!
//! One variant per rejection the protocol can produce. Every error is
//! returned to the immediate caller and every write operation is
//! all-or-nothing, so an error always leaves state exactly as it was.

use openramp_core::Amount;
use thiserror::Error;

/// Main error type for escrow operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    // Verifier-level rejections. Retryable with a corrected proof.
    /// The proof failed its cryptographic integrity check
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// The proof's message-origin metadata does not match this rail's configuration
    #[error("origin mismatch: expected {expected}, got {actual}")]
    OriginMismatch { expected: String, actual: String },

    /// The payment's status field is not the rail's confirmed-sent sentinel
    #[error("payment not confirmed: status {0}")]
    PaymentNotConfirmed(String),

    /// The payment's claim key was already consumed. Never retryable for
    /// this payment, but the intent itself may be retried with another proof.
    #[error("nullifier has already been used")]
    NullifierReused,

    // Engine-level rejections of signal_intent.
    #[error("intent amount {amount} outside deposit range [{min}, {max}]")]
    AmountOutOfRange {
        amount: Amount,
        min: Amount,
        max: Amount,
    },

    #[error("insufficient liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity {
        requested: Amount,
        available: Amount,
    },

    #[error("deposit is not accepting intents")]
    NotAcceptingIntents,

    #[error("verifier is not configured for this deposit")]
    VerifierNotConfigured,

    #[error("intent cooldown is still active")]
    CooldownActive,

    #[error("a live intent already exists for this owner and deposit")]
    DuplicateIntent,

    // Engine-level rejections of fulfill_intent.
    #[error("intent has expired")]
    IntentExpired,

    #[error("intent has already been fulfilled")]
    AlreadyFulfilled,

    /// The verified payment does not satisfy the intent. Retryable with a
    /// better-matching proof.
    #[error("payment mismatch: {0}")]
    PaymentMismatch(String),

    // Deposit lifecycle rejections.
    #[error("deposit has outstanding intents")]
    OutstandingIntentsExist,

    #[error("deposit amount must be greater than zero")]
    InvalidAmount,

    #[error("intent range is degenerate: min {min}, max {max}")]
    InvalidRange { min: Amount, max: Amount },

    #[error("deposit amount {amount} below configured minimum {minimum}")]
    BelowMinimumDeposit { amount: Amount, minimum: Amount },

    // Lookups.
    #[error("deposit not found")]
    DepositNotFound,

    #[error("intent not found")]
    IntentNotFound,

    // Access control on any privileged or module-scoped call.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Arithmetic that would overflow or a rate that cannot convert the
    /// requested amount. Indicates misconfiguration, never partial state.
    #[error("amount conversion failed: {0}")]
    AmountOverflow(String),
}

impl EscrowError {
    /// Create an unauthorized error
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create an invalid-proof error
    pub fn invalid_proof<S: Into<String>>(msg: S) -> Self {
        Self::InvalidProof(msg.into())
    }

    /// Create a payment-mismatch error
    pub fn payment_mismatch<S: Into<String>>(msg: S) -> Self {
        Self::PaymentMismatch(msg.into())
    }

    /// True for verifier-level rejections a caller may retry with a
    /// corrected proof.
    pub fn is_retryable_proof_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidProof(_)
                | Self::OriginMismatch { .. }
                | Self::PaymentNotConfirmed(_)
                | Self::PaymentMismatch(_)
        )
    }
}
