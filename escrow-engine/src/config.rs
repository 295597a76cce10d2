//! Engine configuration
//!
//! Expiration, cooldown and fee parameters are deployment inputs, never
//! compile-time constants. `EngineConfig::load` layers an optional TOML file
//! and `OPENRAMP_`-prefixed environment variables over the defaults.

use chrono::Duration;
use openramp_core::{AccountId, Amount};
use serde::Deserialize;

use crate::{error::EscrowError, EscrowResult};

/// Configuration for the escrow engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a signaled intent stays fulfillable
    pub intent_expiration: Duration,
    /// Minimum gap between intents per on-ramper; `None` disables the policy
    pub intent_cooldown: Option<Duration>,
    /// Smallest deposit the engine accepts
    pub min_deposit_amount: Amount,
    /// Protocol fee taken from each fulfillment, in basis points
    pub sustainability_fee_bps: u16,
    /// Recipient of the protocol fee; `None` disables fee collection
    pub fee_recipient: Option<AccountId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            intent_expiration: Duration::seconds(600),
            intent_cooldown: None,
            min_deposit_amount: Amount::ZERO,
            sustainability_fee_bps: 0,
            fee_recipient: None,
        }
    }
}

/// Raw file/env representation of [`EngineConfig`].
#[derive(Debug, Deserialize)]
struct RawEngineConfig {
    intent_expiration_secs: Option<i64>,
    intent_cooldown_secs: Option<i64>,
    min_deposit_amount: Option<u64>,
    sustainability_fee_bps: Option<u16>,
    fee_recipient: Option<String>,
}

impl EngineConfig {
    /// Load configuration, layering `path` (if given) and `OPENRAMP_*`
    /// environment variables over [`EngineConfig::default`].
    pub fn load(path: Option<&str>) -> EscrowResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder =
            builder.add_source(config::Environment::with_prefix("OPENRAMP").try_parsing(true));

        let raw: RawEngineConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| EscrowError::Config(e.to_string()))?;

        let defaults = Self::default();
        Ok(Self {
            intent_expiration: raw
                .intent_expiration_secs
                .map(Duration::seconds)
                .unwrap_or(defaults.intent_expiration),
            intent_cooldown: raw.intent_cooldown_secs.map(Duration::seconds),
            min_deposit_amount: raw
                .min_deposit_amount
                .map(Amount::new)
                .unwrap_or(defaults.min_deposit_amount),
            sustainability_fee_bps: raw
                .sustainability_fee_bps
                .unwrap_or(defaults.sustainability_fee_bps),
            fee_recipient: raw.fee_recipient.map(AccountId::new),
        })
    }
}
