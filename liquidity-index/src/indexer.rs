//! Deposit enumeration, pruning and selection
//!
//! `refresh` walks every deposit id the engine has ever issued, minus the
//! cached pruned set, in fixed-size batches. Ids that are withdrawn or can
//! never serve another intent are appended to the prune cache; the rest
//! form the working set, ordered by descending reclaimable liquidity.
//! Selection is a pure query over the working set.

use std::collections::HashSet;
use std::sync::Arc;

use escrow_engine::engine::EscrowEngine;
use escrow_engine::models::DepositView;
use openramp_core::{AccountId, Amount, ConversionRate, DepositId, Digest32, VerifierId};
use tracing::{debug, info};

use crate::cache::{CacheKey, PruneStore};
use crate::IndexResult;

/// Configuration for the liquidity indexer
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Namespace of the persisted prune cache
    pub cache_key: CacheKey,
    /// Deposits fetched per read-API call
    pub batch_size: usize,
}

impl IndexerConfig {
    pub fn new(cache_key: CacheKey) -> Self {
        Self {
            cache_key,
            batch_size: 30,
        }
    }
}

/// An indicative selection result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub deposit_id: DepositId,
    /// Token amount the caller can reserve on this deposit
    pub token_amount: Amount,
    pub conversion_rate: ConversionRate,
}

/// Read-side index over one engine instance.
pub struct LiquidityIndexer {
    engine: Arc<EscrowEngine>,
    store: Arc<dyn PruneStore>,
    config: IndexerConfig,
    pruned: HashSet<DepositId>,
    working: Vec<DepositView>,
}

impl LiquidityIndexer {
    /// Create an indexer, loading previously pruned ids from the store.
    pub async fn new(
        engine: Arc<EscrowEngine>,
        store: Arc<dyn PruneStore>,
        config: IndexerConfig,
    ) -> IndexResult<Self> {
        let pruned = store
            .load(&config.cache_key)
            .await?
            .into_iter()
            .collect::<HashSet<_>>();
        if !pruned.is_empty() {
            debug!(count = pruned.len(), "loaded pruned ids from cache");
        }
        Ok(Self {
            engine,
            store,
            config,
            pruned,
            working: Vec::new(),
        })
    }

    /// Rebuild the working set from the engine's current state.
    ///
    /// A deposit is pruned once it can never serve another intent: it was
    /// withdrawn, or its reclaimable liquidity is below the deposit's own
    /// minimum intent size with nothing outstanding. Pruning is final;
    /// pruned ids are skipped by every later refresh.
    pub async fn refresh(&mut self) -> IndexResult<usize> {
        let counter = self.engine.deposit_counter().await;
        let ids_to_fetch: Vec<DepositId> = (0..counter)
            .map(DepositId)
            .filter(|id| !self.pruned.contains(id))
            .collect();

        let mut active = Vec::new();
        let mut new_prunes = Vec::new();

        for batch in ids_to_fetch.chunks(self.config.batch_size.max(1)) {
            let views = self.engine.get_deposits(batch).await;
            let returned: HashSet<DepositId> = views.iter().map(|v| v.deposit_id).collect();

            for id in batch {
                if !returned.contains(id) {
                    // Withdrawn: the id will never resolve again.
                    new_prunes.push(*id);
                }
            }
            for view in views {
                let exhausted = view.available_liquidity < view.deposit.intent_range.min
                    && view.deposit.outstanding_amount.is_zero();
                if exhausted {
                    new_prunes.push(view.deposit_id);
                } else {
                    active.push(view);
                }
            }
        }

        if !new_prunes.is_empty() {
            self.store
                .append(&self.config.cache_key, &new_prunes)
                .await?;
            self.pruned.extend(new_prunes.iter().copied());
            info!(count = new_prunes.len(), "deposits pruned");
        }

        active.sort_by(|a, b| {
            b.available_liquidity
                .cmp(&a.available_liquidity)
                .then_with(|| a.deposit_id.cmp(&b.deposit_id))
        });
        self.working = active;
        Ok(self.working.len())
    }

    /// The current working set, ordered by descending available liquidity.
    pub fn active_deposits(&self) -> &[DepositView] {
        &self.working
    }

    pub fn pruned_ids(&self) -> &HashSet<DepositId> {
        &self.pruned
    }

    /// Select the deposit best able to serve `fiat_amount` on the given
    /// rail and currency.
    ///
    /// The requested fiat is converted through each candidate's configured
    /// rate; candidates whose converted token amount falls outside their
    /// own intent range, whose depositor is in `exclude`, or which are
    /// paused are skipped. Among the rest the fillable amount
    /// `min(available, requested)` is maximized, ties broken by larger
    /// remaining liquidity. Pure query; no side effects.
    pub fn best_deposit_for_fiat_amount(
        &self,
        fiat_amount: Amount,
        verifier_id: &VerifierId,
        currency_id: &Digest32,
        exclude: &HashSet<AccountId>,
    ) -> Option<Quote> {
        let mut best: Option<(Amount, Amount, Quote)> = None;

        for view in &self.working {
            let deposit = &view.deposit;
            if exclude.contains(&deposit.depositor) || !deposit.accepting_intents {
                continue;
            }
            let Some(config) = deposit.verifier_config(verifier_id) else {
                continue;
            };
            let Some(rate) = config.rate_for(currency_id) else {
                continue;
            };
            let Some(requested_tokens) = rate.token_equivalent(fiat_amount) else {
                continue;
            };
            if !deposit.intent_range.contains(requested_tokens) {
                continue;
            }

            let fillable = requested_tokens.min(view.available_liquidity);
            if fillable < deposit.intent_range.min {
                continue;
            }

            let candidate = (
                fillable,
                deposit.remaining_amount,
                Quote {
                    deposit_id: view.deposit_id,
                    token_amount: fillable,
                    conversion_rate: rate,
                },
            );
            let better = match &best {
                None => true,
                Some((best_fill, best_remaining, _)) => {
                    candidate.0 > *best_fill
                        || (candidate.0 == *best_fill && candidate.1 > *best_remaining)
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        best.map(|(_, _, quote)| quote)
    }
}
