//! Escrow engine - deposits, intents and settlement
//!
//! The engine owns all Deposit and Intent records and is their only writer.
//! Every mutating operation takes the single state write lock, validates
//! against the current state, and only then applies its effects, so each
//! operation is atomic and all operations are totally ordered. Expiration
//! is lazy: an expired intent sits in place until a cancel, signal or
//! withdraw observes it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use openramp_core::{AccountId, Amount, DepositId, Digest32, IntentId, TokenId, VerifierId};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    config::EngineConfig,
    error::EscrowError,
    models::{
        CurrencyEntry, Deposit, DepositVerifierConfig, DepositView, EscrowEvent, EventKind,
        Intent, IntentRange, IntentStatus,
    },
    registry::VerifierRegistry,
    verifiers::{PaymentVerifier, RailProof},
    EscrowResult,
};

/// Authoritative mutable state, guarded by one lock.
#[derive(Default)]
struct EngineState {
    deposit_counter: u64,
    deposits: HashMap<DepositId, Deposit>,
    intents: HashMap<IntentId, Intent>,
    account_deposits: HashMap<AccountId, Vec<DepositId>>,
    account_intents: HashMap<AccountId, Vec<IntentId>>,
    balances: HashMap<(AccountId, TokenId), Amount>,
    /// Last voluntary fulfil/cancel per on-ramper, for the cooldown policy
    last_intent_action: HashMap<AccountId, DateTime<Utc>>,
    events: Vec<EscrowEvent>,
}

impl EngineState {
    fn push_event(&mut self, kind: EventKind) {
        let seq = self.events.len() as u64;
        self.events.push(EscrowEvent {
            seq,
            at: Utc::now(),
            kind,
        });
    }

    fn credit(&mut self, account: &AccountId, token: &TokenId, amount: Amount) {
        let entry = self
            .balances
            .entry((account.clone(), token.clone()))
            .or_insert(Amount::ZERO);
        *entry = entry.checked_add(amount).unwrap_or(Amount(u64::MAX));
    }

    /// Intents of `deposit_id` that have expired without being fulfilled,
    /// with the total they still reserve. Read-only.
    fn prunable(&self, deposit: &Deposit, now: DateTime<Utc>) -> (Vec<IntentId>, Amount) {
        let mut ids = Vec::new();
        let mut total = Amount::ZERO;
        for intent_id in &deposit.intent_ids {
            if let Some(intent) = self.intents.get(intent_id) {
                if intent.status == IntentStatus::Created && intent.is_expired(now) {
                    ids.push(*intent_id);
                    total = total.checked_add(intent.amount).unwrap_or(total);
                }
            }
        }
        (ids, total)
    }

    /// Cancel the given expired intents and return their reservations to
    /// the deposit. Callers must have validated the set via `prunable`.
    fn apply_prunes(&mut self, deposit_id: DepositId, intent_ids: &[IntentId]) {
        for intent_id in intent_ids {
            let Some(intent) = self.intents.get_mut(intent_id) else {
                continue;
            };
            intent.status = IntentStatus::Cancelled;
            let amount = intent.amount;

            let deposit = self
                .deposits
                .get_mut(&deposit_id)
                .expect("pruned deposit exists");
            deposit.outstanding_amount = deposit
                .outstanding_amount
                .checked_sub(amount)
                .expect("outstanding covers pruned intent");
            deposit.remaining_amount = deposit
                .remaining_amount
                .checked_add(amount)
                .expect("deposit accounting overflow");
            deposit.intent_ids.retain(|id| id != intent_id);

            self.push_event(EventKind::IntentPruned {
                intent_id: *intent_id,
                deposit_id,
            });
        }
    }

    fn check_deposit_invariant(&self, deposit_id: DepositId) {
        if let Some(d) = self.deposits.get(&deposit_id) {
            let committed = d.remaining_amount.checked_add(d.outstanding_amount);
            debug_assert!(
                matches!(committed, Some(c) if c <= d.amount),
                "deposit {deposit_id}: remaining {} + outstanding {} exceeds amount {}",
                d.remaining_amount,
                d.outstanding_amount,
                d.amount
            );
        }
    }
}

/// Fields covered by a gating service's intent approval signature.
#[derive(Serialize)]
struct GatingMessage<'a> {
    deposit_id: DepositId,
    amount: Amount,
    recipient: &'a AccountId,
    verifier_id: &'a VerifierId,
}

/// Digest a gating service signs to approve an intent.
pub fn gating_approval_digest(
    deposit_id: DepositId,
    amount: Amount,
    recipient: &AccountId,
    verifier_id: &VerifierId,
) -> Digest32 {
    let msg = GatingMessage {
        deposit_id,
        amount,
        recipient,
        verifier_id,
    };
    Digest32::of_bytes(&serde_json::to_vec(&msg).unwrap_or_default())
}

/// The escrow engine.
///
/// Registries are injected at construction so tests can substitute fresh
/// instances per case; the engine never reaches for ambient state.
pub struct EscrowEngine {
    config: EngineConfig,
    /// Identity this engine presents to verifier modules
    account: AccountId,
    verifiers: std::sync::Arc<VerifierRegistry>,
    state: RwLock<EngineState>,
}

impl EscrowEngine {
    pub fn new(
        config: EngineConfig,
        verifiers: std::sync::Arc<VerifierRegistry>,
        account: AccountId,
    ) -> Self {
        Self {
            config,
            account,
            verifiers,
            state: RwLock::new(EngineState::default()),
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Lock liquidity into a new deposit.
    pub async fn create_deposit(
        &self,
        caller: &AccountId,
        token: TokenId,
        amount: Amount,
        intent_range: IntentRange,
        verifier_configs: Vec<DepositVerifierConfig>,
    ) -> EscrowResult<DepositId> {
        if amount.is_zero() {
            return Err(EscrowError::InvalidAmount);
        }
        if amount < self.config.min_deposit_amount {
            return Err(EscrowError::BelowMinimumDeposit {
                amount,
                minimum: self.config.min_deposit_amount,
            });
        }
        if !intent_range.is_valid() {
            return Err(EscrowError::InvalidRange {
                min: intent_range.min,
                max: intent_range.max,
            });
        }
        if verifier_configs.is_empty() {
            return Err(EscrowError::VerifierNotConfigured);
        }
        for (i, cfg) in verifier_configs.iter().enumerate() {
            if cfg.currencies.is_empty() {
                return Err(EscrowError::Config(format!(
                    "verifier {} advertises no currencies",
                    cfg.verifier_id
                )));
            }
            if verifier_configs[..i]
                .iter()
                .any(|other| other.verifier_id == cfg.verifier_id)
            {
                return Err(EscrowError::Config(format!(
                    "duplicate verifier config {}",
                    cfg.verifier_id
                )));
            }
            if !self.verifiers.is_usable(&cfg.verifier_id).await {
                return Err(EscrowError::VerifierNotConfigured);
            }
        }

        let mut state = self.state.write().await;
        let deposit_id = DepositId(state.deposit_counter);
        state.deposit_counter += 1;

        state.deposits.insert(
            deposit_id,
            Deposit {
                depositor: caller.clone(),
                token,
                amount,
                remaining_amount: amount,
                outstanding_amount: Amount::ZERO,
                intent_range,
                verifier_configs,
                accepting_intents: true,
                intent_ids: Vec::new(),
                created_at: Utc::now(),
            },
        );
        state
            .account_deposits
            .entry(caller.clone())
            .or_default()
            .push(deposit_id);
        state.push_event(EventKind::DepositReceived {
            deposit_id,
            depositor: caller.clone(),
            amount,
        });

        info!(deposit = %deposit_id, depositor = %caller, amount = %amount, "deposit created");
        Ok(deposit_id)
    }

    /// Add liquidity to an existing deposit. Depositor-only.
    pub async fn increase_deposit(
        &self,
        caller: &AccountId,
        deposit_id: DepositId,
        extra: Amount,
    ) -> EscrowResult<()> {
        if extra.is_zero() {
            return Err(EscrowError::InvalidAmount);
        }

        let mut state = self.state.write().await;
        let deposit = state
            .deposits
            .get_mut(&deposit_id)
            .ok_or(EscrowError::DepositNotFound)?;
        if &deposit.depositor != caller {
            return Err(EscrowError::unauthorized(format!(
                "{caller} is not the depositor of {deposit_id}"
            )));
        }

        deposit.amount = deposit
            .amount
            .checked_add(extra)
            .ok_or_else(|| EscrowError::AmountOverflow("deposit amount".to_string()))?;
        deposit.remaining_amount = deposit
            .remaining_amount
            .checked_add(extra)
            .ok_or_else(|| EscrowError::AmountOverflow("remaining amount".to_string()))?;
        state.push_event(EventKind::DepositIncreased { deposit_id, amount: extra });
        state.check_deposit_invariant(deposit_id);

        info!(deposit = %deposit_id, amount = %extra, "deposit increased");
        Ok(())
    }

    /// Reserve part of a deposit pending proof of payment.
    pub async fn signal_intent(
        &self,
        caller: &AccountId,
        deposit_id: DepositId,
        amount: Amount,
        verifier_id: VerifierId,
        recipient: AccountId,
        gating_approval: Option<&[u8]>,
    ) -> EscrowResult<IntentId> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let deposit = state
            .deposits
            .get(&deposit_id)
            .ok_or(EscrowError::DepositNotFound)?;
        if !deposit.accepting_intents {
            return Err(EscrowError::NotAcceptingIntents);
        }
        let config = deposit
            .verifier_config(&verifier_id)
            .ok_or(EscrowError::VerifierNotConfigured)?;
        if !deposit.intent_range.contains(amount) {
            return Err(EscrowError::AmountOutOfRange {
                amount,
                min: deposit.intent_range.min,
                max: deposit.intent_range.max,
            });
        }

        // Cooldown policy: a configured gap since the owner's last settled
        // intent, and at most one live intent per owner engine-wide.
        if let Some(cooldown) = self.config.intent_cooldown {
            if let Some(last) = state.last_intent_action.get(caller) {
                if now < *last + cooldown {
                    return Err(EscrowError::CooldownActive);
                }
            }
            let has_live_intent = state
                .account_intents
                .get(caller)
                .into_iter()
                .flatten()
                .filter_map(|id| state.intents.get(id))
                .any(|intent| intent.is_live(now));
            if has_live_intent {
                return Err(EscrowError::DuplicateIntent);
            }
        }

        // One live intent per (owner, deposit) regardless of policy.
        let duplicate = deposit
            .intent_ids
            .iter()
            .filter_map(|id| state.intents.get(id))
            .any(|intent| &intent.owner == caller && intent.is_live(now));
        if duplicate {
            return Err(EscrowError::DuplicateIntent);
        }

        if let Some(gating) = &config.gating_service {
            let digest = gating_approval_digest(deposit_id, amount, &recipient, &verifier_id);
            let approved = gating_approval
                .map(|sig| recover_signer(digest, sig) == Some(gating.signing_key))
                .unwrap_or(false);
            if !approved {
                return Err(EscrowError::unauthorized(format!(
                    "intent not approved by gating service {}",
                    gating.id
                )));
            }
        }

        // Liquidity check counts reclaimable expired reservations, but
        // nothing is pruned unless the whole operation succeeds.
        let (prunable_ids, prunable_total) = state.prunable(deposit, now);
        let available = deposit
            .remaining_amount
            .checked_add(prunable_total)
            .unwrap_or(deposit.remaining_amount);
        if amount > available {
            return Err(EscrowError::InsufficientLiquidity {
                requested: amount,
                available,
            });
        }

        // Commit.
        state.apply_prunes(deposit_id, &prunable_ids);

        let intent_id = IntentId::random();
        let intent = Intent {
            id: intent_id,
            owner: caller.clone(),
            recipient,
            deposit_id,
            amount,
            verifier_id,
            status: IntentStatus::Created,
            created_at: now,
            expires_at: now + self.config.intent_expiration,
        };

        let deposit = state
            .deposits
            .get_mut(&deposit_id)
            .expect("deposit checked above");
        deposit.remaining_amount = deposit
            .remaining_amount
            .checked_sub(amount)
            .expect("liquidity checked above");
        deposit.outstanding_amount = deposit
            .outstanding_amount
            .checked_add(amount)
            .ok_or_else(|| EscrowError::AmountOverflow("outstanding amount".to_string()))?;
        deposit.intent_ids.push(intent_id);

        state.intents.insert(intent_id, intent);
        state
            .account_intents
            .entry(caller.clone())
            .or_default()
            .push(intent_id);
        state.push_event(EventKind::IntentSignaled {
            intent_id,
            deposit_id,
            owner: caller.clone(),
            amount,
        });
        state.check_deposit_invariant(deposit_id);

        info!(intent = %intent_id, deposit = %deposit_id, owner = %caller, amount = %amount, "intent signaled");
        Ok(intent_id)
    }

    /// Settle an intent against a payment proof.
    ///
    /// Verifier errors propagate unchanged; on any error Deposit and Intent
    /// state is exactly as before the call.
    pub async fn fulfill_intent(
        &self,
        _caller: &AccountId,
        intent_id: IntentId,
        proof: &RailProof,
    ) -> EscrowResult<()> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let intent = state
            .intents
            .get(&intent_id)
            .ok_or(EscrowError::IntentNotFound)?
            .clone();
        // Terminal states are checked before the verifier is consulted, so
        // a stale proof can never be replayed against a settled intent.
        match intent.status {
            IntentStatus::Fulfilled => return Err(EscrowError::AlreadyFulfilled),
            IntentStatus::Cancelled => return Err(EscrowError::IntentExpired),
            IntentStatus::Created => {}
        }
        if intent.is_expired(now) {
            return Err(EscrowError::IntentExpired);
        }

        let deposit = state
            .deposits
            .get(&intent.deposit_id)
            .ok_or(EscrowError::DepositNotFound)?;
        let config = deposit
            .verifier_config(&intent.verifier_id)
            .ok_or(EscrowError::VerifierNotConfigured)?
            .clone();
        let token = deposit.token.clone();

        let verifier = self
            .verifiers
            .get(&intent.verifier_id)
            .await
            .ok_or(EscrowError::VerifierNotConfigured)?;
        let options = self
            .verifiers
            .options(&intent.verifier_id)
            .await
            .unwrap_or_default();

        let fact = verifier.process_proof(&self.account, proof).await?;

        // Cross-check the fact against the reservation.
        if fact.bound_intent_id != intent.id {
            return Err(EscrowError::payment_mismatch(format!(
                "proof bound to intent {}, not {}",
                fact.bound_intent_id, intent.id
            )));
        }
        if fact.payee_id_hash != config.payee_details_hash {
            return Err(EscrowError::payment_mismatch(
                "payment went to an unexpected payee".to_string(),
            ));
        }
        let rate = config
            .rate_for(&fact.currency_id)
            .ok_or_else(|| EscrowError::payment_mismatch("currency not configured for rail".to_string()))?;
        let fiat_required = rate
            .fiat_required(intent.amount)
            .ok_or_else(|| EscrowError::AmountOverflow("fiat requirement".to_string()))?;
        if fact.amount < fiat_required {
            return Err(EscrowError::payment_mismatch(format!(
                "paid {} of required {fiat_required}",
                fact.amount
            )));
        }
        if fact.timestamp < intent.created_at {
            return Err(EscrowError::payment_mismatch(
                "payment predates the reservation".to_string(),
            ));
        }

        // Commit.
        let sustainability = match &self.config.fee_recipient {
            Some(_) => intent.amount.bps(self.config.sustainability_fee_bps),
            None => Amount::ZERO,
        };
        let verifier_share = match &options.operator {
            Some(_) => intent.amount.bps(options.fee_share_bps),
            None => Amount::ZERO,
        };
        let fees = sustainability
            .checked_add(verifier_share)
            .ok_or_else(|| EscrowError::AmountOverflow("fees".to_string()))?;
        let payout = intent
            .amount
            .checked_sub(fees)
            .ok_or_else(|| EscrowError::AmountOverflow("fees exceed intent amount".to_string()))?;

        {
            let deposit = state
                .deposits
                .get_mut(&intent.deposit_id)
                .expect("deposit checked above");
            deposit.outstanding_amount = deposit
                .outstanding_amount
                .checked_sub(intent.amount)
                .expect("outstanding covers intent");
            deposit.intent_ids.retain(|id| id != &intent_id);
        }

        state.credit(&intent.recipient, &token, payout);
        if let Some(recipient) = &self.config.fee_recipient {
            if !sustainability.is_zero() {
                state.credit(recipient, &token, sustainability);
            }
        }
        if let Some(operator) = &options.operator {
            if !verifier_share.is_zero() {
                state.credit(operator, &token, verifier_share);
            }
        }

        state
            .intents
            .get_mut(&intent_id)
            .expect("intent checked above")
            .status = IntentStatus::Fulfilled;
        state.last_intent_action.insert(intent.owner.clone(), now);
        state.push_event(EventKind::IntentFulfilled {
            intent_id,
            deposit_id: intent.deposit_id,
            recipient: intent.recipient.clone(),
            amount: payout,
            fees,
        });
        state.check_deposit_invariant(intent.deposit_id);

        info!(
            intent = %intent_id,
            deposit = %intent.deposit_id,
            recipient = %intent.recipient,
            payout = %payout,
            fees = %fees,
            "intent fulfilled"
        );
        Ok(())
    }

    /// Release an expired reservation, or an unexpired one where the rail
    /// allows voluntary cancellation.
    pub async fn cancel_intent(&self, caller: &AccountId, intent_id: IntentId) -> EscrowResult<()> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let intent = state
            .intents
            .get(&intent_id)
            .ok_or(EscrowError::IntentNotFound)?
            .clone();
        if intent.status.is_terminal() {
            // Idempotent no-op error: the reservation was already released
            // or paid out exactly once.
            return Err(EscrowError::IntentNotFound);
        }

        let voluntary = !intent.is_expired(now);
        if voluntary {
            let deposit = state
                .deposits
                .get(&intent.deposit_id)
                .ok_or(EscrowError::DepositNotFound)?;
            let allowed_party = caller == &intent.owner || caller == &deposit.depositor;
            let early_cancel_ok = self
                .verifiers
                .options(&intent.verifier_id)
                .await
                .map(|o| o.allows_early_cancel)
                .unwrap_or(false);
            if !allowed_party || !early_cancel_ok {
                return Err(EscrowError::unauthorized(
                    "intent has not expired yet".to_string(),
                ));
            }
        }

        let deposit = state
            .deposits
            .get_mut(&intent.deposit_id)
            .ok_or(EscrowError::DepositNotFound)?;
        deposit.outstanding_amount = deposit
            .outstanding_amount
            .checked_sub(intent.amount)
            .expect("outstanding covers intent");
        deposit.remaining_amount = deposit
            .remaining_amount
            .checked_add(intent.amount)
            .expect("deposit accounting overflow");
        deposit.intent_ids.retain(|id| id != &intent_id);

        state
            .intents
            .get_mut(&intent_id)
            .expect("intent checked above")
            .status = IntentStatus::Cancelled;
        if voluntary && caller == &intent.owner {
            state.last_intent_action.insert(intent.owner.clone(), now);
        }
        state.push_event(EventKind::IntentCancelled {
            intent_id,
            deposit_id: intent.deposit_id,
        });
        state.check_deposit_invariant(intent.deposit_id);

        info!(intent = %intent_id, deposit = %intent.deposit_id, voluntary, "intent cancelled");
        Ok(())
    }

    /// Pay out a reservation without proof. Depositor-only; the depositor
    /// asserts off-band that payment arrived.
    pub async fn release_funds_to_payer(
        &self,
        caller: &AccountId,
        intent_id: IntentId,
    ) -> EscrowResult<()> {
        let mut state = self.state.write().await;

        let intent = state
            .intents
            .get(&intent_id)
            .ok_or(EscrowError::IntentNotFound)?
            .clone();
        match intent.status {
            IntentStatus::Fulfilled => return Err(EscrowError::AlreadyFulfilled),
            IntentStatus::Cancelled => return Err(EscrowError::IntentNotFound),
            IntentStatus::Created => {}
        }

        let deposit = state
            .deposits
            .get_mut(&intent.deposit_id)
            .ok_or(EscrowError::DepositNotFound)?;
        if &deposit.depositor != caller {
            return Err(EscrowError::unauthorized(format!(
                "{caller} is not the depositor of {}",
                intent.deposit_id
            )));
        }
        let token = deposit.token.clone();
        deposit.outstanding_amount = deposit
            .outstanding_amount
            .checked_sub(intent.amount)
            .expect("outstanding covers intent");
        deposit.intent_ids.retain(|id| id != &intent_id);

        state.credit(&intent.recipient, &token, intent.amount);
        state
            .intents
            .get_mut(&intent_id)
            .expect("intent checked above")
            .status = IntentStatus::Fulfilled;
        state.push_event(EventKind::FundsReleased {
            intent_id,
            deposit_id: intent.deposit_id,
            recipient: intent.recipient.clone(),
            amount: intent.amount,
        });
        state.check_deposit_invariant(intent.deposit_id);

        info!(intent = %intent_id, recipient = %intent.recipient, "funds released by depositor");
        Ok(())
    }

    /// Withdraw all uncommitted liquidity and remove the deposit.
    pub async fn withdraw_deposit(
        &self,
        caller: &AccountId,
        deposit_id: DepositId,
    ) -> EscrowResult<()> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let deposit = state
            .deposits
            .get(&deposit_id)
            .ok_or(EscrowError::DepositNotFound)?;
        if &deposit.depositor != caller {
            return Err(EscrowError::unauthorized(format!(
                "{caller} is not the depositor of {deposit_id}"
            )));
        }

        // Expired reservations are reclaimable; anything still live blocks
        // the withdrawal. Checked before any mutation.
        let (prunable_ids, prunable_total) = state.prunable(deposit, now);
        let reclaimable = deposit
            .remaining_amount
            .checked_add(prunable_total)
            .ok_or_else(|| EscrowError::AmountOverflow("reclaimable amount".to_string()))?;
        let outstanding_after = deposit
            .outstanding_amount
            .checked_sub(prunable_total)
            .expect("outstanding covers prunable intents");
        if !outstanding_after.is_zero() {
            return Err(EscrowError::OutstandingIntentsExist);
        }

        state.apply_prunes(deposit_id, &prunable_ids);
        let deposit = state
            .deposits
            .remove(&deposit_id)
            .expect("deposit checked above");
        if let Some(ids) = state.account_deposits.get_mut(caller) {
            ids.retain(|id| id != &deposit_id);
        }
        state.credit(caller, &deposit.token, reclaimable);
        state.push_event(EventKind::DepositWithdrawn {
            deposit_id,
            depositor: caller.clone(),
            amount: reclaimable,
        });

        info!(deposit = %deposit_id, depositor = %caller, amount = %reclaimable, "deposit withdrawn");
        Ok(())
    }

    /// Advertise an additional rail on an existing deposit. Depositor-only.
    pub async fn add_deposit_verifier(
        &self,
        caller: &AccountId,
        deposit_id: DepositId,
        config: DepositVerifierConfig,
    ) -> EscrowResult<()> {
        if config.currencies.is_empty() {
            return Err(EscrowError::Config(format!(
                "verifier {} advertises no currencies",
                config.verifier_id
            )));
        }
        if !self.verifiers.is_usable(&config.verifier_id).await {
            return Err(EscrowError::VerifierNotConfigured);
        }

        let mut state = self.state.write().await;
        let deposit = state
            .deposits
            .get_mut(&deposit_id)
            .ok_or(EscrowError::DepositNotFound)?;
        if &deposit.depositor != caller {
            return Err(EscrowError::unauthorized(format!(
                "{caller} is not the depositor of {deposit_id}"
            )));
        }
        if deposit.verifier_config(&config.verifier_id).is_some() {
            return Err(EscrowError::Config(format!(
                "duplicate verifier config {}",
                config.verifier_id
            )));
        }
        info!(deposit = %deposit_id, verifier = %config.verifier_id, "deposit verifier added");
        deposit.verifier_configs.push(config);
        Ok(())
    }

    /// Stop advertising a rail on a deposit. Depositor-only. Intents
    /// already bound to the rail can no longer settle and will expire.
    pub async fn remove_deposit_verifier(
        &self,
        caller: &AccountId,
        deposit_id: DepositId,
        verifier_id: &VerifierId,
    ) -> EscrowResult<()> {
        let mut state = self.state.write().await;
        let deposit = state
            .deposits
            .get_mut(&deposit_id)
            .ok_or(EscrowError::DepositNotFound)?;
        if &deposit.depositor != caller {
            return Err(EscrowError::unauthorized(format!(
                "{caller} is not the depositor of {deposit_id}"
            )));
        }
        if deposit.verifier_config(verifier_id).is_none() {
            return Err(EscrowError::VerifierNotConfigured);
        }
        info!(deposit = %deposit_id, verifier = %verifier_id, "deposit verifier removed");
        deposit
            .verifier_configs
            .retain(|c| &c.verifier_id != verifier_id);
        Ok(())
    }

    /// Add or reprice a currency on a deposit's rail. Depositor-only.
    pub async fn set_deposit_currency(
        &self,
        caller: &AccountId,
        deposit_id: DepositId,
        verifier_id: &VerifierId,
        entry: CurrencyEntry,
    ) -> EscrowResult<()> {
        let mut state = self.state.write().await;
        let deposit = state
            .deposits
            .get_mut(&deposit_id)
            .ok_or(EscrowError::DepositNotFound)?;
        if &deposit.depositor != caller {
            return Err(EscrowError::unauthorized(format!(
                "{caller} is not the depositor of {deposit_id}"
            )));
        }
        let config = deposit
            .verifier_configs
            .iter_mut()
            .find(|c| &c.verifier_id == verifier_id)
            .ok_or(EscrowError::VerifierNotConfigured)?;
        match config
            .currencies
            .iter_mut()
            .find(|c| c.currency_id == entry.currency_id)
        {
            Some(existing) => existing.conversion_rate = entry.conversion_rate,
            None => config.currencies.push(entry),
        }
        Ok(())
    }

    /// Stop accepting a currency on a deposit's rail. Depositor-only. The
    /// rail must keep at least one currency; remove the rail instead.
    pub async fn remove_deposit_currency(
        &self,
        caller: &AccountId,
        deposit_id: DepositId,
        verifier_id: &VerifierId,
        currency_id: &Digest32,
    ) -> EscrowResult<()> {
        let mut state = self.state.write().await;
        let deposit = state
            .deposits
            .get_mut(&deposit_id)
            .ok_or(EscrowError::DepositNotFound)?;
        if &deposit.depositor != caller {
            return Err(EscrowError::unauthorized(format!(
                "{caller} is not the depositor of {deposit_id}"
            )));
        }
        let config = deposit
            .verifier_configs
            .iter_mut()
            .find(|c| &c.verifier_id == verifier_id)
            .ok_or(EscrowError::VerifierNotConfigured)?;
        if !config.currencies.iter().any(|c| &c.currency_id == currency_id) {
            return Err(EscrowError::Config("currency not configured".to_string()));
        }
        if config.currencies.len() == 1 {
            return Err(EscrowError::Config(
                "rail must keep at least one currency".to_string(),
            ));
        }
        config.currencies.retain(|c| &c.currency_id != currency_id);
        Ok(())
    }

    /// Pause or resume new intents on a deposit. Depositor-only.
    pub async fn set_accepting_intents(
        &self,
        caller: &AccountId,
        deposit_id: DepositId,
        accepting: bool,
    ) -> EscrowResult<()> {
        let mut state = self.state.write().await;
        let deposit = state
            .deposits
            .get_mut(&deposit_id)
            .ok_or(EscrowError::DepositNotFound)?;
        if &deposit.depositor != caller {
            return Err(EscrowError::unauthorized(format!(
                "{caller} is not the depositor of {deposit_id}"
            )));
        }
        if !accepting {
            warn!(deposit = %deposit_id, "deposit paused");
        }
        deposit.accepting_intents = accepting;
        Ok(())
    }

    // Read API. Views are snapshots; the index tolerates staleness.

    /// Batched deposit lookup with reclaimable liquidity.
    pub async fn get_deposits(&self, ids: &[DepositId]) -> Vec<DepositView> {
        let now = Utc::now();
        let state = self.state.read().await;
        ids.iter()
            .filter_map(|id| {
                state.deposits.get(id).map(|deposit| {
                    let (_, prunable_total) = state.prunable(deposit, now);
                    DepositView {
                        deposit_id: *id,
                        deposit: deposit.clone(),
                        available_liquidity: deposit
                            .remaining_amount
                            .checked_add(prunable_total)
                            .unwrap_or(deposit.remaining_amount),
                    }
                })
            })
            .collect()
    }

    /// Batched intent lookup.
    pub async fn get_intents(&self, ids: &[IntentId]) -> Vec<Intent> {
        let state = self.state.read().await;
        ids.iter()
            .filter_map(|id| state.intents.get(id).cloned())
            .collect()
    }

    pub async fn get_account_deposits(&self, account: &AccountId) -> Vec<DepositView> {
        let ids = {
            let state = self.state.read().await;
            state
                .account_deposits
                .get(account)
                .cloned()
                .unwrap_or_default()
        };
        self.get_deposits(&ids).await
    }

    pub async fn get_account_intents(&self, account: &AccountId) -> Vec<Intent> {
        let state = self.state.read().await;
        state
            .account_intents
            .get(account)
            .into_iter()
            .flatten()
            .filter_map(|id| state.intents.get(id).cloned())
            .collect()
    }

    /// Total deposits ever created; ids below this may exist or be withdrawn.
    pub async fn deposit_counter(&self) -> u64 {
        self.state.read().await.deposit_counter
    }

    pub async fn balance_of(&self, account: &AccountId, token: &TokenId) -> Amount {
        self.state
            .read()
            .await
            .balances
            .get(&(account.clone(), token.clone()))
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    /// Audit events with sequence numbers at or above `seq`.
    pub async fn events_since(&self, seq: u64) -> Vec<EscrowEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.seq >= seq)
            .cloned()
            .collect()
    }
}

/// Recover the signer of a 65-byte recoverable signature over `digest`.
fn recover_signer(digest: Digest32, signature: &[u8]) -> Option<secp256k1::PublicKey> {
    if signature.len() != 65 {
        return None;
    }
    let recid = RecoveryId::from_i32(signature[64] as i32).ok()?;
    let sig = RecoverableSignature::from_compact(&signature[..64], recid).ok()?;
    let msg = Message::from_digest(digest.0);
    Secp256k1::verification_only().recover_ecdsa(&msg, &sig).ok()
}
