//! C2 — Ledger: per-user token balance plus append-only transaction log
//! (spec §4.2). Every entry point runs inside a `TxContext`; callers that
//! need their own transaction boundary open one with `Store::tx` and pass
//! the context through, the same way the teacher's `paper_ledger` module
//! takes a connection/transaction handle rather than owning one.

use crate::domain::{
    Timestamp, TokenTransaction, TransactionStatus, TransactionType, UserBalance, UserId,
};
use crate::error::ResolutionError;
use crate::store::{EqFilter, OrderBy, TxContext};
use serde_json::{json, Value};
use uuid::Uuid;

/// One ledger mutation. Constructed via the named constructors below so
/// that the signed-amount convention (§4.2) can't be gotten wrong by a
/// caller reaching for the struct literal directly.
#[derive(Debug, Clone)]
pub struct LedgerOp {
    pub user_id: UserId,
    pub tx_type: TransactionType,
    /// Signed delta applied to `available_tokens`. See `fold_step` for the
    /// per-type meaning.
    amount: i64,
    pub related_id: Option<String>,
    pub metadata: Value,
}

impl LedgerOp {
    pub fn purchase(user_id: impl Into<UserId>, amount: u64, related_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tx_type: TransactionType::Purchase,
            amount: amount as i64,
            related_id,
            metadata: Value::Null,
        }
    }

    pub fn commit(user_id: impl Into<UserId>, amount: u64, related_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tx_type: TransactionType::Commit,
            amount: -(amount as i64),
            related_id,
            metadata: Value::Null,
        }
    }

    /// `payout` is the full amount credited to `available_tokens`;
    /// `staked_returned` is the portion of it that was already reserved in
    /// `committed_tokens` (so only `payout - staked_returned` is genuinely
    /// new earnings). See spec §4.2 "win".
    pub fn win(
        user_id: impl Into<UserId>,
        payout: u64,
        staked_returned: u64,
        related_id: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            tx_type: TransactionType::Win,
            amount: payout as i64,
            related_id,
            metadata: json!({ "staked_returned": staked_returned }),
        }
    }

    pub fn loss(user_id: impl Into<UserId>, staked_lost: u64, related_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tx_type: TransactionType::Loss,
            amount: -(staked_lost as i64),
            related_id,
            metadata: Value::Null,
        }
    }

    /// Credits `amount` to `available_tokens` and clears `amount` from
    /// `committed_tokens`. Use `partial_refund` instead when the commitment's
    /// full stake must leave `committed_tokens` but only part of it is being
    /// credited back (spec §4.4 no-winners case).
    pub fn refund(user_id: impl Into<UserId>, amount: u64, related_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tx_type: TransactionType::Refund,
            amount: amount as i64,
            related_id,
            metadata: Value::Null,
        }
    }

    /// Refund where the commitment's full stake (`staked_amount`) is cleared
    /// from `committed_tokens` but only `payout` (its pro-rata share) is
    /// credited to `available_tokens` (spec §4.4 "no winners": the
    /// commitment is terminal, so the whole stake must leave `committed`
    /// even though the holder only gets part of it back).
    pub fn partial_refund(
        user_id: impl Into<UserId>,
        payout: u64,
        staked_amount: u64,
        related_id: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            tx_type: TransactionType::Refund,
            amount: payout as i64,
            related_id,
            metadata: json!({ "staked_returned": staked_amount }),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Reverses an arbitrary mix of prior ledger effects in one entry
    /// (spec §4.5 "rollback"). `available_delta`/`committed_delta` are
    /// applied directly; `earned_delta`/`spent_delta` correct the
    /// lifetime counters the forward operation bumped.
    pub fn rollback(
        user_id: impl Into<UserId>,
        available_delta: i64,
        committed_delta: i64,
        earned_delta: i64,
        spent_delta: i64,
        related_id: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            tx_type: TransactionType::Rollback,
            amount: available_delta,
            related_id,
            metadata: json!({
                "committed_delta": committed_delta,
                "earned_delta": earned_delta,
                "spent_delta": spent_delta,
            }),
        }
    }
}

/// Running accumulator used both to mutate a live `UserBalance` in `apply`
/// and to replay the whole transaction log in `reconcile`. Keeping both
/// paths driven by the same `fold_step` is what makes the balance
/// reconstructable: the stored balance is nothing but this fold applied to
/// the append-only log.
struct Fold {
    available: i64,
    committed: i64,
    total_earned: u64,
    total_spent: u64,
}

fn fold_step(acc: &mut Fold, tx_type: TransactionType, amount: i64, metadata: &Value) {
    match tx_type {
        TransactionType::Purchase => {
            acc.available += amount;
            acc.total_earned = acc.total_earned.saturating_add(amount.max(0) as u64);
        }
        TransactionType::Commit => {
            acc.available += amount;
            acc.committed -= amount;
        }
        TransactionType::Win => {
            let staked_returned = metadata
                .get("staked_returned")
                .and_then(Value::as_u64)
                .unwrap_or(0) as i64;
            acc.available += amount;
            acc.committed -= staked_returned;
            let earned_delta = amount - staked_returned;
            if earned_delta > 0 {
                acc.total_earned = acc.total_earned.saturating_add(earned_delta as u64);
            }
        }
        TransactionType::Loss => {
            let staked_lost = amount.unsigned_abs();
            acc.committed -= staked_lost as i64;
            acc.total_spent = acc.total_spent.saturating_add(staked_lost);
        }
        TransactionType::Refund => {
            let staked_returned = metadata
                .get("staked_returned")
                .and_then(Value::as_u64)
                .map(|v| v as i64)
                .unwrap_or(amount);
            acc.available += amount;
            acc.committed -= staked_returned;
        }
        TransactionType::Rollback => {
            let committed_delta = metadata
                .get("committed_delta")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let earned_delta = metadata.get("earned_delta").and_then(Value::as_i64).unwrap_or(0);
            let spent_delta = metadata.get("spent_delta").and_then(Value::as_i64).unwrap_or(0);
            acc.available += amount;
            acc.committed += committed_delta;
            acc.total_earned = (acc.total_earned as i64 + earned_delta).max(0) as u64;
            acc.total_spent = (acc.total_spent as i64 + spent_delta).max(0) as u64;
        }
    }
}

/// Loads a user's balance, creating it lazily (spec §4.2 "getBalance") with
/// the configured starter grant if no record exists yet. Returns the
/// balance and its store version, `None` meaning "not yet persisted" so
/// the caller knows to `put` with `expected_version = None`.
pub fn get_balance(
    ctx: &TxContext,
    user_id: &str,
    starter_grant: u64,
) -> Result<(UserBalance, Option<u64>), ResolutionError> {
    match ctx.get_with_version::<UserBalance>(user_id)? {
        Some((balance, version)) => Ok((balance, Some(version))),
        None => Ok((
            UserBalance::initial(user_id.to_string(), starter_grant, ctx.now),
            None,
        )),
    }
}

/// Read-only sufficiency check against `available_tokens`. A user with no
/// balance record yet has conceptually zero available tokens.
pub fn validate(ctx: &TxContext, user_id: &str, amount: u64) -> Result<bool, ResolutionError> {
    let available = ctx
        .get::<UserBalance>(user_id)?
        .map(|b| b.available_tokens)
        .unwrap_or(0);
    Ok(available >= amount)
}

/// Applies one ledger mutation, persisting the updated balance and a new
/// `TokenTransaction`. Fails with `InsufficientFunds` rather than driving
/// `available_tokens` or `committed_tokens` negative (spec §4.2).
pub fn apply(
    ctx: &TxContext,
    op: LedgerOp,
    starter_grant: u64,
) -> Result<TokenTransaction, ResolutionError> {
    let (mut balance, version) = get_balance(ctx, &op.user_id, starter_grant)?;

    let mut fold = Fold {
        available: balance.available_tokens as i64,
        committed: balance.committed_tokens as i64,
        total_earned: balance.total_earned,
        total_spent: balance.total_spent,
    };
    fold_step(&mut fold, op.tx_type, op.amount, &op.metadata);

    if fold.available < 0 || fold.committed < 0 {
        return Err(ResolutionError::insufficient_funds(format!(
            "ledger op {:?} for user {} would drive balance negative (available={}, committed={})",
            op.tx_type, op.user_id, fold.available, fold.committed
        )));
    }

    let balance_before = balance.available_tokens;
    balance.available_tokens = fold.available as u64;
    balance.committed_tokens = fold.committed as u64;
    balance.total_earned = fold.total_earned;
    balance.total_spent = fold.total_spent;
    balance.last_updated = ctx.now;
    balance.version += 1;

    let new_version = ctx.put(&balance, version)?;
    debug_assert_eq!(new_version, balance.version);

    let transaction = TokenTransaction {
        id: Uuid::new_v4().to_string(),
        user_id: op.user_id.clone(),
        tx_type: op.tx_type,
        amount: op.amount,
        balance_before,
        balance_after: balance.available_tokens,
        related_id: op.related_id,
        metadata: op.metadata,
        timestamp: ctx.now,
        status: TransactionStatus::Completed,
    };
    ctx.put(&transaction, None)?;
    Ok(transaction)
}

/// All-or-nothing batch apply (spec §4.2 "applyBatch"): every op's
/// sufficiency is validated against a simulated running balance before any
/// write is issued.
pub fn apply_batch(
    ctx: &TxContext,
    ops: Vec<LedgerOp>,
    starter_grant: u64,
) -> Result<Vec<TokenTransaction>, ResolutionError> {
    use std::collections::HashMap;

    let mut simulated: HashMap<UserId, Fold> = HashMap::new();
    for op in &ops {
        if !simulated.contains_key(&op.user_id) {
            let (balance, _) = get_balance(ctx, &op.user_id, starter_grant)?;
            simulated.insert(
                op.user_id.clone(),
                Fold {
                    available: balance.available_tokens as i64,
                    committed: balance.committed_tokens as i64,
                    total_earned: balance.total_earned,
                    total_spent: balance.total_spent,
                },
            );
        }
        let fold = simulated.get_mut(&op.user_id).expect("just inserted above");
        fold_step(fold, op.tx_type, op.amount, &op.metadata);
        if fold.available < 0 || fold.committed < 0 {
            return Err(ResolutionError::insufficient_funds(format!(
                "batch ledger op {:?} for user {} would drive balance negative",
                op.tx_type, op.user_id
            )));
        }
    }

    ops.into_iter().map(|op| apply(ctx, op, starter_grant)).collect()
}

/// Rebuilds a user's balance by replaying their whole transaction log
/// (spec §4.2 "reconcile"). Writes the reconciled record and returns the
/// fields that disagreed with what was stored.
pub fn reconcile(
    ctx: &TxContext,
    user_id: &str,
    starter_grant: u64,
) -> Result<(UserBalance, Vec<String>), ResolutionError> {
    let (stored, version) = get_balance(ctx, user_id, starter_grant)?;

    let transactions: Vec<TokenTransaction> = ctx.query(
        &[EqFilter::new("user_id", user_id.to_string())],
        Some(OrderBy::asc("timestamp")),
        None,
    )?;

    let mut fold = Fold {
        available: 0,
        committed: 0,
        total_earned: 0,
        total_spent: 0,
    };
    if transactions.is_empty() {
        // Never touched: the only legitimate baseline is the starter grant
        // `get_balance` would have handed out on first contact.
        fold.available = starter_grant as i64;
    }
    for t in &transactions {
        fold_step(&mut fold, t.tx_type, t.amount, &t.metadata);
    }

    let mut discrepancies = Vec::new();
    if fold.available as u64 != stored.available_tokens {
        discrepancies.push(format!(
            "available_tokens: stored={} reconciled={}",
            stored.available_tokens, fold.available
        ));
    }
    if fold.committed as u64 != stored.committed_tokens {
        discrepancies.push(format!(
            "committed_tokens: stored={} reconciled={}",
            stored.committed_tokens, fold.committed
        ));
    }
    if fold.total_earned != stored.total_earned {
        discrepancies.push(format!(
            "total_earned: stored={} reconciled={}",
            stored.total_earned, fold.total_earned
        ));
    }
    if fold.total_spent != stored.total_spent {
        discrepancies.push(format!(
            "total_spent: stored={} reconciled={}",
            stored.total_spent, fold.total_spent
        ));
    }

    let mut reconciled = stored;
    reconciled.available_tokens = fold.available.max(0) as u64;
    reconciled.committed_tokens = fold.committed.max(0) as u64;
    reconciled.total_earned = fold.total_earned;
    reconciled.total_spent = fold.total_spent;
    reconciled.last_updated = ctx.now;
    reconciled.version += 1;
    ctx.put(&reconciled, version)?;

    Ok((reconciled, discrepancies))
}
