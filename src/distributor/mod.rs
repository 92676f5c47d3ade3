//! C6 — PayoutDistributor: the transactional wrapper around applying (and
//! rolling back) a `PayoutPlan` (spec §4.6). `ResolutionEngine::resolve`
//! and `::cancel` both funnel through `apply`/the refund path here so that
//! `Σ balance deltas + houseFee = Σ stake deltas` has exactly one place it
//! can be gotten wrong.

use crate::calculator::PayoutPlan;
use crate::commitments;
use crate::domain::{
    Commitment, CommitmentId, CommitmentStatus, Document as _, Evidence, Market,
    MarketResolution, MarketStatus, PayoutDistribution, ResolutionStatus, TransactionId,
    UserId, UserPayoutBreakdown, VerificationChecks,
};
use crate::domain::DistributionStatus;
use crate::error::ResolutionError;
use crate::identity::resolve_user_id;
use crate::ledger::{self, LedgerOp};
use crate::store::TxContext;
use std::collections::HashMap;
use uuid::Uuid;

pub struct ApplyOutcome {
    pub resolution: MarketResolution,
    pub market: Market,
    pub distribution: PayoutDistribution,
}

/// Applies `plan` to `market`/`commitments` as one unit: writes the
/// resolution record, moves the market to `resolved`, settles every
/// commitment's terminal status, and runs every ledger mutation the plan
/// implies (spec §4.5 step 8, §4.6).
pub fn apply(
    ctx: &TxContext,
    market: Market,
    commitments: Vec<Commitment>,
    plan: &PayoutPlan,
    evidence: Vec<Evidence>,
    resolved_by: UserId,
    creator_fee_destination: UserId,
    starter_grant: u64,
) -> Result<ApplyOutcome, ResolutionError> {
    let resolution_id = Uuid::new_v4().to_string();
    let distribution_id = Uuid::new_v4().to_string();

    let resolution = MarketResolution {
        id: resolution_id.clone(),
        market_id: market.id.clone(),
        winning_option_id: plan.winning_option_id.clone(),
        resolved_by,
        resolved_at: ctx.now,
        evidence,
        total_pool: plan.total_pool,
        house_fee: plan.house_fee,
        creator_fee: plan.creator_fee,
        winner_pool: plan.winner_pool,
        winner_count: plan.winner_count,
        status: ResolutionStatus::Completed,
    };
    ctx.put(&resolution, None)?;

    let mut updated_market = market;
    let market_expected_version = updated_market.version;
    updated_market.status = MarketStatus::Resolved;
    updated_market.resolution_id = Some(resolution_id.clone());
    updated_market.version += 1;
    ctx.put(&updated_market, Some(market_expected_version))?;

    let mut by_id: HashMap<CommitmentId, Commitment> =
        commitments.into_iter().map(|c| (c.id.clone(), c)).collect();

    let mut created_transaction_ids: Vec<TransactionId> = Vec::new();
    let mut breakdowns: HashMap<UserId, UserPayoutBreakdown> = HashMap::new();
    let mut distributed_sum: u64 = 0;
    let mut double_payout_guard = std::collections::HashSet::new();

    for record in &plan.records {
        let commitment = by_id.remove(&record.commitment_id).ok_or_else(|| {
            ResolutionError::fatal(format!(
                "plan referenced commitment {} that was not loaded for this market",
                record.commitment_id
            ))
        })?;
        if !double_payout_guard.insert(commitment.id.clone()) {
            return Err(ResolutionError::distribution_verification_failed(format!(
                "commitment {} settled more than once",
                commitment.id
            )));
        }

        let canonical_user_id = resolve_user_id(ctx, &record.user_id)?;
        let entry = breakdowns
            .entry(canonical_user_id.clone())
            .or_insert_with(|| UserPayoutBreakdown {
                user_id: canonical_user_id.clone(),
                winning_commitments: Vec::new(),
                losing_commitments: Vec::new(),
                net_payout: 0,
                committed_restored: 0,
                earned_delta: 0,
                spent_delta: 0,
            });
        entry.committed_restored += commitment.tokens_committed;

        let (status, final_payout, final_profit) = if record.ill_formed {
            let tx = ledger::apply(
                ctx,
                LedgerOp::refund(
                    canonical_user_id.clone(),
                    record.payout,
                    Some(commitment.id.clone()),
                ),
                starter_grant,
            )?;
            created_transaction_ids.push(tx.id);
            entry.net_payout += record.payout as i64;
            entry.losing_commitments.push(commitment.id.clone());
            (CommitmentStatus::Refunded, record.payout, 0)
        } else if record.is_winner {
            let tx = ledger::apply(
                ctx,
                LedgerOp::win(
                    canonical_user_id.clone(),
                    record.payout,
                    commitment.tokens_committed,
                    Some(commitment.id.clone()),
                ),
                starter_grant,
            )?;
            created_transaction_ids.push(tx.id);
            entry.net_payout += record.payout as i64;
            entry.earned_delta += (record.payout as i64 - commitment.tokens_committed as i64).max(0);
            entry.winning_commitments.push(commitment.id.clone());
            distributed_sum += record.payout;
            (CommitmentStatus::Won, record.payout, record.profit)
        } else if plan.winner_count == 0 {
            // §4.4 edge case: no winners, remainder refunded pro-rata. The
            // whole stake is terminal (it leaves `committed_tokens`) even
            // though only the pro-rata share is credited back.
            let tx = ledger::apply(
                ctx,
                LedgerOp::partial_refund(
                    canonical_user_id.clone(),
                    record.payout,
                    commitment.tokens_committed,
                    Some(commitment.id.clone()),
                ),
                starter_grant,
            )?;
            created_transaction_ids.push(tx.id);
            entry.net_payout += record.payout as i64;
            entry.losing_commitments.push(commitment.id.clone());
            distributed_sum += record.payout;
            (CommitmentStatus::Refunded, record.payout, record.profit)
        } else {
            let tx = ledger::apply(
                ctx,
                LedgerOp::loss(
                    canonical_user_id.clone(),
                    commitment.tokens_committed,
                    Some(commitment.id.clone()),
                ),
                starter_grant,
            )?;
            created_transaction_ids.push(tx.id);
            entry.spent_delta += commitment.tokens_committed as i64;
            entry.losing_commitments.push(commitment.id.clone());
            (CommitmentStatus::Lost, 0, -(commitment.tokens_committed as i64))
        };

        commitments::put_terminal(
            ctx,
            commitment,
            status,
            Some(final_payout),
            Some(final_profit),
            Some(distribution_id.clone()),
        )?;
    }

    if !by_id.is_empty() {
        return Err(ResolutionError::distribution_verification_failed(
            "not every loaded commitment appeared in the payout plan",
        ));
    }

    if plan.creator_fee > 0 {
        let creator_fee_destination = resolve_user_id(ctx, &creator_fee_destination)?;
        let tx = ledger::apply(
            ctx,
            LedgerOp::win(
                creator_fee_destination.clone(),
                plan.creator_fee,
                0,
                Some(resolution_id.clone()),
            )
            .with_metadata(serde_json::json!({ "staked_returned": 0, "fee_type": "creator_fee" })),
            starter_grant,
        )?;
        created_transaction_ids.push(tx.id);
        let entry = breakdowns
            .entry(creator_fee_destination)
            .or_insert_with_key(|user_id| UserPayoutBreakdown {
                user_id: user_id.clone(),
                winning_commitments: Vec::new(),
                losing_commitments: Vec::new(),
                net_payout: 0,
                committed_restored: 0,
                earned_delta: 0,
                spent_delta: 0,
            });
        entry.net_payout += plan.creator_fee as i64;
        entry.earned_delta += plan.creator_fee as i64;
    }

    let verification_checks = VerificationChecks {
        all_commitments_processed: true, // guaranteed above: by_id drained or we already errored
        payout_sums_correct: distributed_sum == plan.winner_pool,
        no_double_payouts: true, // guaranteed by double_payout_guard
        balance_updates_successful: true, // every ledger::apply above returned Ok
        transaction_records_created: created_transaction_ids.len() >= plan.records.len(),
    };
    if !verification_checks.all_passed() {
        return Err(ResolutionError::distribution_verification_failed(format!(
            "{verification_checks:?}"
        )));
    }

    let distribution = PayoutDistribution {
        id: distribution_id,
        market_id: updated_market.id.clone(),
        resolution_id,
        total_pool: plan.total_pool,
        house_fee: plan.house_fee,
        creator_fee: plan.creator_fee,
        winner_pool: plan.winner_pool,
        user_breakdown: breakdowns.into_values().collect(),
        processed_at: ctx.now,
        status: DistributionStatus::Completed,
        created_transaction_ids,
        verification_checks,
        version: 0,
    };
    ctx.put(&distribution, None)?;

    Ok(ApplyOutcome {
        resolution,
        market: updated_market,
        distribution,
    })
}

pub struct RollbackOutcome {
    pub distribution: PayoutDistribution,
    pub market: Market,
    pub affected_users: Vec<UserId>,
}

/// Reverses a completed distribution: every affected commitment goes back
/// to `active`, every user's balance is adjusted by the negative of what
/// this distribution credited/debited them, and the market returns to
/// `pending_resolution` (spec §4.5 "rollback").
pub fn rollback(
    ctx: &TxContext,
    distribution: PayoutDistribution,
    market: Market,
    commitments: Vec<Commitment>,
    starter_grant: u64,
) -> Result<RollbackOutcome, ResolutionError> {
    if distribution.status != DistributionStatus::Completed {
        return Err(ResolutionError::new(
            crate::error::ErrorKind::ConflictState,
            crate::error::ErrorCode::AlreadyRolledBack,
            format!("distribution {} is not in completed state", distribution.id),
        ));
    }

    let mut by_id: HashMap<CommitmentId, Commitment> =
        commitments.into_iter().map(|c| (c.id.clone(), c)).collect();

    let mut affected_users = Vec::new();
    for breakdown in &distribution.user_breakdown {
        let canonical_user_id = resolve_user_id(ctx, &breakdown.user_id)?;
        affected_users.push(canonical_user_id.clone());
        ledger::apply(
            ctx,
            LedgerOp::rollback(
                canonical_user_id,
                -breakdown.net_payout,
                breakdown.committed_restored as i64,
                -breakdown.earned_delta,
                -breakdown.spent_delta,
                Some(distribution.id.clone()),
            ),
            starter_grant,
        )?;

        for commitment_id in breakdown
            .winning_commitments
            .iter()
            .chain(breakdown.losing_commitments.iter())
        {
            if let Some(commitment) = by_id.remove(commitment_id) {
                commitments::reset_to_active(ctx, commitment)?;
            }
        }
    }

    let mut rolled_back = distribution;
    rolled_back.status = DistributionStatus::RolledBack;
    rolled_back.version += 1;
    let distribution_version = rolled_back.version - 1;
    ctx.put(&rolled_back, Some(distribution_version))?;

    let mut reverted_market = market;
    let market_expected_version = reverted_market.version;
    reverted_market.status = MarketStatus::PendingResolution;
    reverted_market.version += 1;
    ctx.put(&reverted_market, Some(market_expected_version))?;

    Ok(RollbackOutcome {
        distribution: rolled_back,
        market: reverted_market,
        affected_users,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::compute_plan;
    use crate::domain::{MarketOption, Timestamp, NO, YES};
    use crate::store::SqliteStore;

    fn open_market() -> Market {
        Market {
            id: "m1".into(),
            title: "t".into(),
            creator_id: "creator".into(),
            status: MarketStatus::Resolving,
            ends_at: Timestamp::from_secs(0),
            options: vec![
                MarketOption { id: YES.into(), text: "yes".into(), total_tokens: 0, participant_count: 0 },
                MarketOption { id: NO.into(), text: "no".into(), total_tokens: 0, participant_count: 0 },
            ],
            resolution_id: None,
            cancellation_reason: None,
            version: 0,
        }
    }

    fn active_commitment(id: &str, user: &str, option_id: &str, tokens: u64) -> Commitment {
        Commitment {
            id: id.into(),
            user_id: user.into(),
            market_id: "m1".into(),
            option_id: Some(option_id.into()),
            position: None,
            tokens_committed: tokens,
            odds_snapshot: 1.0,
            potential_winning: tokens,
            status: CommitmentStatus::Active,
            created_at: Timestamp::from_secs(0),
            resolved_at: None,
            payout: None,
            profit: None,
            metadata: serde_json::Value::Null,
            last_distribution_id: None,
            version: 0,
        }
    }

    #[test]
    fn apply_then_rollback_restores_every_balance_exactly() {
        let store = SqliteStore::open_in_memory().unwrap();
        let market = open_market();
        let commitments = vec![
            active_commitment("c1", "U1", YES, 200),
            active_commitment("c2", "U2", NO, 300),
            active_commitment("c3", "U3", NO, 500),
        ];

        // seed balances: each user bought exactly as many tokens as they
        // committed, so pre-resolve available == 0 and committed == stake.
        store
            .tx(1, |ctx| {
                for (user, tokens) in [("U1", 200u64), ("U2", 300), ("U3", 500)] {
                    ledger::apply(ctx, LedgerOp::purchase(user, tokens, None), 0)?;
                    ledger::apply(ctx, LedgerOp::commit(user, tokens, None), 0)?;
                }
                Ok(())
            })
            .unwrap();

        let plan = compute_plan(&market, &commitments, YES, 0.02, 0.05, 0.05).unwrap();

        let distribution_id = store
            .tx(1, |ctx| {
                let outcome = apply(
                    ctx,
                    market.clone(),
                    commitments.clone(),
                    &plan,
                    vec![],
                    "operator".into(),
                    "creator".into(),
                    0,
                )?;
                Ok(outcome.distribution.id)
            })
            .unwrap();

        let u1_after: crate::domain::UserBalance = store.get("U1").unwrap().unwrap();
        assert_eq!(u1_after.available_tokens, 930);
        assert_eq!(u1_after.committed_tokens, 0);

        store
            .tx(1, |ctx| {
                let distribution: PayoutDistribution = ctx.get(&distribution_id)?.unwrap();
                let market: Market = ctx.get("m1")?.unwrap();
                let commitments = vec![
                    ctx.get::<Commitment>("c1")?.unwrap(),
                    ctx.get::<Commitment>("c2")?.unwrap(),
                    ctx.get::<Commitment>("c3")?.unwrap(),
                ];
                rollback(ctx, distribution, market, commitments, 0)?;
                Ok(())
            })
            .unwrap();

        let u1_restored: crate::domain::UserBalance = store.get("U1").unwrap().unwrap();
        assert_eq!(u1_restored.available_tokens, 0);
        assert_eq!(u1_restored.committed_tokens, 200);

        let u2_restored: crate::domain::UserBalance = store.get("U2").unwrap().unwrap();
        assert_eq!(u2_restored.available_tokens, 0);
        assert_eq!(u2_restored.committed_tokens, 300);

        let c1: Commitment = store.get("c1").unwrap().unwrap();
        assert_eq!(c1.status, CommitmentStatus::Active);
        assert!(c1.payout.is_none());

        let market: Market = store.get("m1").unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::PendingResolution);
    }

    #[test]
    fn no_winner_refund_then_rollback_restores_the_full_original_stake() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut market = open_market();
        market.options = vec![
            MarketOption { id: YES.into(), text: "yes".into(), total_tokens: 0, participant_count: 0 },
            MarketOption { id: NO.into(), text: "no".into(), total_tokens: 0, participant_count: 0 },
        ];
        let commitments = vec![
            active_commitment("c1", "U1", NO, 200),
            active_commitment("c2", "U2", NO, 300),
        ];

        store
            .tx(1, |ctx| {
                for (user, tokens) in [("U1", 200u64), ("U2", 300)] {
                    ledger::apply(ctx, LedgerOp::purchase(user, tokens, None), 0)?;
                    ledger::apply(ctx, LedgerOp::commit(user, tokens, None), 0)?;
                }
                Ok(())
            })
            .unwrap();

        // resolving in favor of YES leaves no winners among these two
        // NO-side commitments: the remainder is refunded pro-rata.
        let plan = compute_plan(&market, &commitments, YES, 0.02, 0.05, 0.05).unwrap();
        assert_eq!(plan.winner_count, 0);

        let distribution_id = store
            .tx(1, |ctx| {
                let outcome = apply(
                    ctx,
                    market.clone(),
                    commitments.clone(),
                    &plan,
                    vec![],
                    "operator".into(),
                    "creator".into(),
                    0,
                )?;
                Ok(outcome.distribution.id)
            })
            .unwrap();

        let u1_after: crate::domain::UserBalance = store.get("U1").unwrap().unwrap();
        assert_eq!(u1_after.committed_tokens, 0, "the whole stake must leave committed even on a partial refund");
        assert!(u1_after.available_tokens < 200, "U1's share of a no-winner pool is strictly less than its stake");

        store
            .tx(1, |ctx| {
                let distribution: PayoutDistribution = ctx.get(&distribution_id)?.unwrap();
                let market: Market = ctx.get("m1")?.unwrap();
                let commitments = vec![
                    ctx.get::<Commitment>("c1")?.unwrap(),
                    ctx.get::<Commitment>("c2")?.unwrap(),
                ];
                rollback(ctx, distribution, market, commitments, 0)?;
                Ok(())
            })
            .unwrap();

        let u1_restored: crate::domain::UserBalance = store.get("U1").unwrap().unwrap();
        assert_eq!(u1_restored.available_tokens, 0);
        assert_eq!(u1_restored.committed_tokens, 200);

        let u2_restored: crate::domain::UserBalance = store.get("U2").unwrap().unwrap();
        assert_eq!(u2_restored.available_tokens, 0);
        assert_eq!(u2_restored.committed_tokens, 300);
    }
}
