//! C4 — PayoutCalculator: the pure, CPU-only function that turns a market,
//! its commitments, and a declared winner into a fully self-verified
//! payout plan (spec §4.4). No I/O happens here; everything downstream
//! (C5/C6) just applies what this module computed.

use crate::commitments;
use crate::domain::{
    Commitment, CommitmentId, IdentificationOrigin, Market, MarketId, OptionId, UserId,
};
use crate::error::ResolutionError;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct PayoutCalculationRecord {
    pub commitment_id: CommitmentId,
    pub user_id: UserId,
    pub tokens_committed: u64,
    pub effective_option_id: Option<OptionId>,
    pub origin: Option<IdentificationOrigin>,
    pub is_winner: bool,
    pub ill_formed: bool,
    pub payout: u64,
    pub profit: i64,
}

#[derive(Debug, Clone)]
pub struct PayoutPlan {
    pub market_id: MarketId,
    pub winning_option_id: OptionId,
    pub total_pool: u64,
    pub house_fee: u64,
    pub creator_fee: u64,
    pub winner_pool: u64,
    pub winner_count: u64,
    /// One record per commitment supplied as input, well-formed or not.
    pub records: Vec<PayoutCalculationRecord>,
}

impl PayoutPlan {
    pub fn winners(&self) -> impl Iterator<Item = &PayoutCalculationRecord> {
        self.records.iter().filter(|r| !r.ill_formed && r.is_winner)
    }

    pub fn losers(&self) -> impl Iterator<Item = &PayoutCalculationRecord> {
        self.records
            .iter()
            .filter(|r| !r.ill_formed && !r.is_winner)
    }

    pub fn ill_formed(&self) -> impl Iterator<Item = &PayoutCalculationRecord> {
        self.records.iter().filter(|r| r.ill_formed)
    }
}

/// `floor(amount * fraction)`, computed with a fixed-point scale so the
/// result doesn't depend on float rounding noise at the ULP level (spec
/// §4.4 "Pool math (deterministic, integer)").
fn floor_fraction(amount: u64, fraction: f64) -> u64 {
    const SCALE: u128 = 1_000_000_000;
    let scaled_fraction = (fraction * SCALE as f64).round().max(0.0) as u128;
    ((amount as u128 * scaled_fraction) / SCALE) as u64
}

/// Splits `pool` proportionally to `stakes` with floor division, then
/// hands the rounding remainder one token at a time to the stakes sorted
/// by (tokens desc, id asc) until it is exhausted (spec §4.4 "Rounding
/// remainder"). Guarantees `sum(result.values()) == pool` whenever
/// `stakes` is non-empty.
fn distribute_pool(pool: u64, stakes: &[(String, u64)]) -> HashMap<String, u64> {
    let total: u128 = stakes.iter().map(|(_, t)| *t as u128).sum();
    let mut shares = HashMap::new();
    if total == 0 {
        return shares;
    }

    let mut assigned: u128 = 0;
    for (id, tokens) in stakes {
        let share = ((pool as u128 * (*tokens as u128)) / total) as u64;
        assigned += share as u128;
        shares.insert(id.clone(), share);
    }

    let mut remainder = pool - assigned as u64;
    let mut order: Vec<&(String, u64)> = stakes.iter().collect();
    order.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (id, _) in order {
        if remainder == 0 {
            break;
        }
        *shares.get_mut(id).expect("inserted above") += 1;
        remainder -= 1;
    }
    shares
}

/// Computes the payout plan for resolving `market` in favor of
/// `winning_option_id`. Pure and side-effect free; callers (C5/C6) persist
/// what it returns.
pub fn compute_plan(
    market: &Market,
    commitments: &[Commitment],
    winning_option_id: &str,
    creator_fee_fraction: f64,
    house_fee_fraction: f64,
    max_creator_fee_fraction: f64,
) -> Result<PayoutPlan, ResolutionError> {
    if !market.has_option(winning_option_id) {
        return Err(ResolutionError::invalid_winner(format!(
            "{winning_option_id} is not an option of market {}",
            market.id
        )));
    }
    if !(0.0..=max_creator_fee_fraction + f64::EPSILON).contains(&creator_fee_fraction) {
        return Err(ResolutionError::invalid_fee_configuration(format!(
            "creator fee fraction {creator_fee_fraction} outside [0, {max_creator_fee_fraction}]"
        )));
    }
    if house_fee_fraction + creator_fee_fraction > 1.0 {
        return Err(ResolutionError::invalid_fee_configuration(
            "house fee + creator fee fraction exceeds 1.0",
        ));
    }

    let market_options: Vec<&str> = market.options.iter().map(|o| o.id.as_str()).collect();

    let mut records = Vec::with_capacity(commitments.len());
    let mut well_formed_total: u64 = 0;
    for c in commitments {
        let (effective, origin) = commitments::classify(c, &market_options);
        match effective {
            None => records.push(PayoutCalculationRecord {
                commitment_id: c.id.clone(),
                user_id: c.user_id.clone(),
                tokens_committed: c.tokens_committed,
                effective_option_id: None,
                origin: None,
                is_winner: false,
                ill_formed: true,
                payout: c.tokens_committed, // ill-formed commitments are refunded in full
                profit: 0,
            }),
            Some(option_id) => {
                well_formed_total += c.tokens_committed;
                records.push(PayoutCalculationRecord {
                    commitment_id: c.id.clone(),
                    user_id: c.user_id.clone(),
                    tokens_committed: c.tokens_committed,
                    effective_option_id: Some(option_id.clone()),
                    origin,
                    is_winner: option_id == winning_option_id,
                    ill_formed: false,
                    payout: 0,
                    profit: 0,
                });
            }
        }
    }

    let total_pool = well_formed_total;
    let house_fee = floor_fraction(total_pool, house_fee_fraction);
    let creator_fee = floor_fraction(total_pool, creator_fee_fraction);
    let winner_pool = total_pool
        .checked_sub(house_fee)
        .and_then(|p| p.checked_sub(creator_fee))
        .ok_or_else(|| {
            ResolutionError::invalid_fee_configuration(
                "house fee + creator fee exceeds the pool",
            )
        })?;

    let winner_stakes: Vec<(String, u64)> = records
        .iter()
        .filter(|r| !r.ill_formed && r.is_winner)
        .map(|r| (r.commitment_id.clone(), r.tokens_committed))
        .collect();
    let winner_count = winner_stakes.len() as u64;

    if !winner_stakes.is_empty() {
        let shares = distribute_pool(winner_pool, &winner_stakes);
        for r in records.iter_mut().filter(|r| !r.ill_formed && r.is_winner) {
            let payout = *shares.get(&r.commitment_id).unwrap_or(&0);
            r.payout = payout;
            r.profit = payout as i64 - r.tokens_committed as i64;
        }
    } else {
        // §4.4 edge case / §9(a): no well-formed commitment backed the
        // winning option. Fees are still taken; the remaining winner_pool
        // is refunded pro-rata to every well-formed (losing) commitment
        // rather than absorbed by the house.
        let loser_stakes: Vec<(String, u64)> = records
            .iter()
            .filter(|r| !r.ill_formed)
            .map(|r| (r.commitment_id.clone(), r.tokens_committed))
            .collect();
        if !loser_stakes.is_empty() {
            let shares = distribute_pool(winner_pool, &loser_stakes);
            for r in records.iter_mut().filter(|r| !r.ill_formed) {
                let payout = *shares.get(&r.commitment_id).unwrap_or(&0);
                r.payout = payout;
                r.profit = payout as i64 - r.tokens_committed as i64;
            }
        }
    }

    let plan = PayoutPlan {
        market_id: market.id.clone(),
        winning_option_id: winning_option_id.to_string(),
        total_pool,
        house_fee,
        creator_fee,
        winner_pool,
        winner_count,
        records,
    };
    verify(&plan, commitments.len())?;
    Ok(plan)
}

/// Mandatory self-verification (spec §4.4): every commitment processed
/// exactly once, the rounding closure holds, and no commitment is both a
/// winner and a loser. Any failure here is a platform bug, never a user
/// input error, hence `CalculatorInvariantViolated` rather than a 4xx kind.
fn verify(plan: &PayoutPlan, input_len: usize) -> Result<(), ResolutionError> {
    if plan.records.len() != input_len {
        return Err(ResolutionError::calculator_invariant_violated(
            "not every commitment produced exactly one record",
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for r in &plan.records {
        if !seen.insert(&r.commitment_id) {
            return Err(ResolutionError::calculator_invariant_violated(format!(
                "commitment {} processed more than once",
                r.commitment_id
            )));
        }
    }

    if plan.house_fee + plan.creator_fee + plan.winner_pool != plan.total_pool {
        return Err(ResolutionError::calculator_invariant_violated(
            "house_fee + creator_fee + winner_pool != total_pool",
        ));
    }

    let winners: Vec<_> = plan.winners().collect();
    if !winners.is_empty() {
        let paid: u64 = winners.iter().map(|r| r.payout).sum();
        if paid != plan.winner_pool {
            return Err(ResolutionError::calculator_invariant_violated(format!(
                "sum of winner payouts ({paid}) != winner_pool ({})",
                plan.winner_pool
            )));
        }
    }

    for r in &plan.records {
        if r.ill_formed && r.is_winner {
            return Err(ResolutionError::calculator_invariant_violated(
                "an ill-formed commitment was marked as a winner",
            ));
        }
    }

    Ok(())
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::domain::{CommitmentStatus, MarketOption, MarketStatus, Timestamp, NO, YES};
    use proptest::prelude::*;

    fn market_for_proptest() -> Market {
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

    fn commitment_for_proptest(index: usize, option_id: &str, tokens: u64) -> Commitment {
        Commitment {
            id: format!("c{index}"),
            user_id: format!("u{index}"),
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

    /// A `(option, tokens)` pair per commitment, `tokens` kept small and
    /// positive so stake sums can't overflow `u64` across the largest
    /// vectors proptest will generate.
    fn commitments_strategy() -> impl Strategy<Value = Vec<(bool, u64)>> {
        prop::collection::vec((any::<bool>(), 1u64..=10_000), 0..40)
    }

    proptest! {
        /// Invariant 1 (conservation) and invariant 2 (rounding closure):
        /// houseFee + creatorFee + winnerPool == totalPool, and winner
        /// payouts sum exactly to winnerPool, for any mix of stakes.
        #[test]
        fn conservation_and_rounding_closure_hold(stakes in commitments_strategy()) {
            let m = market_for_proptest();
            let commitments: Vec<Commitment> = stakes
                .iter()
                .enumerate()
                .map(|(i, (is_yes, tokens))| {
                    commitment_for_proptest(i, if *is_yes { YES } else { NO }, *tokens)
                })
                .collect();

            let plan = compute_plan(&m, &commitments, YES, 0.02, 0.05, 0.05).unwrap();
            prop_assert_eq!(plan.house_fee + plan.creator_fee + plan.winner_pool, plan.total_pool);

            let paid: u64 = plan.winners().map(|r| r.payout).sum();
            if plan.winner_count > 0 {
                prop_assert_eq!(paid, plan.winner_pool);
            }
        }

        /// Invariant 5 (no double-spend): every commitment produces exactly
        /// one record, and no record is marked as settling more than one way.
        #[test]
        fn every_commitment_settles_exactly_once(stakes in commitments_strategy()) {
            let m = market_for_proptest();
            let commitments: Vec<Commitment> = stakes
                .iter()
                .enumerate()
                .map(|(i, (is_yes, tokens))| {
                    commitment_for_proptest(i, if *is_yes { YES } else { NO }, *tokens)
                })
                .collect();

            let plan = compute_plan(&m, &commitments, YES, 0.02, 0.05, 0.05).unwrap();
            prop_assert_eq!(plan.records.len(), commitments.len());
            let mut seen = std::collections::HashSet::new();
            for r in &plan.records {
                prop_assert!(seen.insert(r.commitment_id.clone()));
                prop_assert!(!(r.ill_formed && r.is_winner));
            }
        }

        /// Invariant 7 (fee bounds): fees never exceed the configured
        /// fractions of the pool, and a creator fraction outside [0, max]
        /// is always rejected rather than silently clamped.
        #[test]
        fn fees_stay_within_configured_bounds(
            stakes in commitments_strategy(),
            creator_fee_fraction in 0.0f64..=0.05,
            house_fee_fraction in 0.0f64..=0.1,
        ) {
            let m = market_for_proptest();
            let commitments: Vec<Commitment> = stakes
                .iter()
                .enumerate()
                .map(|(i, (is_yes, tokens))| {
                    commitment_for_proptest(i, if *is_yes { YES } else { NO }, *tokens)
                })
                .collect();

            let plan = compute_plan(&m, &commitments, YES, creator_fee_fraction, house_fee_fraction, 0.05).unwrap();
            let pool = plan.total_pool as f64;
            prop_assert!(plan.house_fee as f64 <= pool * house_fee_fraction + 1.0);
            prop_assert!(plan.creator_fee as f64 <= pool * creator_fee_fraction + 1.0);
        }

        #[test]
        fn out_of_range_creator_fee_is_always_rejected(fraction in prop_oneof![
            (-1.0f64..-0.0001),
            (0.0501f64..5.0),
        ]) {
            let m = market_for_proptest();
            let err = compute_plan(&m, &[], YES, fraction, 0.05, 0.05).unwrap_err();
            prop_assert_eq!(err.code, crate::error::ErrorCode::InvalidFeeConfiguration);
        }
    }
}
