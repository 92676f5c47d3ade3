//! C3 — CommitmentRepo: indexed access to commitments, tolerant of the two
//! schemas the platform has accumulated (spec §4.3, §9 "Dual-schema").

use crate::domain::{
    Commitment, CommitmentStatus, Document as _, IdentificationOrigin, MarketId, Position,
};
use crate::error::ResolutionError;
use crate::store::{EqFilter, OrderBy, TxContext};

/// Resolves the option a commitment actually targets, tolerating legacy
/// records that only carry `position`, and tags how it was identified
/// (spec §4.3, §4.4 normalization).
///
/// Returns `None` when neither field resolves to a real option of `M`
/// (the "ill-formed" case) or when both are present but disagree.
pub fn classify(
    commitment: &Commitment,
    market_options: &[&str],
) -> (Option<String>, Option<IdentificationOrigin>) {
    let from_option_id = commitment
        .option_id
        .as_deref()
        .filter(|id| market_options.contains(id));
    let from_position = commitment
        .position
        .map(|p| p.as_option_id())
        .filter(|id| market_options.contains(id));

    match (from_option_id, from_position) {
        (Some(a), Some(b)) if a == b => {
            (Some(a.to_string()), Some(IdentificationOrigin::Hybrid))
        }
        (Some(_), Some(_)) => (None, None), // disagree: ill-formed
        (Some(a), None) => (
            Some(a.to_string()),
            Some(IdentificationOrigin::OptionIdBased),
        ),
        (None, Some(b)) => (
            Some(b.to_string()),
            Some(IdentificationOrigin::PositionBased),
        ),
        (None, None) => (None, None),
    }
}

pub fn effective_option_id(commitment: &Commitment, market_options: &[&str]) -> Option<String> {
    classify(commitment, market_options).0
}

/// Lists every commitment targeting `market_id`, optionally narrowed by
/// status. Commitments are keyed only by `market_id` in the new schema, so
/// there is a single index to scan; `listByMarket`'s "dedup across legacy
/// index keys" requirement collapses to a single query plus an id-based
/// dedup as a defensive measure against double-written records.
pub fn list_by_market(
    ctx: &TxContext,
    market_id: &MarketId,
    status: Option<CommitmentStatus>,
) -> Result<Vec<Commitment>, ResolutionError> {
    let mut filters = vec![EqFilter::new("market_id", market_id.clone())];
    if let Some(status) = status {
        filters.push(EqFilter::new("status", serde_json::to_value(status)?));
    }
    let mut items: Vec<Commitment> =
        ctx.query(&filters, Some(OrderBy::asc("id")), None)?;

    let mut seen = std::collections::HashSet::new();
    items.retain(|c| seen.insert(c.id.clone()));
    Ok(items)
}

pub fn list_by_user(
    ctx: &TxContext,
    user_id: &str,
    status: Option<CommitmentStatus>,
) -> Result<Vec<Commitment>, ResolutionError> {
    let mut filters = vec![EqFilter::new("user_id", user_id.to_string())];
    if let Some(status) = status {
        filters.push(EqFilter::new("status", serde_json::to_value(status)?));
    }
    ctx.query(&filters, Some(OrderBy::asc("id")), None)
}

/// Finds commitments of a market whose option cannot be resolved against
/// its current option list (spec §4.4 "ill-formed").
pub fn find_ill_formed(commitments: &[Commitment], market_options: &[&str]) -> Vec<Commitment> {
    commitments
        .iter()
        .filter(|c| effective_option_id(c, market_options).is_none())
        .cloned()
        .collect()
}

/// Persists a single commitment's terminal status, resolved timestamp and
/// payout/profit fields, enforcing the optimistic version check (spec
/// §4.3 "updateStatuses").
pub fn put_terminal(
    ctx: &TxContext,
    mut commitment: Commitment,
    status: CommitmentStatus,
    payout: Option<u64>,
    profit: Option<i64>,
    distribution_id: Option<String>,
) -> Result<(), ResolutionError> {
    let expected_version = commitment.version;
    commitment.status = status;
    commitment.resolved_at = Some(ctx.now);
    commitment.payout = payout;
    commitment.profit = profit;
    commitment.last_distribution_id = distribution_id;
    commitment.version += 1;
    ctx.put(&commitment, Some(expected_version))?;
    Ok(())
}

/// Reverses `put_terminal`, used by rollback (spec §4.5 "rollback"): resets
/// a commitment back to `active` with no resolution-time fields set.
pub fn reset_to_active(ctx: &TxContext, mut commitment: Commitment) -> Result<(), ResolutionError> {
    let expected_version = commitment.version;
    commitment.status = CommitmentStatus::Active;
    commitment.resolved_at = None;
    commitment.payout = None;
    commitment.profit = None;
    commitment.version += 1;
    ctx.put(&commitment, Some(expected_version))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timestamp;

    fn commitment(option_id: Option<&str>, position: Option<Position>) -> Commitment {
        Commitment {
            id: "c1".into(),
            user_id: "u1".into(),
            market_id: "m1".into(),
            option_id: option_id.map(|s| s.to_string()),
            position,
            tokens_committed: 100,
            odds_snapshot: 1.0,
            potential_winning: 100,
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
    fn legacy_position_only_resolves_via_binary_reserved_ids() {
        let c = commitment(None, Some(Position::Yes));
        assert_eq!(
            effective_option_id(&c, &["yes", "no"]),
            Some("yes".to_string())
        );
    }

    #[test]
    fn option_id_and_agreeing_position_resolve() {
        let c = commitment(Some("yes"), Some(Position::Yes));
        assert_eq!(
            effective_option_id(&c, &["yes", "no"]),
            Some("yes".to_string())
        );
    }

    #[test]
    fn disagreeing_option_id_and_position_are_ill_formed() {
        let c = commitment(Some("yes"), Some(Position::No));
        assert_eq!(effective_option_id(&c, &["yes", "no"]), None);
    }

    #[test]
    fn unknown_option_id_with_no_position_is_ill_formed() {
        let c = commitment(Some("xyz"), None);
        assert_eq!(effective_option_id(&c, &["yes", "no"]), None);
    }
}
