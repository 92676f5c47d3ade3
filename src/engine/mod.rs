//! C5 — ResolutionEngine: the state machine and orchestrator (spec §4.5).
//! Owns the public operations (`resolve`, `rollback`, `cancel`,
//! `get_pending_resolution`, `payout_preview`, `get_status`) and the
//! advisory-lock / failure-recovery choreography around them. Every
//! mutation flows through `Store::tx`; this module itself never touches
//! `rusqlite` directly.

use crate::calculator::{self, PayoutPlan};
use crate::changefeed::{ChangeEvent, ChangeFeed};
use crate::commitments;
use crate::config::{Config, MIN_EVIDENCE_DESCRIPTION_LEN};
use crate::distributor;
use crate::domain::{
    Commitment, CommitmentStatus, DistributionStatus, Evidence, EvidenceType, Market, MarketId,
    MarketStatus, PayoutDistribution, ResolutionLogEntry, ResolutionLogEvent, UserId,
};
use crate::error::{ErrorCode, ErrorKind, ResolutionError};
use crate::identity::resolve_user_id;
use crate::ledger::{self, LedgerOp};
use crate::store::{EqFilter, OrderBy, SqliteStore};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// AuthZ is delegated: operator identity arrives pre-authenticated (spec
/// §1 non-goal "does not authenticate end users"), but *capability* — is
/// this operator allowed to resolve/rollback/cancel markets — is still a
/// real decision a deployment may want to plug in. The default just
/// requires a non-empty id.
pub trait OperatorAuthority: Send + Sync {
    fn authorize(&self, operator_id: &str) -> Result<(), ResolutionError>;
}

pub struct TrustedOperator;

impl OperatorAuthority for TrustedOperator {
    fn authorize(&self, operator_id: &str) -> Result<(), ResolutionError> {
        if operator_id.trim().is_empty() {
            Err(ResolutionError::unauthorized("operator id is required"))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
pub struct ResolveOutcome {
    pub resolution_id: String,
    pub distribution_id: String,
    pub summary: PayoutDistribution,
}

pub struct RollbackResult {
    pub distribution_id: String,
    pub affected_users: Vec<UserId>,
}

pub struct CancelOutcome {
    pub refunds_processed: u64,
}

pub struct MarketStatusSummary {
    pub status: MarketStatus,
    pub last_event: Option<ResolutionLogEvent>,
    pub logs: Vec<ResolutionLogEntry>,
}

pub struct ResolutionEngine {
    store: Arc<SqliteStore>,
    authority: Arc<dyn OperatorAuthority>,
    changefeed: Arc<ChangeFeed>,
    config: Config,
}

impl ResolutionEngine {
    pub fn new(store: Arc<SqliteStore>, changefeed: Arc<ChangeFeed>, config: Config) -> Self {
        Self {
            store,
            authority: Arc::new(TrustedOperator),
            changefeed,
            config,
        }
    }

    pub fn with_authority(mut self, authority: Arc<dyn OperatorAuthority>) -> Self {
        self.authority = authority;
        self
    }

    /// The deadline a caller gets if it doesn't supply its own (spec §5
    /// "Cancellation & timeouts"), derived from `OPERATION_DEADLINE_MS`.
    pub fn default_deadline(&self) -> Instant {
        Instant::now() + Duration::from_millis(self.config.operation_deadline_ms)
    }

    fn check_deadline(deadline: Instant, context: &str) -> Result<(), ResolutionError> {
        if Instant::now() >= deadline {
            Err(ResolutionError::deadline_exceeded(format!(
                "operation deadline elapsed {context}"
            )))
        } else {
            Ok(())
        }
    }

    fn emit_log(
        &self,
        market_id: &str,
        event: ResolutionLogEvent,
        message: impl Into<String>,
        metadata: Value,
    ) -> Result<(), ResolutionError> {
        let entry = ResolutionLogEntry {
            id: Uuid::new_v4().to_string(),
            market_id: market_id.to_string(),
            event,
            message: message.into(),
            at: self.store.now(),
            metadata,
        };
        self.store.put(&entry, None)?;
        Ok(())
    }

    fn revert_to_pending(&self, market_id: &str) -> Result<(), ResolutionError> {
        self.store.tx(self.config.tx_retry_limit, |ctx| {
            if let Some(mut market) = ctx.get::<Market>(market_id)? {
                if market.status == MarketStatus::Resolving {
                    let expected_version = market.version;
                    market.status = MarketStatus::PendingResolution;
                    market.version += 1;
                    ctx.put(&market, Some(expected_version))?;
                }
            }
            Ok(())
        })
    }

    /// Steps 3-5 of `resolve` (spec §4.5): validate and claim the
    /// per-market advisory lock by flipping status to `resolving` under
    /// an optimistic version check. A market already `resolving` is a
    /// conflict (retried like any other optimistic race, eventually
    /// `ConcurrencyExhausted` if a resolution is genuinely stuck).
    fn acquire_resolving_lock(
        &self,
        market_id: &str,
        winning_option_id: &str,
        creator_fee_fraction: f64,
    ) -> Result<Market, ResolutionError> {
        self.store.tx(self.config.tx_retry_limit, |ctx| {
            let market: Market = ctx
                .get(market_id)?
                .ok_or_else(|| ResolutionError::market_not_found(market_id))?;
            if market.is_terminal() {
                return Err(ResolutionError::market_already_resolved(market_id));
            }
            if market.status == MarketStatus::Resolving {
                return Err(ResolutionError::conflict(format!(
                    "market {market_id} already has a resolution in flight"
                )));
            }
            if !market.has_option(winning_option_id) {
                return Err(ResolutionError::invalid_winner(format!(
                    "{winning_option_id} is not an option of market {market_id}"
                )));
            }
            if !(0.0..=self.config.max_creator_fee_fraction + f64::EPSILON)
                .contains(&creator_fee_fraction)
            {
                return Err(ResolutionError::invalid_fee_configuration(format!(
                    "creator fee fraction {creator_fee_fraction} exceeds configured max {}",
                    self.config.max_creator_fee_fraction
                )));
            }
            let mut locked = market;
            let expected_version = locked.version;
            locked.status = MarketStatus::Resolving;
            locked.version += 1;
            ctx.put(&locked, Some(expected_version))?;
            Ok(locked)
        })
    }

    /// `deadline` bounds the whole operation (spec §5 "Cancellation &
    /// timeouts"): if it elapses before the apply tx commits, the in-flight
    /// resolution is abandoned and the market reverts to
    /// `pending_resolution`; if it elapses while the apply tx is running,
    /// the tx is aborted with no partial effects.
    pub fn resolve(
        &self,
        market_id: &str,
        winning_option_id: &str,
        evidence: Vec<Evidence>,
        operator_id: &str,
        creator_fee_fraction: f64,
        deadline: Instant,
    ) -> Result<ResolveOutcome, ResolutionError> {
        self.authority.authorize(operator_id)?;
        let warnings = validate_evidence(&evidence)?;
        for warning in &warnings {
            tracing::warn!(market_id, warning, "evidence item below recommended quality");
        }
        Self::check_deadline(deadline, "before resolution started")?;

        // A failure here means the market never left its pre-resolve
        // state — no audit trail, no revert needed (spec §7 "Unauthorized
        // and InvalidInput ... cause no state change").
        let locked_market = self.acquire_resolving_lock(market_id, winning_option_id, creator_fee_fraction)?;
        self.emit_log(
            market_id,
            ResolutionLogEvent::Started,
            "resolution started",
            json!({ "operator_id": operator_id, "winning_option_id": winning_option_id }),
        )?;

        if let Err(e) = Self::check_deadline(deadline, "before loading commitments") {
            return self.fail_in_flight(market_id, "deadline_before_load", e);
        }
        let commitments = match self.store.tx(self.config.tx_retry_limit, |ctx| {
            commitments::list_by_market(ctx, &market_id.to_string(), Some(CommitmentStatus::Active))
        }) {
            Ok(c) => c,
            Err(e) => return self.fail_in_flight(market_id, "load_commitments", e),
        };

        let plan = match calculator::compute_plan(
            &locked_market,
            &commitments,
            winning_option_id,
            creator_fee_fraction,
            self.config.house_fee_fraction,
            self.config.max_creator_fee_fraction,
        ) {
            Ok(p) => p,
            Err(e) => return self.fail_in_flight(market_id, "plan", e),
        };
        self.emit_log(
            market_id,
            ResolutionLogEvent::PlanComputed,
            "payout plan computed",
            json!({ "total_pool": plan.total_pool, "winner_count": plan.winner_count }),
        )?;

        if let Err(e) = Self::check_deadline(deadline, "before the apply transaction") {
            return self.fail_in_flight(market_id, "deadline_before_apply", e);
        }
        let creator_id = locked_market.creator_id.clone();
        let apply_result = self.store.tx(self.config.tx_retry_limit, |ctx| {
            Self::check_deadline(deadline, "during the apply transaction")?;
            let market: Market = ctx
                .get(market_id)?
                .ok_or_else(|| ResolutionError::market_not_found(market_id))?;
            if market.status != MarketStatus::Resolving {
                return Err(ResolutionError::conflict(format!(
                    "market {market_id} left the resolving state unexpectedly"
                )));
            }
            let commitments =
                commitments::list_by_market(ctx, &market_id.to_string(), Some(CommitmentStatus::Active))?;
            distributor::apply(
                ctx,
                market,
                commitments,
                &plan,
                evidence.clone(),
                operator_id.to_string(),
                creator_id.clone(),
                self.config.initial_balance_grant,
            )
        });

        let outcome = match apply_result {
            Ok(o) => o,
            Err(e) => return self.fail_in_flight(market_id, "apply", e),
        };

        self.emit_log(
            market_id,
            ResolutionLogEvent::Applied,
            "distribution applied",
            json!({ "distribution_id": outcome.distribution.id }),
        )?;
        self.emit_log(market_id, ResolutionLogEvent::Completed, "resolution completed", Value::Null)?;
        self.changefeed.publish(ChangeEvent::DistributionApplied {
            market_id: market_id.to_string(),
            distribution_id: outcome.distribution.id.clone(),
        });

        Ok(ResolveOutcome {
            resolution_id: outcome.resolution.id,
            distribution_id: outcome.distribution.id.clone(),
            summary: outcome.distribution,
        })
    }

    /// Shared failure path for anything that goes wrong after the
    /// advisory lock was claimed (spec §4.5 "Failure handling"): revert
    /// the market to `pending_resolution`, record `failed`, and surface
    /// the original error.
    fn fail_in_flight<T>(
        &self,
        market_id: &str,
        stage: &'static str,
        err: ResolutionError,
    ) -> Result<T, ResolutionError> {
        self.revert_to_pending(market_id)?;
        self.emit_log(
            market_id,
            ResolutionLogEvent::Failed,
            err.message.clone(),
            json!({ "stage": stage }),
        )?;
        Err(err)
    }

    /// `deadline` bounds the whole rollback (spec §5 "Cancellation &
    /// timeouts"). Rollback is itself deadline-scoped: if `deadline`
    /// elapses before its tx commits, the distribution is left exactly as
    /// it was (`completed`, not `rolled_back`) and the caller must retry.
    pub fn rollback(
        &self,
        distribution_id: &str,
        reason: &str,
        operator_id: &str,
        deadline: Instant,
    ) -> Result<RollbackResult, ResolutionError> {
        self.authority.authorize(operator_id)?;
        Self::check_deadline(deadline, "before rollback started")?;

        let outcome = self.store.tx(self.config.tx_retry_limit, |ctx| {
            Self::check_deadline(deadline, "during the rollback transaction")?;
            let distribution: PayoutDistribution = ctx
                .get(distribution_id)?
                .ok_or_else(|| ResolutionError::distribution_not_found(distribution_id))?;
            if distribution.status != DistributionStatus::Completed {
                return Err(ResolutionError::new(
                    ErrorKind::ConflictState,
                    ErrorCode::AlreadyRolledBack,
                    format!("distribution {distribution_id} is not in completed state"),
                ));
            }
            let market: Market = ctx
                .get(&distribution.market_id)?
                .ok_or_else(|| ResolutionError::market_not_found(&distribution.market_id))?;

            let mut commitment_ids = Vec::new();
            for breakdown in &distribution.user_breakdown {
                commitment_ids.extend(breakdown.winning_commitments.iter().cloned());
                commitment_ids.extend(breakdown.losing_commitments.iter().cloned());
            }
            let mut loaded = Vec::with_capacity(commitment_ids.len());
            for id in &commitment_ids {
                if let Some(commitment) = ctx.get::<Commitment>(id)? {
                    loaded.push(commitment);
                }
            }

            distributor::rollback(ctx, distribution, market, loaded, self.config.initial_balance_grant)
        })?;

        self.emit_log(
            &outcome.market.id,
            ResolutionLogEvent::RollbackInitiated,
            format!("rollback requested: {reason}"),
            json!({ "operator_id": operator_id, "distribution_id": outcome.distribution.id }),
        )?;
        self.emit_log(
            &outcome.market.id,
            ResolutionLogEvent::RollbackCompleted,
            "rollback completed",
            Value::Null,
        )?;
        self.changefeed.publish(ChangeEvent::DistributionRolledBack {
            market_id: outcome.market.id.clone(),
            distribution_id: outcome.distribution.id.clone(),
        });

        Ok(RollbackResult {
            distribution_id: outcome.distribution.id,
            affected_users: outcome.affected_users,
        })
    }

    /// `deadline` bounds the whole cancellation (spec §5 "Cancellation &
    /// timeouts"). Cancel is itself deadline-scoped the same way rollback
    /// is: exceeding it before the tx commits leaves the market
    /// untouched and the caller must retry.
    pub fn cancel(
        &self,
        market_id: &str,
        reason: &str,
        operator_id: &str,
        refund_tokens: bool,
        deadline: Instant,
    ) -> Result<CancelOutcome, ResolutionError> {
        self.authority.authorize(operator_id)?;
        Self::check_deadline(deadline, "before cancellation started")?;

        let result = self.store.tx(self.config.tx_retry_limit, |ctx| {
            Self::check_deadline(deadline, "during the cancellation transaction")?;
            let mut market: Market = ctx
                .get(market_id)?
                .ok_or_else(|| ResolutionError::market_not_found(market_id))?;
            if market.is_terminal() {
                return Err(ResolutionError::market_already_resolved(market_id));
            }

            let active = commitments::list_by_market(ctx, &market_id.to_string(), Some(CommitmentStatus::Active))?;
            let mut refunds_processed = 0u64;
            for commitment in active {
                let amount = commitment.tokens_committed;
                if refund_tokens {
                    let canonical_user_id = resolve_user_id(ctx, &commitment.user_id)?;
                    ledger::apply(
                        ctx,
                        LedgerOp::refund(canonical_user_id, amount, Some(commitment.id.clone())),
                        self.config.initial_balance_grant,
                    )?;
                    refunds_processed += 1;
                }
                commitments::put_terminal(ctx, commitment, CommitmentStatus::Refunded, Some(amount), Some(0), None)?;
            }

            let expected_version = market.version;
            market.status = MarketStatus::Cancelled;
            market.cancellation_reason = Some(reason.to_string());
            market.version += 1;
            ctx.put(&market, Some(expected_version))?;
            Ok(refunds_processed)
        });

        match result {
            Ok(refunds_processed) => {
                self.emit_log(
                    market_id,
                    ResolutionLogEvent::Completed,
                    format!("market cancelled: {reason}"),
                    json!({ "operator_id": operator_id }),
                )?;
                self.changefeed.publish(ChangeEvent::MarketCancelled {
                    market_id: market_id.to_string(),
                });
                Ok(CancelOutcome { refunds_processed })
            }
            Err(e) => {
                self.emit_log(
                    market_id,
                    ResolutionLogEvent::Failed,
                    e.message.clone(),
                    json!({ "stage": "cancel" }),
                )?;
                Err(e)
            }
        }
    }

    /// Promotes every `open` market whose `ends_at` has passed to
    /// `pending_resolution`, returning the promoted set. Idempotent: a
    /// second call finds nothing left to promote (spec §4.5
    /// "getPendingResolution").
    pub fn get_pending_resolution(&self) -> Result<Vec<Market>, ResolutionError> {
        self.store.tx(self.config.tx_retry_limit, |ctx| {
            let candidates: Vec<Market> =
                ctx.query(&[EqFilter::new("status", serde_json::to_value(MarketStatus::Open)?)], None, None)?;
            let mut promoted = Vec::new();
            for mut market in candidates {
                if market.ends_at <= ctx.now {
                    let expected_version = market.version;
                    market.status = MarketStatus::PendingResolution;
                    market.version += 1;
                    ctx.put(&market, Some(expected_version))?;
                    promoted.push(market);
                }
            }
            Ok(promoted)
        })
    }

    /// Computes a plan without writing anything (spec §4.5
    /// "payoutPreview"). Deterministic for a fixed store state.
    pub fn payout_preview(
        &self,
        market_id: &str,
        winning_option_id: &str,
        creator_fee_fraction: f64,
    ) -> Result<PayoutPlan, ResolutionError> {
        self.store.tx(1, |ctx| {
            let market: Market = ctx
                .get(market_id)?
                .ok_or_else(|| ResolutionError::market_not_found(market_id))?;
            let commitments =
                commitments::list_by_market(ctx, &market_id.to_string(), Some(CommitmentStatus::Active))?;
            calculator::compute_plan(
                &market,
                &commitments,
                winning_option_id,
                creator_fee_fraction,
                self.config.house_fee_fraction,
                self.config.max_creator_fee_fraction,
            )
        })
    }

    pub fn get_status(&self, market_id: &MarketId) -> Result<MarketStatusSummary, ResolutionError> {
        let market: Market = self
            .store
            .get(market_id)?
            .ok_or_else(|| ResolutionError::market_not_found(market_id))?;
        let logs: Vec<ResolutionLogEntry> = self.store.query(
            &[EqFilter::new("market_id", market_id.clone())],
            Some(OrderBy::asc("at")),
            None,
        )?;
        let last_event = logs.last().map(|entry| entry.event);
        Ok(MarketStatusSummary {
            status: market.status,
            last_event,
            logs,
        })
    }
}

/// Evidence validation (spec §4.5 step 2): at least one item, every URL
/// item must parse, and at least one item must be a URL or a description
/// of `MIN_EVIDENCE_DESCRIPTION_LEN` characters or more. Short items
/// produce warnings, never errors.
fn validate_evidence(evidence: &[Evidence]) -> Result<Vec<String>, ResolutionError> {
    if evidence.is_empty() {
        return Err(ResolutionError::insufficient_evidence(
            "at least one evidence item is required",
        ));
    }

    let mut warnings = Vec::new();
    let mut has_qualifying = false;
    for item in evidence {
        match item.evidence_type {
            EvidenceType::Url => {
                if url::Url::parse(&item.content).is_err() {
                    return Err(ResolutionError::insufficient_evidence(format!(
                        "evidence {} has an unparseable URL",
                        item.id
                    )));
                }
                has_qualifying = true;
            }
            EvidenceType::Description => {
                if item.content.len() >= MIN_EVIDENCE_DESCRIPTION_LEN {
                    has_qualifying = true;
                } else {
                    warnings.push(format!(
                        "evidence {} description shorter than {MIN_EVIDENCE_DESCRIPTION_LEN} chars",
                        item.id
                    ));
                }
            }
            EvidenceType::ScreenshotRef => {
                // A screenshot reference alone never satisfies the
                // "URL or description" requirement but is not an error.
                warnings.push(format!("evidence {} is a screenshot reference only", item.id));
            }
        }
    }

    if !has_qualifying {
        return Err(ResolutionError::insufficient_evidence(
            "at least one URL or a description of 10+ characters is required",
        ));
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketOption, Timestamp, NO, YES};

    fn config() -> Config {
        Config {
            database_path: ":memory:".into(),
            port: 0,
            house_fee_fraction: 0.05,
            max_creator_fee_fraction: 0.05,
            initial_balance_grant: 0,
            tx_retry_limit: 5,
            operation_deadline_ms: 30_000,
            changefeed_buffer: 16,
        }
    }

    fn engine() -> (ResolutionEngine, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let feed = Arc::new(ChangeFeed::new(16));
        (ResolutionEngine::new(store.clone(), feed, config()), store)
    }

    fn seed_market(store: &SqliteStore) {
        let market = Market {
            id: "m1".into(),
            title: "Will it happen".into(),
            creator_id: "creator".into(),
            status: MarketStatus::Open,
            ends_at: Timestamp::from_secs(0),
            options: vec![
                MarketOption { id: YES.into(), text: "yes".into(), total_tokens: 0, participant_count: 0 },
                MarketOption { id: NO.into(), text: "no".into(), total_tokens: 0, participant_count: 0 },
            ],
            resolution_id: None,
            cancellation_reason: None,
            version: 0,
        };
        store.put(&market, None).unwrap();
    }

    fn seed_commitment(store: &SqliteStore, id: &str, user: &str, option_id: &str, tokens: u64) {
        let commitment = Commitment {
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
        };
        store.put(&commitment, None).unwrap();
    }

    fn url_evidence() -> Vec<Evidence> {
        vec![Evidence {
            id: "e1".into(),
            evidence_type: EvidenceType::Url,
            content: "https://example.com/result".into(),
            description: None,
            uploaded_at: Timestamp::from_secs(0),
        }]
    }

    #[test]
    fn resolve_rejects_unauthorized_operator_with_no_state_change() {
        let (engine, store) = engine();
        seed_market(&store);
        let err = engine.resolve("m1", YES, url_evidence(), "", 0.02, engine.default_deadline()).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        let market: Market = store.get("m1").unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::Open);
    }

    #[test]
    fn resolve_happy_path_settles_commitments_and_balances() {
        let (engine, store) = engine();
        seed_market(&store);
        seed_commitment(&store, "c1", "U1", YES, 200);
        seed_commitment(&store, "c2", "U2", NO, 300);
        seed_commitment(&store, "c3", "U3", NO, 500);
        for (user, tokens) in [("U1", 200u64), ("U2", 300), ("U3", 500)] {
            store
                .tx(1, |ctx| {
                    ledger::apply(ctx, LedgerOp::purchase(user, tokens, None), 0)?;
                    ledger::apply(ctx, LedgerOp::commit(user, tokens, None), 0)
                })
                .unwrap();
        }

        let outcome = engine.resolve("m1", YES, url_evidence(), "op1", 0.02, engine.default_deadline()).unwrap();
        assert_eq!(outcome.summary.winner_pool, 930);

        let market: Market = store.get("m1").unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::Resolved);

        let c1: Commitment = store.get("c1").unwrap().unwrap();
        assert_eq!(c1.status, CommitmentStatus::Won);
        assert_eq!(c1.payout, Some(930));

        let u1: crate::domain::UserBalance = store.get("U1").unwrap().unwrap();
        assert_eq!(u1.available_tokens, 930);

        let status = engine.get_status(&"m1".to_string()).unwrap();
        assert_eq!(status.status, MarketStatus::Resolved);
        assert_eq!(status.last_event, Some(ResolutionLogEvent::Completed));
    }

    #[test]
    fn resolve_with_unknown_option_reverts_nothing_since_lock_never_committed() {
        let (engine, store) = engine();
        seed_market(&store);
        let err = engine.resolve("m1", "not-an-option", url_evidence(), "op1", 0.02, engine.default_deadline()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidWinner);
        let market: Market = store.get("m1").unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::Open);
    }

    #[test]
    fn cancel_refunds_every_active_commitment() {
        let (engine, store) = engine();
        seed_market(&store);
        seed_commitment(&store, "c1", "U1", YES, 200);
        store
            .tx(1, |ctx| {
                ledger::apply(ctx, LedgerOp::purchase("U1", 200, None), 0)?;
                ledger::apply(ctx, LedgerOp::commit("U1", 200, None), 0)
            })
            .unwrap();

        let outcome = engine.cancel("m1", "operator decision", "op1", true, engine.default_deadline()).unwrap();
        assert_eq!(outcome.refunds_processed, 1);

        let u1: crate::domain::UserBalance = store.get("U1").unwrap().unwrap();
        assert_eq!(u1.available_tokens, 200);
        assert_eq!(u1.committed_tokens, 0);

        let market: Market = store.get("m1").unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::Cancelled);
    }

    #[test]
    fn evidence_requires_at_least_one_qualifying_item() {
        let description_only = vec![Evidence {
            id: "e1".into(),
            evidence_type: EvidenceType::Description,
            content: "too short".into(),
            description: None,
            uploaded_at: Timestamp::from_secs(0),
        }];
        let err = validate_evidence(&description_only).unwrap_err();
        assert_eq!(err.code, ErrorCode::InsufficientEvidence);
    }
}
