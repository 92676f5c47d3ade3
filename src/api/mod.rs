//! Inbound API (spec §6 "Inbound API"): one axum handler per transport-
//! agnostic operation, plus a WebSocket endpoint that exposes the
//! ChangeFeed for one market, mirroring the teacher's `websocket_handler`
//! / `handle_socket` shape.

use crate::changefeed::ChangeFeed;
use crate::domain::{Evidence, Market, MarketId, MarketStatus, ResolutionLogEntry, ResolutionLogEvent};
use crate::engine::ResolutionEngine;
use crate::error::ResolutionError;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// `deadline_ms` is optional on every mutating request (spec §5
/// "Cancellation & timeouts"); a caller that doesn't set one gets the
/// engine's configured `OPERATION_DEADLINE_MS` default.
fn deadline_from(engine: &ResolutionEngine, deadline_ms: Option<u64>) -> Instant {
    match deadline_ms {
        Some(ms) => Instant::now() + Duration::from_millis(ms),
        None => engine.default_deadline(),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ResolutionEngine>,
    pub changefeed: Arc<ChangeFeed>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/markets/:market_id/resolve", post(resolve))
        .route("/api/distributions/:distribution_id/rollback", post(rollback))
        .route("/api/markets/:market_id/cancel", post(cancel))
        .route("/api/markets/:market_id/preview", get(preview))
        .route("/api/resolution/pending", get(pending))
        .route("/api/markets/:market_id/status", get(status))
        .route("/ws/market/:market_id", get(ws_market))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub winning_option_id: String,
    pub evidence: Vec<Evidence>,
    pub operator_id: String,
    pub creator_fee_fraction: f64,
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub resolution_id: String,
    pub distribution_id: String,
}

async fn resolve(
    State(state): State<AppState>,
    Path(market_id): Path<MarketId>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, ResolutionError> {
    let deadline = deadline_from(&state.engine, body.deadline_ms);
    let outcome = state.engine.resolve(
        &market_id,
        &body.winning_option_id,
        body.evidence,
        &body.operator_id,
        body.creator_fee_fraction,
        deadline,
    )?;
    Ok(Json(ResolveResponse {
        resolution_id: outcome.resolution_id,
        distribution_id: outcome.distribution_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub reason: String,
    pub operator_id: String,
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RollbackResponse {
    pub distribution_id: String,
    pub affected_users: Vec<String>,
}

async fn rollback(
    State(state): State<AppState>,
    Path(distribution_id): Path<String>,
    Json(body): Json<RollbackRequest>,
) -> Result<Json<RollbackResponse>, ResolutionError> {
    let deadline = deadline_from(&state.engine, body.deadline_ms);
    let outcome = state
        .engine
        .rollback(&distribution_id, &body.reason, &body.operator_id, deadline)?;
    Ok(Json(RollbackResponse {
        distribution_id: outcome.distribution_id,
        affected_users: outcome.affected_users,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
    pub operator_id: String,
    #[serde(default = "default_true")]
    pub refund_tokens: bool,
    pub deadline_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub refunds_processed: u64,
}

async fn cancel(
    State(state): State<AppState>,
    Path(market_id): Path<MarketId>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, ResolutionError> {
    let deadline = deadline_from(&state.engine, body.deadline_ms);
    let outcome = state
        .engine
        .cancel(&market_id, &body.reason, &body.operator_id, body.refund_tokens, deadline)?;
    Ok(Json(CancelResponse {
        refunds_processed: outcome.refunds_processed,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub winning_option_id: String,
    pub creator_fee_fraction: f64,
}

/// `PayoutPlan`/`PayoutCalculationRecord` are internal domain types, not
/// wire types — this is the one place that projects one to JSON.
#[derive(Debug, Serialize)]
struct PayoutPlanWire {
    market_id: MarketId,
    winning_option_id: String,
    total_pool: u64,
    house_fee: u64,
    creator_fee: u64,
    winner_pool: u64,
    winner_count: u64,
    records: Vec<PayoutRecordWire>,
}

#[derive(Debug, Serialize)]
struct PayoutRecordWire {
    commitment_id: String,
    user_id: String,
    tokens_committed: u64,
    effective_option_id: Option<String>,
    is_winner: bool,
    ill_formed: bool,
    payout: u64,
    profit: i64,
}

impl From<crate::calculator::PayoutPlan> for PayoutPlanWire {
    fn from(plan: crate::calculator::PayoutPlan) -> Self {
        Self {
            market_id: plan.market_id,
            winning_option_id: plan.winning_option_id,
            total_pool: plan.total_pool,
            house_fee: plan.house_fee,
            creator_fee: plan.creator_fee,
            winner_pool: plan.winner_pool,
            winner_count: plan.winner_count,
            records: plan
                .records
                .into_iter()
                .map(|r| PayoutRecordWire {
                    commitment_id: r.commitment_id,
                    user_id: r.user_id,
                    tokens_committed: r.tokens_committed,
                    effective_option_id: r.effective_option_id,
                    is_winner: r.is_winner,
                    ill_formed: r.ill_formed,
                    payout: r.payout,
                    profit: r.profit,
                })
                .collect(),
        }
    }
}

async fn preview(
    State(state): State<AppState>,
    Path(market_id): Path<MarketId>,
    Query(params): Query<PreviewQuery>,
) -> Result<Json<PayoutPlanWire>, ResolutionError> {
    let plan = state
        .engine
        .payout_preview(&market_id, &params.winning_option_id, params.creator_fee_fraction)?;
    Ok(Json(PayoutPlanWire::from(plan)))
}

async fn pending(State(state): State<AppState>) -> Result<Json<Vec<Market>>, ResolutionError> {
    Ok(Json(state.engine.get_pending_resolution()?))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: MarketStatus,
    pub last_event: Option<ResolutionLogEvent>,
    pub logs: Vec<ResolutionLogEntry>,
}

async fn status(
    State(state): State<AppState>,
    Path(market_id): Path<MarketId>,
) -> Result<Json<StatusResponse>, ResolutionError> {
    let summary = state.engine.get_status(&market_id)?;
    Ok(Json(StatusResponse {
        status: summary.status,
        last_event: summary.last_event,
        logs: summary.logs,
    }))
}

async fn ws_market(
    State(state): State<AppState>,
    Path(market_id): Path<MarketId>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_market_socket(socket, state, market_id))
}

async fn handle_market_socket(mut socket: WebSocket, state: AppState, market_id: MarketId) {
    let mut subscription = state.changefeed.subscribe(market_id);
    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let msg = serde_json::to_string(&event).unwrap_or_else(|e| {
                    warn!("failed to serialize change event: {e}");
                    "{}".to_string()
                });
                if socket.send(Message::Text(msg)).await.is_err() {
                    break;
                }
            }
            Some(Ok(msg)) = socket.recv() => {
                if matches!(msg, Message::Close(_)) {
                    break;
                }
            }
        }
    }
}
