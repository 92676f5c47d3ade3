//! Domain model for the resolution & payout engine (spec §3).
//!
//! Struct shapes follow the teacher's `vault::user_accounts` /
//! `auth::models` conventions: plain `Serialize + Deserialize` structs,
//! string-keyed ids, status enums with `#[serde(rename_all = "snake_case")]`
//! so the wire/storage representation matches the vocabulary the
//! specification uses (`"active"`, `"won"`, ...).

mod timestamp;

pub use timestamp::Timestamp;

use serde::{Deserialize, Serialize};

pub type MarketId = String;
pub type UserId = String;
pub type CommitmentId = String;
pub type OptionId = String;
pub type ResolutionId = String;
pub type DistributionId = String;
pub type TransactionId = String;

/// The two reserved option ids that make a market binary (spec §3, "Market").
pub const YES: &str = "yes";
pub const NO: &str = "no";

/// Marker trait implemented by every record the `Store` persists.
///
/// `collection()` names the Store collection (spec §6), `id()` the
/// document's primary key within it.
pub trait Document: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync + 'static {
    fn collection() -> &'static str;
    fn id(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Open,
    PendingResolution,
    Resolving,
    Resolved,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOption {
    pub id: OptionId,
    pub text: String,
    pub total_tokens: u64,
    pub participant_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub title: String,
    pub creator_id: UserId,
    pub status: MarketStatus,
    pub ends_at: Timestamp,
    pub options: Vec<MarketOption>,
    /// Populated iff `status == Resolved` (spec §3 invariant).
    pub resolution_id: Option<ResolutionId>,
    pub cancellation_reason: Option<String>,
    pub version: u64,
}

impl Market {
    /// A market is binary iff it has exactly two options whose ids are the
    /// reserved symbols `yes` and `no` (spec §3).
    pub fn is_binary(&self) -> bool {
        self.options.len() == 2
            && self.options.iter().any(|o| o.id == YES)
            && self.options.iter().any(|o| o.id == NO)
    }

    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, MarketStatus::Resolved | MarketStatus::Cancelled)
    }
}

impl Document for Market {
    fn collection() -> &'static str {
        "markets"
    }
    fn id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Yes,
    No,
}

impl Position {
    pub fn as_option_id(self) -> &'static str {
        match self {
            Position::Yes => YES,
            Position::No => NO,
        }
    }

    pub fn from_option_id(id: &str) -> Option<Self> {
        match id {
            YES => Some(Position::Yes),
            NO => Some(Position::No),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentStatus {
    Active,
    Won,
    Lost,
    Refunded,
}

/// How a commitment's winning option was identified during normalization
/// (spec §4.4 "Output").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationOrigin {
    OptionIdBased,
    PositionBased,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    pub id: CommitmentId,
    pub user_id: UserId,
    pub market_id: MarketId,
    /// Authoritative winner-identification key on new-schema records.
    pub option_id: Option<OptionId>,
    /// Legacy yes/no position, present on legacy records.
    pub position: Option<Position>,
    pub tokens_committed: u64,
    pub odds_snapshot: f64,
    pub potential_winning: u64,
    pub status: CommitmentStatus,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
    pub payout: Option<u64>,
    pub profit: Option<i64>,
    pub metadata: serde_json::Value,
    /// Weak reference to the most recent distribution that touched this
    /// commitment (spec §9 "Cyclic references").
    pub last_distribution_id: Option<DistributionId>,
    pub version: u64,
}

impl Document for Commitment {
    fn collection() -> &'static str {
        "prediction_commitments"
    }
    fn id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBalance {
    pub user_id: UserId,
    pub available_tokens: u64,
    pub committed_tokens: u64,
    pub total_earned: u64,
    pub total_spent: u64,
    pub version: u64,
    pub last_updated: Timestamp,
}

impl UserBalance {
    pub fn initial(user_id: UserId, starter_grant: u64, now: Timestamp) -> Self {
        Self {
            user_id,
            available_tokens: starter_grant,
            committed_tokens: 0,
            total_earned: 0,
            total_spent: 0,
            version: 0,
            last_updated: now,
        }
    }
}

impl Document for UserBalance {
    fn collection() -> &'static str {
        "user_balances"
    }
    fn id(&self) -> String {
        self.user_id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Commit,
    Win,
    Loss,
    Refund,
    /// Compensating entry written by `PayoutDistributor::rollback` (spec
    /// §4.5 "rollback"). Carries its own explicit deltas in `metadata`
    /// rather than following one of the five forward rules, since it can
    /// reverse any mix of them at once.
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Signed per the fold rule in spec §3 "TokenTransaction".
    pub amount: i64,
    pub balance_before: u64,
    pub balance_after: u64,
    pub related_id: Option<String>,
    pub metadata: serde_json::Value,
    pub timestamp: Timestamp,
    pub status: TransactionStatus,
}

impl Document for TokenTransaction {
    fn collection() -> &'static str {
        "token_transactions"
    }
    fn id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvidenceType {
    Url,
    Description,
    ScreenshotRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    #[serde(rename = "type")]
    pub evidence_type: EvidenceType,
    pub content: String,
    pub description: Option<String>,
    pub uploaded_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketResolution {
    pub id: ResolutionId,
    pub market_id: MarketId,
    pub winning_option_id: OptionId,
    pub resolved_by: UserId,
    pub resolved_at: Timestamp,
    pub evidence: Vec<Evidence>,
    pub total_pool: u64,
    pub house_fee: u64,
    pub creator_fee: u64,
    pub winner_pool: u64,
    pub winner_count: u64,
    pub status: ResolutionStatus,
}

impl Document for MarketResolution {
    fn collection() -> &'static str {
        "market_resolutions"
    }
    fn id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Completed,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPayoutBreakdown {
    pub user_id: UserId,
    pub winning_commitments: Vec<CommitmentId>,
    pub losing_commitments: Vec<CommitmentId>,
    /// Net delta applied to `available_tokens` by this distribution.
    pub net_payout: i64,
    /// Sum of `tokensCommitted` across every commitment of this user's
    /// that this distribution moved out of `committed_tokens`; rollback
    /// restores exactly this much (spec §4.5 "rollback").
    pub committed_restored: u64,
    pub earned_delta: i64,
    pub spent_delta: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VerificationChecks {
    pub all_commitments_processed: bool,
    pub payout_sums_correct: bool,
    pub no_double_payouts: bool,
    pub balance_updates_successful: bool,
    pub transaction_records_created: bool,
}

impl VerificationChecks {
    pub fn all_passed(&self) -> bool {
        self.all_commitments_processed
            && self.payout_sums_correct
            && self.no_double_payouts
            && self.balance_updates_successful
            && self.transaction_records_created
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutDistribution {
    pub id: DistributionId,
    pub market_id: MarketId,
    pub resolution_id: ResolutionId,
    pub total_pool: u64,
    pub house_fee: u64,
    pub creator_fee: u64,
    pub winner_pool: u64,
    pub user_breakdown: Vec<UserPayoutBreakdown>,
    pub processed_at: Timestamp,
    pub status: DistributionStatus,
    pub created_transaction_ids: Vec<TransactionId>,
    pub verification_checks: VerificationChecks,
    pub version: u64,
}

impl Document for PayoutDistribution {
    fn collection() -> &'static str {
        "payout_distributions"
    }
    fn id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionLogEvent {
    Started,
    EvidenceValidated,
    PlanComputed,
    Applied,
    Completed,
    Failed,
    RollbackInitiated,
    RollbackCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionLogEntry {
    pub id: String,
    pub market_id: MarketId,
    pub event: ResolutionLogEvent,
    pub message: String,
    pub at: Timestamp,
    pub metadata: serde_json::Value,
}

impl Document for ResolutionLogEntry {
    fn collection() -> &'static str {
        "resolution_logs"
    }
    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Maps an opaque wallet address onto the canonical user id used by the
/// ledger (spec §9(d)).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletUidMap {
    pub wallet_address: String,
    pub user_id: UserId,
}

impl Document for WalletUidMap {
    fn collection() -> &'static str {
        "wallet_uid_map"
    }
    fn id(&self) -> String {
        self.wallet_address.clone()
    }
}
