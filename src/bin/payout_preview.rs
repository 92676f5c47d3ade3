//! Operator CLI for previewing a payout plan without writing anything.
//!
//! Usage:
//!   cargo run --release --bin payout-preview -- --market-id m1 --winning-option-id opt-yes
//!   cargo run --release --bin payout-preview -- --market-id m1 --winning-option-id opt-yes --creator-fee-fraction 0.02

use anyhow::{Context, Result};
use clap::Parser;
use resolution_engine::calculator;
use resolution_engine::commitments;
use resolution_engine::config::Config;
use resolution_engine::domain::{CommitmentStatus, Market};
use resolution_engine::error::ResolutionError;
use resolution_engine::store::SqliteStore;

/// Previews a resolution's payout plan against the current store state.
#[derive(Parser, Debug)]
#[command(name = "payout-preview")]
#[command(about = "Preview a market's payout plan without settling anything")]
struct Cli {
    /// Path to the SQLite store (defaults to DATABASE_PATH / config default)
    #[arg(long, env = "DATABASE_PATH")]
    db_path: Option<String>,

    /// Market to preview
    #[arg(long)]
    market_id: String,

    /// Candidate winning option
    #[arg(long)]
    winning_option_id: String,

    /// Creator fee fraction to apply for this preview
    #[arg(long, default_value_t = 0.0)]
    creator_fee_fraction: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    let db_path = cli.db_path.unwrap_or(config.database_path.clone());

    let store = SqliteStore::open(&db_path).context("failed to open store")?;

    let plan = store
        .tx(1, |ctx| {
            let market: Market = ctx
                .get(&cli.market_id)?
                .ok_or_else(|| ResolutionError::market_not_found(&cli.market_id))?;
            let active = commitments::list_by_market(ctx, &cli.market_id, Some(CommitmentStatus::Active))?;
            calculator::compute_plan(
                &market,
                &active,
                &cli.winning_option_id,
                cli.creator_fee_fraction,
                config.house_fee_fraction,
                config.max_creator_fee_fraction,
            )
        })
        .context("failed to compute payout plan")?;

    println!("{}", serde_json::to_string_pretty(&PreviewOutput::from(plan))?);
    Ok(())
}

#[derive(serde::Serialize)]
struct PreviewOutput {
    market_id: String,
    winning_option_id: String,
    total_pool: u64,
    house_fee: u64,
    creator_fee: u64,
    winner_pool: u64,
    winner_count: u64,
}

impl From<calculator::PayoutPlan> for PreviewOutput {
    fn from(plan: calculator::PayoutPlan) -> Self {
        Self {
            market_id: plan.market_id,
            winning_option_id: plan.winning_option_id,
            total_pool: plan.total_pool,
            house_fee: plan.house_fee,
            creator_fee: plan.creator_fee,
            winner_pool: plan.winner_pool,
            winner_count: plan.winner_count,
        }
    }
}
