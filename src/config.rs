//! Environment-provided configuration (spec §6 "Configuration").

/// Hard-coded policy constant (spec §6): at least one URL-type evidence
/// item, or a description of at least this many bytes.
pub const MIN_EVIDENCE_DESCRIPTION_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub house_fee_fraction: f64,
    pub max_creator_fee_fraction: f64,
    pub initial_balance_grant: u64,
    pub tx_retry_limit: u32,
    pub operation_deadline_ms: u64,
    pub changefeed_buffer: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./resolution_engine.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let house_fee_fraction = std::env::var("HOUSE_FEE_FRACTION")
            .unwrap_or_else(|_| "0.05".to_string())
            .parse()
            .unwrap_or(0.05);

        let max_creator_fee_fraction = std::env::var("MAX_CREATOR_FEE_FRACTION")
            .unwrap_or_else(|_| "0.05".to_string())
            .parse()
            .unwrap_or(0.05);

        let initial_balance_grant = std::env::var("INITIAL_BALANCE_GRANT")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);

        let tx_retry_limit = std::env::var("TX_RETRY_LIMIT")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        let operation_deadline_ms = std::env::var("OPERATION_DEADLINE_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .unwrap_or(30_000);

        let changefeed_buffer = std::env::var("CHANGEFEED_BUFFER")
            .unwrap_or_else(|_| "1024".to_string())
            .parse()
            .unwrap_or(1024);

        Ok(Self {
            database_path,
            port,
            house_fee_fraction,
            max_creator_fee_fraction,
            initial_balance_grant,
            tx_retry_limit,
            operation_deadline_ms,
            changefeed_buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_vars_fall_back_to_documented_defaults() {
        for key in [
            "DATABASE_PATH",
            "PORT",
            "HOUSE_FEE_FRACTION",
            "MAX_CREATOR_FEE_FRACTION",
            "INITIAL_BALANCE_GRANT",
            "TX_RETRY_LIMIT",
            "OPERATION_DEADLINE_MS",
            "CHANGEFEED_BUFFER",
        ] {
            std::env::remove_var(key);
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.house_fee_fraction, 0.05);
        assert_eq!(config.max_creator_fee_fraction, 0.05);
        assert_eq!(config.initial_balance_grant, 1000);
        assert_eq!(config.tx_retry_limit, 5);
    }
}
