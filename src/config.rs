use dotenv::dotenv;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;

const STARTING_BALANCE: &str = "STARTING_BALANCE";
const JOURNAL_DIR: &str = "JOURNAL_DIR";
const JOURNAL_RECORDS_PER_FILE: &str = "JOURNAL_RECORDS_PER_FILE";

/// Engine configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Balance a fresh or reset account starts with.
    pub starting_balance: Decimal,
    /// Directory the trade journal writes into.
    pub journal_dir: String,
    /// Journal records per file before rotation.
    pub journal_records_per_file: usize,
}

impl LedgerConfig {
    pub fn from_env() -> LedgerConfig {
        match Self::try_from_env() {
            Ok(config) => config,
            Err(err) => panic!("{}", err),
        }
    }

    pub fn try_from_env() -> Result<LedgerConfig, String> {
        // Load .env file
        dotenv().ok();

        let defaults = LedgerConfig::default();

        let starting_balance = match env::var(STARTING_BALANCE) {
            Ok(raw) => raw
                .trim()
                .parse::<Decimal>()
                .map_err(|_| format!("failed to parse {}: {}", STARTING_BALANCE, raw))?,
            Err(_) => defaults.starting_balance,
        };

        let journal_dir = env::var(JOURNAL_DIR).unwrap_or(defaults.journal_dir);

        let journal_records_per_file = match env::var(JOURNAL_RECORDS_PER_FILE) {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("failed to parse {}: {}", JOURNAL_RECORDS_PER_FILE, raw))?,
            Err(_) => defaults.journal_records_per_file,
        };

        Ok(LedgerConfig {
            starting_balance,
            journal_dir,
            journal_records_per_file,
        })
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            starting_balance: dec!(100000.00),
            journal_dir: "./journal".to_string(),
            journal_records_per_file: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.starting_balance, dec!(100000.00));
        assert_eq!(config.journal_records_per_file, 10_000);
    }
}
