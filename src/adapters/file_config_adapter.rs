//! INI file configuration adapter.

use std::path::Path;
use std::str::FromStr;

use configparser::ini::Ini;

use crate::domain::error::FactorError;
use crate::ports::config_port::ConfigPort;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, FactorError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config.load(path).map_err(|reason| FactorError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, FactorError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| FactorError::ConfigParse {
                file: "<string>".to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    fn parsed<T: FromStr>(&self, section: &str, key: &str) -> Option<T> {
        let raw = self.get_string(section, key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(section, key, value = %raw, "unparsable config value, using default");
                None
            }
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config
            .get(section, key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.parsed(section, key).unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.parsed(section, key).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[data]
source = sqlite
csv_dir =

[sqlite]
path = /var/lib/factorbt/prices.db
pool_size = 4

[backtest]
start_date = 2022-01-03
end_date = 2023-12-29
starting_cash = 25000.5
num_tickers = 5
rebalance_interval_days = not_a_number

[strategy]
expression = pricePercentChange(nDaysAgo(90), currentDate)
universe = AAPL, MSFT, GOOG
weighting = zscore
"#;

    fn sample() -> FileConfigAdapter {
        FileConfigAdapter::from_string(SAMPLE).unwrap()
    }

    #[test]
    fn from_string_parses_sections() {
        let adapter = sample();
        assert_eq!(adapter.get_string("data", "source"), Some("sqlite".to_string()));
        assert_eq!(
            adapter.get_string("strategy", "expression"),
            Some("pricePercentChange(nDaysAgo(90), currentDate)".to_string())
        );
        assert_eq!(
            adapter.get_string("strategy", "universe"),
            Some("AAPL, MSFT, GOOG".to_string())
        );
    }

    #[test]
    fn blank_and_missing_values_are_none() {
        let adapter = sample();
        assert_eq!(adapter.get_string("data", "csv_dir"), None);
        assert_eq!(adapter.get_string("backtest", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_int_reads_or_defaults() {
        let adapter = sample();
        assert_eq!(adapter.get_int("backtest", "num_tickers", 3), 5);
        assert_eq!(adapter.get_int("sqlite", "pool_size", 1), 4);
        assert_eq!(adapter.get_int("backtest", "workers", 10), 10);
        assert_eq!(adapter.get_int("backtest", "rebalance_interval_days", 7), 7);
    }

    #[test]
    fn get_double_reads_or_defaults() {
        let adapter = sample();
        assert_eq!(adapter.get_double("backtest", "starting_cash", 0.0), 25000.5);
        assert_eq!(adapter.get_double("backtest", "num_tickers", 0.0), 5.0);
        assert_eq!(adapter.get_double("backtest", "min_trade_quantity", 0.0001), 0.0001);
        assert_eq!(adapter.get_double("strategy", "weighting", 0.5), 0.5);
    }

    #[test]
    fn from_file_reads_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[data]\nsource = csv\ncsv_dir = /srv/prices\n").unwrap();
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(adapter.get_string("data", "csv_dir"), Some("/srv/prices".to_string()));
    }

    #[test]
    fn from_file_missing_is_config_parse_error() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        assert!(matches!(
            result,
            Err(FactorError::ConfigParse { file, .. }) if file == "/nonexistent/path/config.ini"
        ));
    }
}
