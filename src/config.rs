//! Configuration: a TOML file for tunables, environment variables for
//! secrets. Missing file fields fall back to the built-in defaults; missing
//! secrets fail the load.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "snipe-bot.toml";

const HELIUS_WS_URL: &str = "wss://mainnet.helius-rpc.com/?api-key=";
const HELIUS_REST_URL: &str = "https://mainnet.helius-rpc.com/?api-key=";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0} is required")]
    MissingEnv(&'static str),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Wallets whose pump.fun buys get copied.
    pub wallets: Vec<String>,
    pub buy_amount_sol: f64,
    pub buy_slippage: f64,
    pub sell_slippage: f64,
    pub max_hold_time: Duration,
    pub koth_poll_interval: Duration,
    pub poller_count: usize,
    pub poll_error_threshold: u32,
    pub max_concurrent_holds: usize,
    pub resolve_max_retries: usize,
    pub resolve_retry_delay: Duration,
    pub standby_cooldown: Duration,
    pub compute_unit_limit: u32,
    pub sms_recipient: String,
    pub coin_api_base: String,
    pub proxy_url: Option<String>,

    pub helius_api_key: String,
    pub wallet_private_key: String,
    pub clicksend_username: String,
    pub clicksend_api_key: String,
}

impl Config {
    /// Reads `.env` (if present), then the TOML file, then validates.
    /// `path` of None means: use the default path when the file exists,
    /// plain defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let file = match path {
            Some(path) => FileSettings::from_path(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    FileSettings::from_path(default)?
                } else {
                    FileSettings::default()
                }
            }
        };

        let secrets = Secrets::from_env()?;
        Self::from_parts(file, secrets)
    }

    pub fn ws_endpoint(&self) -> String {
        format!("{HELIUS_WS_URL}{}", self.helius_api_key)
    }

    pub fn rest_endpoint(&self) -> String {
        format!("{HELIUS_REST_URL}{}", self.helius_api_key)
    }

    fn from_parts(file: FileSettings, secrets: Secrets) -> Result<Self, ConfigError> {
        let config = Self {
            wallets: file.wallets,
            buy_amount_sol: file.buy_amount_sol,
            buy_slippage: file.buy_slippage,
            sell_slippage: file.sell_slippage,
            max_hold_time: Duration::from_secs(file.max_hold_time_secs),
            koth_poll_interval: Duration::from_millis(file.koth_poll_interval_ms),
            poller_count: file.poller_count,
            poll_error_threshold: file.poll_error_threshold,
            max_concurrent_holds: file.max_concurrent_holds,
            resolve_max_retries: file.resolve_max_retries,
            resolve_retry_delay: Duration::from_millis(file.resolve_retry_delay_ms),
            standby_cooldown: Duration::from_secs(file.standby_cooldown_secs),
            compute_unit_limit: file.compute_unit_limit,
            sms_recipient: file.sms_recipient,
            coin_api_base: file.coin_api_base,
            proxy_url: secrets.proxy_override.or(file.proxy_url),
            helius_api_key: secrets.helius_api_key,
            wallet_private_key: secrets.wallet_private_key,
            clicksend_username: secrets.clicksend_username,
            clicksend_api_key: secrets.clicksend_api_key,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.wallets.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one wallet to watch is required".into(),
            ));
        }
        if self.buy_amount_sol <= 0.0 {
            return Err(ConfigError::Invalid("buy_amount_sol must be positive".into()));
        }
        if self.buy_slippage < 0.0 {
            return Err(ConfigError::Invalid("buy_slippage must not be negative".into()));
        }
        if !(0.0..=1.0).contains(&self.sell_slippage) {
            return Err(ConfigError::Invalid(
                "sell_slippage must be between 0 and 1".into(),
            ));
        }
        if self.poller_count == 0 {
            return Err(ConfigError::Invalid("poller_count must be at least 1".into()));
        }
        if self.max_concurrent_holds == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_holds must be at least 1".into(),
            ));
        }
        if self.resolve_max_retries == 0 {
            return Err(ConfigError::Invalid(
                "resolve_max_retries must be at least 1".into(),
            ));
        }
        if self.sms_recipient.trim().is_empty() {
            return Err(ConfigError::Invalid("sms_recipient is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    wallets: Vec<String>,
    buy_amount_sol: f64,
    buy_slippage: f64,
    sell_slippage: f64,
    max_hold_time_secs: u64,
    koth_poll_interval_ms: u64,
    poller_count: usize,
    poll_error_threshold: u32,
    max_concurrent_holds: usize,
    resolve_max_retries: usize,
    resolve_retry_delay_ms: u64,
    standby_cooldown_secs: u64,
    compute_unit_limit: u32,
    sms_recipient: String,
    coin_api_base: String,
    proxy_url: Option<String>,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            wallets: Vec::new(),
            buy_amount_sol: 0.001,
            buy_slippage: 0.5,
            sell_slippage: 0.9,
            max_hold_time_secs: 20,
            koth_poll_interval_ms: 500,
            poller_count: 2,
            poll_error_threshold: 6,
            max_concurrent_holds: 1,
            resolve_max_retries: 3,
            resolve_retry_delay_ms: 500,
            standby_cooldown_secs: 600,
            compute_unit_limit: 100_000,
            sms_recipient: String::new(),
            coin_api_base: "https://frontend-api.pump.fun".to_string(),
            proxy_url: None,
        }
    }
}

impl FileSettings {
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

struct Secrets {
    helius_api_key: String,
    wallet_private_key: String,
    clicksend_username: String,
    clicksend_api_key: String,
    proxy_override: Option<String>,
}

impl Secrets {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            helius_api_key: required_env("HELIUS_API_KEY")?,
            wallet_private_key: required_env("WALLET_PRIVATE_KEY")?,
            clicksend_username: required_env("CLICKSEND_USERNAME")?,
            clicksend_api_key: required_env("CLICKSEND_API_KEY")?,
            proxy_override: env::var("DATA_IMPULSE_PROXY_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        })
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_secrets() -> Secrets {
        Secrets {
            helius_api_key: "helius-key".to_string(),
            wallet_private_key: "wallet-key".to_string(),
            clicksend_username: "user".to_string(),
            clicksend_api_key: "clicksend-key".to_string(),
            proxy_override: None,
        }
    }

    fn minimal_file() -> FileSettings {
        FileSettings {
            wallets: vec!["J4bzyKJKZKKz2HUGFiq3DMRaxEaw6MxKf8rjGTvpkqaU".to_string()],
            sms_recipient: "+10000000000".to_string(),
            ..FileSettings::default()
        }
    }

    #[test]
    fn defaults_match_the_trading_constants() {
        let defaults = FileSettings::default();
        assert_eq!(defaults.buy_amount_sol, 0.001);
        assert_eq!(defaults.buy_slippage, 0.5);
        assert_eq!(defaults.sell_slippage, 0.9);
        assert_eq!(defaults.max_hold_time_secs, 20);
        assert_eq!(defaults.koth_poll_interval_ms, 500);
        assert_eq!(defaults.poller_count, 2);
        assert_eq!(defaults.poll_error_threshold, 6);
        assert_eq!(defaults.max_concurrent_holds, 1);
        assert_eq!(defaults.resolve_max_retries, 3);
        assert_eq!(defaults.resolve_retry_delay_ms, 500);
        assert_eq!(defaults.standby_cooldown_secs, 600);
    }

    #[test]
    fn from_parts_builds_durations_and_endpoints() {
        let config = Config::from_parts(minimal_file(), sample_secrets()).unwrap();
        assert_eq!(config.max_hold_time, Duration::from_secs(20));
        assert_eq!(config.koth_poll_interval, Duration::from_millis(500));
        assert_eq!(config.resolve_retry_delay, Duration::from_millis(500));
        assert_eq!(config.standby_cooldown, Duration::from_secs(600));
        assert_eq!(
            config.ws_endpoint(),
            "wss://mainnet.helius-rpc.com/?api-key=helius-key"
        );
        assert_eq!(
            config.rest_endpoint(),
            "https://mainnet.helius-rpc.com/?api-key=helius-key"
        );
    }

    #[test]
    fn wallets_are_mandatory() {
        let file = FileSettings {
            sms_recipient: "+10000000000".to_string(),
            ..FileSettings::default()
        };
        let err = Config::from_parts(file, sample_secrets()).unwrap_err();
        assert!(err.to_string().contains("wallet"));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let zero_buy = FileSettings {
            buy_amount_sol: 0.0,
            ..minimal_file()
        };
        assert!(Config::from_parts(zero_buy, sample_secrets()).is_err());

        let wild_sell_slippage = FileSettings {
            sell_slippage: 1.5,
            ..minimal_file()
        };
        assert!(Config::from_parts(wild_sell_slippage, sample_secrets()).is_err());

        let no_holds = FileSettings {
            max_concurrent_holds: 0,
            ..minimal_file()
        };
        assert!(Config::from_parts(no_holds, sample_secrets()).is_err());
    }

    #[test]
    fn proxy_env_override_wins_over_file_value() {
        let file = FileSettings {
            proxy_url: Some("http://file-proxy.example:8080".to_string()),
            ..minimal_file()
        };
        let secrets = Secrets {
            proxy_override: Some("http://env-proxy.example:8080".to_string()),
            ..sample_secrets()
        };
        let config = Config::from_parts(file, secrets).unwrap();
        assert_eq!(
            config.proxy_url.as_deref(),
            Some("http://env-proxy.example:8080")
        );
    }

    #[test]
    fn file_settings_parse_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
wallets = ["WalletOne111", "WalletTwo222"]
buy_amount_sol = 0.05
max_hold_time_secs = 30
sms_recipient = "+10000000000"
"#
        )
        .unwrap();

        let settings = FileSettings::from_path(file.path()).unwrap();
        assert_eq!(settings.wallets.len(), 2);
        assert_eq!(settings.buy_amount_sol, 0.05);
        assert_eq!(settings.max_hold_time_secs, 30);
        // untouched fields keep their defaults
        assert_eq!(settings.sell_slippage, 0.9);
        assert_eq!(settings.poller_count, 2);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buy_amout_sol = 0.05").unwrap();
        assert!(matches!(
            FileSettings::from_path(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
