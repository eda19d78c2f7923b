use crate::data_structures::NewInfo;
use crate::stock::StockClientConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// Trading session of the quoted market
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketSession {
    pub open_hour: u32,      // e.g., 9 for 9am
    pub close_hour: u32,     // e.g., 15 for 3pm
    pub timezone: String,    // e.g., "Asia/Shanghai"
    pub weekdays_only: bool, // true for Monday-Friday only
}

impl Default for MarketSession {
    fn default() -> Self {
        Self {
            open_hour: 9,
            close_hour: 15,
            timezone: "Asia/Shanghai".to_string(),
            weekdays_only: true,
        }
    }
}

// YAML-serializable configuration structure
#[derive(Serialize, Deserialize, Debug)]
pub struct ConfigYaml {
    pub node_name: String,
    pub environment: String,
    pub port: u16,
    pub stock_service_url: Option<String>,
    pub stock_code_prefix: Option<String>,
    pub stock_rate_limit: Option<u32>,
    pub stock_timeout_secs: Option<u64>,
    pub window_days: Option<i64>,
    pub parse_interval_secs: Option<u64>,
    pub skip_market_session: Option<bool>,
    pub market_session: Option<MarketSession>,
    pub data_file: Option<PathBuf>,
    pub seed_file: Option<PathBuf>,
    pub api_rate_per_second: Option<u64>,
    pub api_rate_burst: Option<u32>,
}

// Holds application-wide settings
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub node_name: String,
    pub environment: String,
    pub port: u16,
    pub stock: StockClientConfig,
    pub window_days: i64,
    pub parse_interval: Option<Duration>,
    pub skip_market_session: bool,
    pub market_session: MarketSession,
    pub data_file: Option<PathBuf>,
    pub seed_file: Option<PathBuf>,
    pub api_rate_per_second: u64,
    pub api_rate_burst: u32,
}

const DEFAULT_WINDOW_DAYS: i64 = 31;

impl AppConfig {
    // Load configuration from YAML file or environment variables
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            Self::from_yaml(&config_file)
        } else {
            Ok(Self::from_env())
        }
    }

    pub fn from_yaml(file_path: &str) -> anyhow::Result<Self> {
        let yaml_content = fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read config file {}", file_path))?;
        let yaml_config: ConfigYaml =
            serde_yaml::from_str(&yaml_content).context("Failed to parse YAML config")?;
        Ok(Self::from(yaml_config))
    }

    // Load all configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok(); // Load .env file if present

        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            env::var(key).ok().and_then(|s| s.parse().ok())
        }

        let defaults = StockClientConfig::default();
        let stock = StockClientConfig {
            base_url: env::var("STOCK_SERVICE_URL").unwrap_or(defaults.base_url),
            code_prefix: env::var("STOCK_CODE_PREFIX").unwrap_or(defaults.code_prefix),
            rate_limit_per_minute: parsed("STOCK_RATE_LIMIT").unwrap_or(defaults.rate_limit_per_minute),
            timeout: parsed("STOCK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            random_agent: defaults.random_agent,
        };

        Self {
            node_name: env::var("NODE_NAME").unwrap_or_else(|_| "stockjudge".to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            port: parsed("PORT").unwrap_or(8080),
            stock,
            window_days: parsed("WINDOW_DAYS").unwrap_or(DEFAULT_WINDOW_DAYS),
            parse_interval: parsed("PARSE_INTERVAL").map(Duration::from_secs),
            skip_market_session: parsed("SKIP_MARKET_SESSION").unwrap_or(true),
            market_session: MarketSession::default(),
            data_file: env::var("DATA_FILE").ok().map(PathBuf::from),
            seed_file: env::var("SEED_FILE").ok().map(PathBuf::from),
            api_rate_per_second: parsed("API_RATE_PER_SECOND").unwrap_or(10),
            api_rate_burst: parsed("API_RATE_BURST").unwrap_or(20),
        }
    }
}

impl From<ConfigYaml> for AppConfig {
    fn from(yaml: ConfigYaml) -> Self {
        let defaults = StockClientConfig::default();
        Self {
            node_name: yaml.node_name,
            environment: yaml.environment,
            port: yaml.port,
            stock: StockClientConfig {
                base_url: yaml.stock_service_url.unwrap_or(defaults.base_url),
                code_prefix: yaml.stock_code_prefix.unwrap_or(defaults.code_prefix),
                rate_limit_per_minute: yaml.stock_rate_limit.unwrap_or(defaults.rate_limit_per_minute),
                timeout: yaml
                    .stock_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeout),
                random_agent: defaults.random_agent,
            },
            window_days: yaml.window_days.unwrap_or(DEFAULT_WINDOW_DAYS),
            parse_interval: yaml.parse_interval_secs.map(Duration::from_secs),
            skip_market_session: yaml.skip_market_session.unwrap_or(true),
            market_session: yaml.market_session.unwrap_or_default(),
            data_file: yaml.data_file,
            seed_file: yaml.seed_file,
            api_rate_per_second: yaml.api_rate_per_second.unwrap_or(10),
            api_rate_burst: yaml.api_rate_burst.unwrap_or(20),
        }
    }
}

/// Load infos to register at startup from a JSON array of `{title, url?, date?}`.
pub fn load_seed_infos(path: &Path) -> anyhow::Result<Vec<NewInfo>> {
    tracing::info!("Loading seed infos from: {}", path.display());

    let json_content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let infos: Vec<NewInfo> = serde_json::from_str(&json_content)
        .with_context(|| format!("Failed to parse seed file {}", path.display()))?;

    tracing::info!("Successfully loaded {} seed infos", infos.len());
    Ok(infos)
}
