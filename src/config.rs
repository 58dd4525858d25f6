//! Runtime configuration from environment variables
//!
//! Every section has sensible defaults except the Helius API key. Parsing goes
//! through a lookup function so tests do not have to touch the process
//! environment.

use solana_pubkey::Pubkey;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct HeliusConfig {
    pub api_key: String,
    pub rpc_url: String,
    pub ws_url: String,
    pub api_url: String,
}

impl HeliusConfig {
    pub fn rpc_endpoint(&self) -> String {
        format!("{}?api-key={}", self.rpc_url, self.api_key)
    }

    pub fn ws_endpoint(&self) -> String {
        format!("{}?api-key={}", self.ws_url, self.api_key)
    }
}

/// Websocket feed settings
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// File holding the subscription request sent after every (re)connect
    pub subscribe_path: String,
    pub channel_buffer: usize,
    pub max_in_flight: usize,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub program_id: String,
    pub migration_message: String,
    pub native_mint: String,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub db_path: String,
    pub log_fetch_limit: usize,
    pub log_batch_threshold: usize,
    pub log_wait: Duration,
    pub log_interval: Duration,
    pub log_prune_interval: Duration,
    pub refresh_limit: usize,
    pub refresh_sub_batch: usize,
    pub refresh_stale: Duration,
    pub refresh_interval: Duration,
    pub refresh_max_market_cap: f64,
    /// Zero disables the top-token refresh loop
    pub top_refresh_interval: Duration,
    pub reaper_min_market_cap: f64,
    pub reaper_min_age: Duration,
    pub reaper_interval: Duration,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DexScreenerSettings {
    pub base_url: String,
    pub chain_id: String,
}

#[derive(Debug, Clone)]
pub struct TradingSettings {
    pub jupiter_base_url: String,
    pub slippage_bps: u16,
    pub interval: Duration,
    pub wallet_private_key: Option<String>,
    pub wallet_pubkey: Option<String>,
    pub trades_path: Option<String>,
}

/// Configuration for the whole runtime
#[derive(Debug, Clone)]
pub struct Config {
    pub helius: HeliusConfig,
    pub stream: StreamSettings,
    pub pool: PoolSettings,
    pub engine: EngineSettings,
    pub dexscreener: DexScreenerSettings,
    pub trading: TradingSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let helius = HeliusConfig {
            api_key: vars.required("HELIUS_API_KEY")?,
            rpc_url: vars.string("HELIUS_RPC_URL", "https://mainnet.helius-rpc.com"),
            ws_url: vars.string("HELIUS_WS_URL", "wss://mainnet.helius-rpc.com"),
            api_url: vars.string("HELIUS_API_URL", "https://api.helius.xyz/v0"),
        };

        if !helius.ws_url.starts_with("ws://") && !helius.ws_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "HELIUS_WS_URL must start with ws:// or wss://".to_string(),
            ));
        }

        let stream = StreamSettings {
            subscribe_path: vars.string("LOG_SUBSCRIBE_PATH", "logSubscribe.json"),
            channel_buffer: vars.parse("STREAM_CHANNEL_BUFFER", 1024)?,
            max_in_flight: vars.parse("INGEST_MAX_IN_FLIGHT", 64)?,
            reconnect_initial: Duration::from_millis(vars.parse("RECONNECT_INITIAL_MS", 500)?),
            reconnect_max: Duration::from_millis(vars.parse("RECONNECT_MAX_MS", 30_000)?),
            connect_timeout: Duration::from_secs(vars.parse("CONNECT_TIMEOUT_SECS", 10)?),
        };

        if stream.channel_buffer == 0 || stream.max_in_flight == 0 {
            return Err(ConfigError::InvalidValue(
                "STREAM_CHANNEL_BUFFER and INGEST_MAX_IN_FLIGHT must be positive".to_string(),
            ));
        }

        let pool = PoolSettings {
            program_id: vars.pubkey(
                "RAYDIUM_PROGRAM_ID",
                "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8",
            )?,
            migration_message: vars.string("MIGRATION_MESSAGE", "initialize2"),
            native_mint: vars.pubkey("NATIVE_MINT", "So11111111111111111111111111111111111111112")?,
        };

        let engine = EngineSettings {
            db_path: vars.string("SNIPER_DB_PATH", "sniper.db"),
            log_fetch_limit: vars.parse("LOG_FETCH_LIMIT", 100)?,
            log_batch_threshold: vars.parse("LOG_BATCH_THRESHOLD", 20)?,
            log_wait: Duration::from_secs(vars.parse("LOG_WAIT_SECS", 60)?),
            log_interval: Duration::from_secs(vars.parse("LOG_INTERVAL_SECS", 30)?),
            log_prune_interval: Duration::from_secs(vars.parse("LOG_PRUNE_INTERVAL_SECS", 30)?),
            refresh_limit: vars.parse("REFRESH_LIMIT", 90)?,
            refresh_sub_batch: vars.parse("REFRESH_SUB_BATCH", 30)?,
            refresh_stale: vars.duration("REFRESH_STALE_MINUTES", 5, 60)?,
            refresh_interval: Duration::from_secs(vars.parse("REFRESH_INTERVAL_SECS", 5)?),
            refresh_max_market_cap: vars.parse("REFRESH_MAX_MARKET_CAP", 1_000_000.0)?,
            top_refresh_interval: Duration::from_secs(vars.parse("TOP_REFRESH_INTERVAL_SECS", 60)?),
            reaper_min_market_cap: vars.parse("REAPER_MIN_MARKET_CAP", 10_000.0)?,
            reaper_min_age: vars.duration("REAPER_MIN_AGE_HOURS", 2, 3600)?,
            reaper_interval: Duration::from_secs(vars.parse("REAPER_INTERVAL_SECS", 300)?),
            http_timeout: Duration::from_secs(vars.parse("HTTP_TIMEOUT_SECS", 10)?),
        };

        if engine.log_batch_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "LOG_BATCH_THRESHOLD must be positive".to_string(),
            ));
        }

        if engine.log_batch_threshold > engine.log_fetch_limit {
            return Err(ConfigError::InvalidValue(format!(
                "LOG_BATCH_THRESHOLD ({}) cannot exceed LOG_FETCH_LIMIT ({})",
                engine.log_batch_threshold, engine.log_fetch_limit
            )));
        }

        if engine.refresh_sub_batch == 0 {
            return Err(ConfigError::InvalidValue(
                "REFRESH_SUB_BATCH must be positive".to_string(),
            ));
        }

        let dexscreener = DexScreenerSettings {
            base_url: vars.string("DEXSCREENER_BASE_URL", "https://api.dexscreener.com"),
            chain_id: vars.string("DEXSCREENER_CHAIN_ID", "solana"),
        };

        let wallet_pubkey = match vars.optional("WALLET_PUBKEY") {
            Some(key) => Some(validate_pubkey("WALLET_PUBKEY", &key)?),
            None => None,
        };

        let trading = TradingSettings {
            jupiter_base_url: vars.string("JUPITER_BASE_URL", "https://lite-api.jup.ag"),
            slippage_bps: vars.parse("SLIPPAGE_BPS", 100)?,
            interval: Duration::from_secs(vars.parse("TRADE_INTERVAL_SECS", 60)?),
            wallet_private_key: vars.optional("WALLET_PRIVATE_KEY"),
            wallet_pubkey,
            trades_path: vars.optional("TRADES_PATH"),
        };

        Ok(Self {
            helius,
            stream,
            pool,
            engine,
            dexscreener,
            trading,
        })
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<'a, F: Fn(&str) -> Option<String>> Vars<'a, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("{}={} is not valid", key, raw))),
            None => Ok(default),
        }
    }

    /// A count of `unit_secs`-second units, as a duration
    fn duration(&self, key: &str, default: u64, unit_secs: u64) -> Result<Duration, ConfigError> {
        let count: u64 = self.parse(key, default)?;
        count
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::InvalidValue(format!("{}={} is too large", key, count)))
    }

    fn pubkey(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        validate_pubkey(key, &self.string(key, default))
    }
}

fn validate_pubkey(key: &str, value: &str) -> Result<String, ConfigError> {
    Pubkey::from_str(value)
        .map(|pk| pk.to_string())
        .map_err(|_| ConfigError::InvalidValue(format!("{} must be a base58 public key", key)))
}
