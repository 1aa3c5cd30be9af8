//! Configuration management for the Beacon gateway.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use beacon_core::CacheConfig;
use beacon_delivery::{
    ClientConfig, DispatcherConfig, DownstreamMode, RetryPolicy, SimulatorConfig,
    DEFAULT_DOWNSTREAM_URL,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

/// Environment variables whose names differ from the field they set.
const ENV_RENAMES: [(&str, &str); 3] = [
    ("request_timeout", "request_timeout_seconds"),
    ("adeventsx_url", "downstream_url"),
    ("adeventsx_api_key", "downstream_api_key"),
];

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// The defaults run the gateway against the built-in simulator, so the
/// service works without any downstream credentials.
///
/// # Example
///
/// ```no_run
/// use beacon_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    // Server
    /// Server bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whole-request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    // Downstream
    /// Which downstream to dispatch to: `simulated` or `http`.
    ///
    /// Environment variable: `DOWNSTREAM_MODE`
    #[serde(default)]
    pub downstream_mode: DownstreamMode,
    /// Conversions endpoint used in `http` mode.
    ///
    /// Environment variable: `ADEVENTSX_URL`
    #[serde(default = "default_downstream_url")]
    pub downstream_url: String,
    /// API key sent in the `X-Api-Key` header.
    ///
    /// Environment variable: `ADEVENTSX_API_KEY`
    #[serde(default = "default_api_key")]
    pub downstream_api_key: String,
    /// Time budget for a single downstream attempt in milliseconds.
    ///
    /// Environment variable: `ATTEMPT_TIMEOUT_MS`
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    // Retry
    /// Maximum attempts per event, including the first.
    ///
    /// Environment variable: `MAX_ATTEMPTS`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff in milliseconds.
    ///
    /// Environment variable: `RETRY_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    ///
    /// Environment variable: `RETRY_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `RETRY_JITTER_FACTOR`
    #[serde(default)]
    pub retry_jitter_factor: f64,

    // Idempotency
    /// How long an event id is remembered, in seconds.
    ///
    /// Environment variable: `IDEMPOTENCY_RETENTION_SECONDS`
    #[serde(default = "default_retention_seconds")]
    pub idempotency_retention_seconds: u64,
    /// How often expired ids are swept, in seconds.
    ///
    /// Environment variable: `IDEMPOTENCY_SWEEP_INTERVAL_SECONDS`
    #[serde(default = "default_sweep_interval_seconds")]
    pub idempotency_sweep_interval_seconds: u64,

    // Simulator
    /// Shortest simulated downstream latency in milliseconds.
    ///
    /// Environment variable: `SIMULATOR_MIN_LATENCY_MS`
    #[serde(default = "default_simulator_min_latency_ms")]
    pub simulator_min_latency_ms: u64,
    /// Longest simulated downstream latency in milliseconds.
    ///
    /// Environment variable: `SIMULATOR_MAX_LATENCY_MS`
    #[serde(default = "default_simulator_max_latency_ms")]
    pub simulator_max_latency_ms: u64,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the merged values
    /// fail validation.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("").map(|key| {
                ENV_RENAMES
                    .iter()
                    .find(|(env, _)| key.as_str().eq_ignore_ascii_case(env))
                    .map_or_else(|| key.into(), |(_, field)| (*field).into())
            }));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Whole-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
        }
    }

    /// Convert to dispatcher configuration.
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            retry: self.to_retry_policy(),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
        }
    }

    /// Convert to HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            url: self.downstream_url.clone(),
            api_key: self.downstream_api_key.clone(),
            timeout: Duration::from_millis(self.attempt_timeout_ms),
            ..Default::default()
        }
    }

    /// Convert to simulator configuration.
    pub fn to_simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            min_latency: Duration::from_millis(self.simulator_min_latency_ms),
            max_latency: Duration::from_millis(self.simulator_max_latency_ms),
            ..Default::default()
        }
    }

    /// Convert to idempotency cache configuration.
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            retention: Duration::from_secs(self.idempotency_retention_seconds),
            sweep_interval: Duration::from_secs(self.idempotency_sweep_interval_seconds),
        }
    }

    /// Parse server socket address from host and port configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Get the downstream API key masked for logging.
    ///
    /// Keeps at most the first four characters.
    pub fn api_key_masked(&self) -> String {
        let visible: String = self.downstream_api_key.chars().take(4).collect();
        if visible.chars().count() == self.downstream_api_key.chars().count() {
            return "***".to_string();
        }
        format!("{visible}***")
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.request_timeout_seconds == 0 {
            anyhow::bail!("request_timeout_seconds must be greater than 0");
        }

        if self.attempt_timeout_ms == 0 {
            anyhow::bail!("attempt_timeout_ms must be greater than 0");
        }

        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be greater than 0");
        }

        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            anyhow::bail!("retry_max_delay_ms cannot be below retry_base_delay_ms");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.idempotency_retention_seconds == 0 {
            anyhow::bail!("idempotency_retention_seconds must be greater than 0");
        }

        if self.idempotency_sweep_interval_seconds == 0 {
            anyhow::bail!("idempotency_sweep_interval_seconds must be greater than 0");
        }

        if self.simulator_min_latency_ms > self.simulator_max_latency_ms {
            anyhow::bail!("simulator_min_latency_ms cannot exceed simulator_max_latency_ms");
        }

        let dispatch_budget = self.to_dispatcher_config().worst_case_duration();
        if self.request_timeout() <= dispatch_budget {
            anyhow::bail!(
                "request_timeout_seconds ({}s) must exceed the worst-case dispatch time ({}ms)",
                self.request_timeout_seconds,
                dispatch_budget.as_millis()
            );
        }

        if self.downstream_mode == DownstreamMode::Http && self.downstream_url.trim().is_empty() {
            anyhow::bail!("downstream_url is required in http mode");
        }

        Ok(())
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("downstream_mode", &self.downstream_mode)
            .field("downstream_url", &self.downstream_url)
            .field("downstream_api_key", &self.api_key_masked())
            .field("attempt_timeout_ms", &self.attempt_timeout_ms)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("retry_jitter_factor", &self.retry_jitter_factor)
            .field("idempotency_retention_seconds", &self.idempotency_retention_seconds)
            .field("idempotency_sweep_interval_seconds", &self.idempotency_sweep_interval_seconds)
            .field("simulator_min_latency_ms", &self.simulator_min_latency_ms)
            .field("simulator_max_latency_ms", &self.simulator_max_latency_ms)
            .field("rust_log", &self.rust_log)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            downstream_mode: DownstreamMode::default(),
            downstream_url: default_downstream_url(),
            downstream_api_key: default_api_key(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: 0.0,
            idempotency_retention_seconds: default_retention_seconds(),
            idempotency_sweep_interval_seconds: default_sweep_interval_seconds(),
            simulator_min_latency_ms: default_simulator_min_latency_ms(),
            simulator_max_latency_ms: default_simulator_max_latency_ms(),
            rust_log: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_downstream_url() -> String {
    DEFAULT_DOWNSTREAM_URL.to_string()
}

fn default_api_key() -> String {
    "dummy-key".to_string()
}

fn default_attempt_timeout_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_retention_seconds() -> u64 {
    600
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

fn default_simulator_min_latency_ms() -> u64 {
    100
}

fn default_simulator_max_latency_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info,beacon=debug,tower_http=debug".to_string()
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        vars: Vec<String>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, vars: Vec::new(), originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            if !self.vars.contains(&key.to_string()) {
                self.originals.insert(key.to_string(), env::var(key).ok());
                self.vars.push(key.to_string());
            }
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for var in &self.vars {
                match self.originals.get(var) {
                    Some(Some(value)) => env::set_var(var, value),
                    Some(None) => env::remove_var(var),
                    None => {},
                }
            }
        }
    }

    #[test]
    fn defaults_match_reference_service() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.port, 3000);
        assert_eq!(config.downstream_mode, DownstreamMode::Simulated);
        assert_eq!(config.downstream_url, "https://api.adeventsx.example/v1/conversions");
        assert_eq!(config.downstream_api_key, "dummy-key");

        let dispatcher = config.to_dispatcher_config();
        assert_eq!(dispatcher.attempt_timeout, Duration::from_secs(5));
        assert_eq!(dispatcher.retry, RetryPolicy::default());

        let cache = config.to_cache_config();
        assert_eq!(cache, CacheConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("PORT", "9090");
        guard.set_var("REQUEST_TIMEOUT", "45");
        guard.set_var("DOWNSTREAM_MODE", "http");
        guard.set_var("ADEVENTSX_URL", "http://localhost:4000/v1/conversions");
        guard.set_var("ADEVENTSX_API_KEY", "live-key-123");
        guard.set_var("MAX_ATTEMPTS", "5");
        guard.set_var("RETRY_BASE_DELAY_MS", "250");
        guard.set_var("IDEMPOTENCY_RETENTION_SECONDS", "60");

        let config = Config::load().expect("Config should load with env overrides");

        assert_eq!(config.port, 9090);
        assert_eq!(config.request_timeout(), Duration::from_secs(45));
        assert_eq!(config.downstream_mode, DownstreamMode::Http);
        assert_eq!(config.downstream_url, "http://localhost:4000/v1/conversions");
        assert_eq!(config.downstream_api_key, "live-key-123");

        let retry = config.to_retry_policy();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.to_cache_config().retention, Duration::from_secs(60));

        let client = config.to_client_config();
        assert_eq!(client.api_key, "live-key-123");
        assert_eq!(client.timeout, Duration::from_millis(5000));
    }

    #[test]
    fn unknown_downstream_mode_rejected() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("DOWNSTREAM_MODE", "carrier-pigeon");

        assert!(Config::load().is_err());
    }

    #[test]
    fn invalid_config_validation_fails() {
        let invalid = [
            Config { port: 0, ..Config::default() },
            Config { max_attempts: 0, ..Config::default() },
            Config { attempt_timeout_ms: 0, ..Config::default() },
            Config { idempotency_retention_seconds: 0, ..Config::default() },
            Config { idempotency_sweep_interval_seconds: 0, ..Config::default() },
            Config { retry_jitter_factor: 1.5, ..Config::default() },
            Config { retry_base_delay_ms: 60_000, ..Config::default() },
            Config { request_timeout_seconds: 18, ..Config::default() },
            Config {
                simulator_min_latency_ms: 600,
                simulator_max_latency_ms: 100,
                ..Config::default()
            },
            Config {
                downstream_mode: DownstreamMode::Http,
                downstream_url: " ".into(),
                ..Config::default()
            },
        ];

        for config in invalid {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }

    #[test]
    fn request_timeout_must_cover_dispatch_budget() {
        // 5 attempts x 5s plus 1+2+4+8s of backoff is 40s.
        let over_budget = Config { max_attempts: 5, ..Config::default() };
        assert!(over_budget.validate().is_err());

        let exact = Config { max_attempts: 5, request_timeout_seconds: 40, ..Config::default() };
        assert!(exact.validate().is_err());

        let covered = Config { max_attempts: 5, request_timeout_seconds: 41, ..Config::default() };
        assert!(covered.validate().is_ok());
    }

    #[test]
    fn api_key_masking() {
        let config = Config { downstream_api_key: "sk_live_abcdef".into(), ..Config::default() };
        let masked = config.api_key_masked();

        assert_eq!(masked, "sk_l***");
        assert!(!format!("{config:?}").contains("abcdef"));

        let short = Config { downstream_api_key: "abc".into(), ..Config::default() };
        assert_eq!(short.api_key_masked(), "***");
    }

    #[test]
    fn socket_address_parsing() {
        let config = Config { host: "127.0.0.1".into(), port: 9000, ..Config::default() };

        let addr = config.parse_server_addr().expect("Should parse socket address");

        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 9000);
    }
}
