//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use storyweaver_core::domain::WordTarget;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Knobs for the zombie-recovery sweeper.
#[derive(Clone, Copy, Debug)]
pub struct SweeperSettings {
    /// Age past which a `pending` story counts as a zombie.
    pub zombie_threshold: Duration,
    /// How often the sweeper scans.
    pub check_interval: Duration,
    /// Automatic recovery attempts per story before giving up.
    pub max_auto_retries: u32,
    /// Pause between recoveries within one sweep, to avoid bursts.
    pub pause_between: Duration,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            zombie_threshold: Duration::from_millis(180_000),
            check_interval: Duration::from_millis(60_000),
            max_auto_retries: 2,
            pause_between: Duration::from_millis(500),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub story_model: String,
    pub title_model: String,
    /// Word target for a first story. Each call site gets its own explicit
    /// target; there is deliberately no single canonical length.
    pub story_words: WordTarget,
    /// Word target for sequels, which run much longer.
    pub sequel_words: WordTarget,
    /// Retry ceiling for a single logical generation call.
    pub max_generation_retries: u32,
    /// Base delay for exponential backoff between generation attempts.
    pub initial_retry_delay: Duration,
    /// How long a realtime subscriber waits before falling back to a direct
    /// state check.
    pub completion_timeout: Duration,
    pub sweeper: SweeperSettings,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys (as optional) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        // --- Load Adapter-specific Settings ---
        let story_model =
            std::env::var("STORY_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let title_model =
            std::env::var("TITLE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let story_words = WordTarget {
            min: parse_var_or("STORY_MIN_WORDS", 2000)?,
            max: parse_var_or("STORY_MAX_WORDS", 3000)?,
        };
        let sequel_words = WordTarget {
            min: parse_var_or("SEQUEL_MIN_WORDS", 6000)?,
            max: parse_var_or("SEQUEL_MAX_WORDS", 10000)?,
        };

        let max_generation_retries = parse_var_or("MAX_GENERATION_RETRIES", 3)?;
        let initial_retry_delay =
            Duration::from_millis(parse_var_or("INITIAL_RETRY_DELAY_MS", 1000)?);
        let completion_timeout =
            Duration::from_secs(parse_var_or("COMPLETION_TIMEOUT_SECS", 120)?);

        let sweeper = SweeperSettings {
            zombie_threshold: Duration::from_millis(parse_var_or(
                "ZOMBIE_THRESHOLD_MS",
                180_000,
            )?),
            check_interval: Duration::from_millis(parse_var_or("SWEEP_INTERVAL_MS", 60_000)?),
            max_auto_retries: parse_var_or("MAX_AUTO_RETRIES", 2)?,
            pause_between: Duration::from_millis(parse_var_or("SWEEP_PAUSE_MS", 500)?),
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            story_model,
            title_model,
            story_words,
            sequel_words,
            max_generation_retries,
            initial_retry_delay,
            completion_timeout,
            sweeper,
        })
    }
}

/// Reads an integer environment variable, falling back to `default` when unset.
fn parse_var_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(name.to_string(), format!("'{}' is not a number", raw))
        }),
        Err(_) => Ok(default),
    }
}
