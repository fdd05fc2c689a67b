//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::WinPolicy;
use crate::util::time::{DEFAULT_SIMULATION_TPS, DEFAULT_SNAPSHOT_TPS};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS ("*" allows any)
    pub client_origin: String,
    /// HS256 secret for bearer tokens. Auth is off when unset.
    pub jwt_secret: Option<String>,

    /// Per-match engine settings
    pub game: GameSettings,
    /// Map used when a create request names none
    pub default_map: String,
}

/// Settings handed to every match actor
#[derive(Clone, Debug)]
pub struct GameSettings {
    pub tick_rate: u32,
    pub snapshot_rate: u32,
    pub win_policy: WinPolicy,
    pub max_bots: usize,
    /// How long a finished match stays visible before retirement
    pub game_over_grace: Duration,
    /// A match nobody ever joined is retired after this
    pub idle_timeout: Duration,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_SIMULATION_TPS,
            snapshot_rate: DEFAULT_SNAPSHOT_TPS,
            win_policy: WinPolicy::LastStanding,
            max_bots: 3,
            game_over_grace: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = GameSettings::default();
        let tick_rate: u32 = parse_var("TICK_RATE", defaults.tick_rate)?;
        if tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        let snapshot_rate: u32 = parse_var("SNAPSHOT_RATE", defaults.snapshot_rate)?;

        let game = GameSettings {
            tick_rate,
            snapshot_rate: snapshot_rate.clamp(1, tick_rate),
            win_policy: parse_var("WIN_POLICY", defaults.win_policy)?,
            max_bots: parse_var("MAX_BOTS_PER_MATCH", defaults.max_bots)?,
            game_over_grace: Duration::from_secs(parse_var(
                "GAME_OVER_GRACE_SECS",
                defaults.game_over_grace.as_secs(),
            )?),
            idle_timeout: Duration::from_secs(parse_var(
                "IDLE_MATCH_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )?),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            jwt_secret: env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()),

            game,
            default_map: env::var("DEFAULT_MAP").unwrap_or_else(|_| "Map1".to_string()),
        })
    }
}

/// Read an optional variable, falling back to `default` when unset
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
impl Config {
    /// Open configuration used by in-process tests
    pub fn for_tests() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "debug".to_string(),
            client_origin: "*".to_string(),
            jwt_secret: None,
            game: GameSettings::default(),
            default_map: "Map1".to_string(),
        }
    }
}
