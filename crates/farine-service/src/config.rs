//! # Service Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FARINE_DB_PATH=/var/lib/farine/farine.db                           │
//! │     FARINE_TIMEZONE=Africa/Kinshasa                                    │
//! │     FARINE_SESSION_POLICY=require_open                                 │
//! │     FARINE_BUS=redis   FARINE_REDIS_URL=redis://127.0.0.1/             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/delivery/farine.toml (Linux)                             │
//! │     ~/Library/Application Support/com.farine.delivery/farine.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bag price and bag weight are business parameters stored in the database
//! (`config_parameters`), not here: they may change while the service runs.
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/farine/farine.db"
//! max_connections = 5
//!
//! [sessions]
//! default_timezone = "Africa/Kinshasa"
//! policy = "auto_open"       # auto_open | require_open
//! name_prefix = "Delivery"
//!
//! [bus]
//! kind = "redis"             # broadcast | redis | none
//! capacity = 256
//! redis_url = "redis://127.0.0.1/"
//! channel_prefix = "farine."
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use farine_db::DbConfig;

use crate::error::{ServiceError, ServiceResult};

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "farine", "delivery")
        .map(|dirs| dirs.data_dir().join("farine.db"))
        .unwrap_or_else(|| PathBuf::from("farine.db"))
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Session Settings
// =============================================================================

/// Whether deliveries may open a session on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// Resolve or create the session of the active window.
    #[default]
    AutoOpen,

    /// Writes need a session the courier opened; none is created for them.
    RequireOpen,
}

impl std::fmt::Display for SessionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPolicy::AutoOpen => write!(f, "auto_open"),
            SessionPolicy::RequireOpen => write!(f, "require_open"),
        }
    }
}

impl std::str::FromStr for SessionPolicy {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto_open" | "auto" => Ok(SessionPolicy::AutoOpen),
            "require_open" | "explicit" => Ok(SessionPolicy::RequireOpen),
            other => Err(ServiceError::Config(format!(
                "Unknown session policy: '{}'. Valid options: auto_open, require_open",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Zone used for couriers without one of their own. `None` means UTC.
    #[serde(default)]
    pub default_timezone: Option<String>,

    #[serde(default)]
    pub policy: SessionPolicy,

    /// Session names are `<prefix>-YYYY-MM-DD`.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

fn default_name_prefix() -> String {
    "Delivery".to_string()
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            default_timezone: None,
            policy: SessionPolicy::default(),
            name_prefix: default_name_prefix(),
        }
    }
}

// =============================================================================
// Bus Settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusKind {
    /// In-process fan-out to subscribers of this service.
    #[default]
    Broadcast,
    Redis,
    /// Notifications disabled.
    None,
}

impl std::str::FromStr for BusKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "broadcast" => Ok(BusKind::Broadcast),
            "redis" => Ok(BusKind::Redis),
            "none" | "off" | "disabled" => Ok(BusKind::None),
            other => Err(ServiceError::Config(format!(
                "Unknown bus kind: '{}'. Valid options: broadcast, redis, none",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    #[serde(default)]
    pub kind: BusKind,

    /// Buffer of the broadcast channel (messages kept for slow subscribers).
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prepended to channel names on external transports.
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

fn default_capacity() -> usize {
    256
}

fn default_channel_prefix() -> String {
    "farine.".to_string()
}

impl Default for BusSettings {
    fn default() -> Self {
        BusSettings {
            kind: BusKind::default(),
            capacity: default_capacity(),
            redis_url: None,
            channel_prefix: default_channel_prefix(),
        }
    }
}

// =============================================================================
// Service Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sessions: SessionSettings,

    #[serde(default)]
    pub bus: BusSettings,
}

impl ServiceConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (farine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ServiceResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading service config from file");
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    ServiceError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> ServiceResult<Self> {
        toml::from_str(contents).map_err(|e| ServiceError::Config(e.to_string()))
    }

    /// Configuration for tests and the seed tool: in-memory database,
    /// notifications kept in process.
    pub fn in_memory() -> Self {
        ServiceConfig {
            database: DatabaseSettings {
                path: PathBuf::from(":memory:"),
                max_connections: 1,
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.database.max_connections == 0 {
            return Err(ServiceError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.sessions.name_prefix.trim().is_empty() {
            return Err(ServiceError::Config(
                "sessions.name_prefix must not be empty".into(),
            ));
        }

        if let Some(tz) = &self.sessions.default_timezone {
            if tz.parse::<chrono_tz::Tz>().is_err() {
                return Err(ServiceError::Config(format!(
                    "sessions.default_timezone '{}' is not an IANA zone",
                    tz
                )));
            }
        }

        match self.bus.kind {
            BusKind::Broadcast if self.bus.capacity == 0 => Err(ServiceError::Config(
                "bus.capacity must be greater than 0".into(),
            )),
            BusKind::Redis => match self.bus.redis_url.as_deref() {
                Some(url) if url.starts_with("redis://") || url.starts_with("rediss://") => Ok(()),
                Some(url) => Err(ServiceError::Config(format!(
                    "bus.redis_url must start with redis:// or rediss://, got: {}",
                    url
                ))),
                None => Err(ServiceError::Config(
                    "bus.redis_url is required for the redis bus".into(),
                )),
            },
            _ => Ok(()),
        }
    }

    /// Pool settings derived from `[database]`.
    pub fn db_config(&self) -> DbConfig {
        if self.database.path.as_os_str() == ":memory:" {
            return DbConfig::in_memory();
        }
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FARINE_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(tz) = std::env::var("FARINE_TIMEZONE") {
            debug!(timezone = %tz, "Overriding default timezone from environment");
            self.sessions.default_timezone = Some(tz);
        }

        if let Ok(policy) = std::env::var("FARINE_SESSION_POLICY") {
            match policy.parse() {
                Ok(parsed) => self.sessions.policy = parsed,
                Err(_) => warn!(policy = %policy, "Unknown session policy in environment"),
            }
        }

        if let Ok(kind) = std::env::var("FARINE_BUS") {
            match kind.parse() {
                Ok(parsed) => self.bus.kind = parsed,
                Err(_) => warn!(kind = %kind, "Unknown bus kind in environment"),
            }
        }

        if let Ok(url) = std::env::var("FARINE_REDIS_URL") {
            self.bus.redis_url = Some(url);
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "farine", "delivery")
            .map(|dirs| dirs.config_dir().join("farine.toml"))
    }
}
