use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Room engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub guest: GuestConfig,
    pub hub: HubConfig,
    pub vendor: VendorCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Site-wide guest access toggle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    pub enabled: bool,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Per-room connection hub limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Maximum live connections per room, 0 for unlimited
    pub max_connections: usize,
    /// Outbound queue length per connection
    pub client_queue_size: usize,
    /// How long a broadcast waits on a full queue before dropping the connection
    pub send_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 0,
            client_queue_size: 128,
            send_timeout_ms: 200,
        }
    }
}

impl HubConfig {
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorCacheConfig {
    /// TTL of resolved movie URLs
    pub movie_ttl_secs: u64,
    /// TTL of vendor login state, 0 keeps it until invalidated
    pub user_ttl_secs: u64,
}

impl Default for VendorCacheConfig {
    fn default() -> Self {
        Self {
            movie_ttl_secs: 3600,
            user_ttl_secs: 0,
        }
    }
}

impl VendorCacheConfig {
    #[must_use]
    pub const fn movie_ttl(&self) -> Duration {
        Duration::from_secs(self.movie_ttl_secs)
    }

    #[must_use]
    pub const fn user_ttl(&self) -> Duration {
        Duration::from_secs(self.user_ttl_secs)
    }
}

/// Read-only view of site-wide settings consulted by rooms
pub trait GlobalSettings: Send + Sync {
    fn enable_guest(&self) -> bool;
}

impl GlobalSettings for Config {
    fn enable_guest(&self) -> bool {
        self.guest.enabled
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // SYNCTV_ROOM_HUB__MAX_CONNECTIONS=100
        builder = builder.add_source(
            Environment::with_prefix("SYNCTV_ROOM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}
