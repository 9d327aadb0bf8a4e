//! # Engine Configuration
//!
//! Configuration for shopper sessions, the reconciler and checkout.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOREFRONT_CHECKOUT_TIMEOUT_MS=5000                                │
//! │     STOREFRONT_DB_PATH=/var/lib/storefront/storefront.db               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/storefront/storefront.toml (Linux)                       │
//! │     ~/Library/Application Support/com.storefront.engine/... (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     no checkout timeout, 1024 buffered events, 100 lines, 999 units    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # storefront.toml
//! [checkout]
//! timeout_ms = 5000       # omit for no timeout
//!
//! [reconciler]
//! event_buffer = 1024     # catalog events buffered per session
//! notice_buffer = 64      # session updates buffered per subscriber
//!
//! [cart]
//! max_lines = 100
//! max_item_quantity = 999
//!
//! [database]
//! path = "./storefront.db"
//! max_connections = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use storefront_core::{CartLimits, MAX_CART_LINES, MAX_ITEM_QUANTITY};
use storefront_db::DbConfig;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Checkout Settings
// =============================================================================

/// Checkout behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutSettings {
    /// Limit on acquiring locks and validating the cart (milliseconds).
    /// `None` means checkout waits as long as it needs.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl CheckoutSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

// =============================================================================
// Reconciler Settings
// =============================================================================

/// Per-session reconciler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    /// Catalog change events buffered per subscriber before it lags.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Session updates (notices, repriced carts) buffered per listener.
    #[serde(default = "default_notice_buffer")]
    pub notice_buffer: usize,
}

fn default_event_buffer() -> usize {
    1024
}

fn default_notice_buffer() -> usize {
    64
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        ReconcilerSettings {
            event_buffer: default_event_buffer(),
            notice_buffer: default_notice_buffer(),
        }
    }
}

// =============================================================================
// Cart Settings
// =============================================================================

/// Cart size limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartSettings {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    #[serde(default = "default_max_item_quantity")]
    pub max_item_quantity: i64,
}

fn default_max_lines() -> usize {
    MAX_CART_LINES
}

fn default_max_item_quantity() -> i64 {
    MAX_ITEM_QUANTITY
}

impl Default for CartSettings {
    fn default() -> Self {
        CartSettings {
            max_lines: default_max_lines(),
            max_item_quantity: default_max_item_quantity(),
        }
    }
}

impl CartSettings {
    pub fn limits(&self) -> CartLimits {
        CartLimits {
            max_lines: self.max_lines,
            max_quantity: self.max_item_quantity,
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// SQLite settings. Without a path the engine runs on the in-memory stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub checkout: CheckoutSettings,

    #[serde(default)]
    pub reconciler: ReconcilerSettings,

    #[serde(default)]
    pub cart: CartSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (storefront.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.checkout.timeout_ms == Some(0) {
            return Err(EngineError::InvalidConfig(
                "checkout.timeout_ms must be greater than 0 (omit it for no timeout)".into(),
            ));
        }

        if self.reconciler.event_buffer == 0 || self.reconciler.notice_buffer == 0 {
            return Err(EngineError::InvalidConfig(
                "reconciler buffers must be greater than 0".into(),
            ));
        }

        if self.cart.max_lines == 0 {
            return Err(EngineError::InvalidConfig(
                "cart.max_lines must be greater than 0".into(),
            ));
        }

        if !(1..=MAX_ITEM_QUANTITY).contains(&self.cart.max_item_quantity) {
            return Err(EngineError::InvalidConfig(format!(
                "cart.max_item_quantity must be between 1 and {}",
                MAX_ITEM_QUANTITY
            )));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("STOREFRONT_CHECKOUT_TIMEOUT_MS") {
            match value.parse::<u64>() {
                Ok(ms) => {
                    debug!(timeout_ms = ms, "Overriding checkout timeout from environment");
                    self.checkout.timeout_ms = Some(ms);
                }
                Err(_) => warn!(value = %value, "Ignoring unparseable STOREFRONT_CHECKOUT_TIMEOUT_MS"),
            }
        }

        if let Ok(value) = std::env::var("STOREFRONT_EVENT_BUFFER") {
            if let Ok(n) = value.parse::<usize>() {
                self.reconciler.event_buffer = n;
            }
        }

        if let Ok(value) = std::env::var("STOREFRONT_NOTICE_BUFFER") {
            if let Ok(n) = value.parse::<usize>() {
                self.reconciler.notice_buffer = n;
            }
        }

        if let Ok(value) = std::env::var("STOREFRONT_MAX_CART_LINES") {
            if let Ok(n) = value.parse::<usize>() {
                self.cart.max_lines = n;
            }
        }

        if let Ok(value) = std::env::var("STOREFRONT_MAX_ITEM_QUANTITY") {
            if let Ok(n) = value.parse::<i64>() {
                self.cart.max_item_quantity = n;
            }
        }

        if let Ok(path) = std::env::var("STOREFRONT_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "storefront", "engine")
            .map(|dirs| dirs.config_dir().join("storefront.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the SQLite configuration, if a database path is set.
    pub fn db_config(&self) -> Option<DbConfig> {
        self.database.path.as_ref().map(|path| {
            DbConfig::new(path)
                .max_connections(self.database.max_connections)
                .event_capacity(self.reconciler.event_buffer)
        })
    }

    pub fn cart_limits(&self) -> CartLimits {
        self.cart.limits()
    }

    pub fn checkout_timeout(&self) -> Option<Duration> {
        self.checkout.timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.checkout_timeout(), None);
        assert_eq!(config.reconciler.event_buffer, 1024);
        assert_eq!(config.cart.max_lines, MAX_CART_LINES);
        assert_eq!(config.cart_limits().max_quantity, MAX_ITEM_QUANTITY);
        assert!(config.db_config().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [checkout]
            timeout_ms = 250

            [database]
            path = "/tmp/storefront.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.checkout_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.reconciler.notice_buffer, 64);

        let db = config.db_config().unwrap();
        assert_eq!(db.max_connections, 5);
        assert_eq!(db.event_capacity, 1024);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.checkout.timeout_ms = Some(0);
        assert!(config.validate().is_err());
        config.checkout.timeout_ms = Some(100);
        assert!(config.validate().is_ok());

        config.cart.max_item_quantity = 0;
        assert!(config.validate().is_err());
        config.cart.max_item_quantity = MAX_ITEM_QUANTITY + 1;
        assert!(config.validate().is_err());
        config.cart.max_item_quantity = 10;

        config.reconciler.event_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "storefront-config-{}.toml",
            uuid::Uuid::new_v4()
        ));

        let mut config = EngineConfig::default();
        config.cart.max_lines = 12;
        config.checkout.timeout_ms = Some(1500);
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let loaded: EngineConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.cart.max_lines, 12);
        assert_eq!(loaded.checkout.timeout_ms, Some(1500));

        std::fs::remove_file(&path).ok();
    }
}
