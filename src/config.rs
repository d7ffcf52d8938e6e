use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::market_data::history::MergeMode;
use crate::market_data::projector::Category;

const DEFAULT_CONFIG: &str = "config/tickwatch";
const ENV_PREFIX: &str = "TICKWATCH";

/// Settings for every view plus the service connection. Layered as
/// defaults, then `config/tickwatch.toml` (or an explicit path), then
/// `TICKWATCH__SECTION__KEY` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub service: ServiceSettings,
    pub dashboard: DashboardSettings,
    pub watchlist: WatchlistSettings,
    pub events: EventSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { base_url: "http://127.0.0.1:8000".to_string(), request_timeout_ms: 5_000 }
    }
}

impl ServiceSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub poll_interval_ms: u64,
    pub capacity: usize,
    pub merge_mode: MergeMode,
    pub categories: Vec<Category>,
    /// Category shown first; the first declared one when unset
    pub active_category: Option<String>,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            capacity: 60,
            merge_mode: MergeMode::Append,
            categories: vec![
                Category::new("Stocks", &["AAPL", "MSFT", "TSLA", "GOOG", "AMZN"]),
                Category::new("Commodities", &["GOLD", "SILVER", "OIL"]),
                Category::new("Crypto", &["BTC", "ETH"]),
            ],
            active_category: None,
        }
    }
}

impl DashboardSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchlistSettings {
    pub poll_interval_ms: u64,
    pub capacity: usize,
    /// History points per membership row
    pub preview_points: usize,
    pub merge_mode: MergeMode,
}

impl Default for WatchlistSettings {
    fn default() -> Self {
        Self { poll_interval_ms: 8_000, capacity: 180, preview_points: 60, merge_mode: MergeMode::Replace }
    }
}

impl WatchlistSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub poll_interval_ms: u64,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self { poll_interval_ms: 10_000 }
    }
}

impl EventSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Settings {
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG).required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("dashboard.poll_interval_ms", self.dashboard.poll_interval_ms),
            ("watchlist.poll_interval_ms", self.watchlist.poll_interval_ms),
            ("events.poll_interval_ms", self.events.poll_interval_ms),
            ("service.request_timeout_ms", self.service.request_timeout_ms),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Message(format!("{key} must be greater than zero")));
            }
        }
        let capacities = [
            ("dashboard.capacity", self.dashboard.capacity),
            ("watchlist.capacity", self.watchlist.capacity),
            ("watchlist.preview_points", self.watchlist.preview_points),
        ];
        for (key, value) in capacities {
            if value == 0 {
                return Err(ConfigError::Message(format!("{key} must be greater than zero")));
            }
        }

        let mut seen = ahash::AHashSet::new();
        for category in &self.dashboard.categories {
            if !seen.insert(category.name.to_lowercase()) {
                return Err(ConfigError::Message(format!("duplicate category '{}'", category.name)));
            }
        }
        if let Some(active) = &self.dashboard.active_category {
            if !seen.contains(&active.to_lowercase()) {
                return Err(ConfigError::Message(format!("active_category '{active}' is not a declared category")));
            }
        }
        Ok(())
    }
}
