use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::Position;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub location: LocationConfig,
    pub geocode: GeocodeConfig,
    pub eta: EtaConfig,
    pub backend: BackendConfig,
    pub storage: StorageConfig,
    pub ui: UiConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LocationConfig {
    pub fallback_lat: f64,              // Shown when there is no fresh cache entry
    pub fallback_lng: f64,
    pub cache_max_age_hours: u64,       // Cached fixes older than this are ignored
    pub network_timeout_secs: u64,
    pub network_max_age_secs: u64,      // Accept an OS fix this old for the network tier
    pub gps_timeout_secs: u64,          // Per fix attempt of the continuous watch
    pub refetch_high_timeout_secs: u64,
    pub refetch_low_timeout_secs: u64,
    pub refetch_low_max_age_secs: u64,
    pub lookup_ip: String,              // Empty means "the caller's own address"
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GeocodeConfig {
    pub api_key: String,
    pub base_url: String,
    pub debounce_ms: u64,
    pub strip_suffixes: Vec<String>, // Country names trimmed from display addresses
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EtaConfig {
    pub proximity_radius_m: f64,
    pub provider_limit: usize,
    pub no_provider_text: String,
    pub failure_text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub supabase_url: String,
    pub anon_key: String,
    pub request_timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub log_dir: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UiConfig {
    pub tick_rate_ms: u64,
    pub pin_step_m: f64, // How far one arrow key press moves the pickup pin
    pub map_span_deg: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            fallback_lat: 35.8989,
            fallback_lng: 14.5146,
            cache_max_age_hours: 24,
            network_timeout_secs: 5,
            network_max_age_secs: 60,
            gps_timeout_secs: 15,
            refetch_high_timeout_secs: 20,
            refetch_low_timeout_secs: 10,
            refetch_low_max_age_secs: 60,
            lookup_ip: String::new(),
        }
    }
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://maps.googleapis.com".to_string(),
            debounce_ms: 150,
            strip_suffixes: vec!["Malta".to_string()],
        }
    }
}

impl Default for EtaConfig {
    fn default() -> Self {
        Self {
            proximity_radius_m: 50.0,
            provider_limit: 1,
            no_provider_text: "15-20 mins".to_string(),
            failure_text: "~15 mins".to_string(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            anon_key: String::new(),
            request_timeout_secs: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "towme_location.db".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            tick_rate_ms: 150,
            pin_step_m: 25.0,
            map_span_deg: 0.02,
        }
    }
}

impl LocationConfig {
    pub fn fallback_position(&self) -> Position {
        Position::new(self.fallback_lat, self.fallback_lng)
    }

    pub fn cache_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_max_age_hours as i64)
    }
}

impl GeocodeConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Config {
    /// Loads config.toml from the root directory.
    /// If it doesn't exist, creates a default one.
    pub fn load() -> Self {
        Self::load_from("config.toml")
    }

    pub fn load_from(config_path: &str) -> Self {
        if let Ok(content) = fs::read_to_string(config_path) {
            match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    warn!("Failed to parse {}: {}. Using defaults.", config_path, e);
                    return Config::default();
                }
            }
        }

        let default_config = Config::default();

        // Save default config to disk for the user to edit later
        match toml::to_string_pretty(&default_config) {
            Ok(toml_string) => {
                if fs::write(config_path, toml_string).is_err() {
                    warn!("Could not write default {} to disk.", config_path);
                }
            }
            Err(e) => warn!("Could not serialize default config: {}", e),
        }

        info!("Loaded default configuration.");
        default_config
    }
}
