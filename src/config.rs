//! Configuration management for the AEMET weather pipeline
//!
//! Handles loading configuration from files, environment variables,
//! and provides validation for all configuration settings.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::WeatherError;
use crate::geo_index::SearchStrategy;
use crate::models::{ForecastMode, GeoPoint};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AemetConfig {
    /// AEMET OpenData access
    #[serde(default)]
    pub api: ApiConfig,
    /// Where the weather is wanted
    #[serde(default)]
    pub location: LocationConfig,
    /// How the forecast is exposed
    #[serde(default)]
    pub forecast: ForecastConfig,
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Catalog search settings
    #[serde(default)]
    pub search: SearchConfig,
    /// Update loop settings
    #[serde(default)]
    pub update: UpdateConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// AEMET OpenData API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// OpenData API key, requested at opendata.aemet.es
    #[serde(default)]
    pub api_key: String,
    /// Base URL of the API
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_seconds: u64,
    /// Maximum number of retries for transient failures
    #[serde(default = "default_api_max_retries")]
    pub max_retries: u32,
}

/// Query location and optional explicit codes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    #[serde(default = "default_longitude")]
    pub longitude: f64,
    /// Station `idema` to use instead of the nearest one
    #[serde(default)]
    pub station: Option<String>,
    /// Municipality code to use instead of the nearest one
    #[serde(default)]
    pub municipality: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ForecastConfig {
    /// `hourly` or `daily`
    #[serde(default)]
    pub mode: ForecastMode,
}

/// Cache configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Keep payloads on disk across restarts
    #[serde(default = "default_cache_persistent")]
    pub persistent: bool,
    /// Cache directory location
    #[serde(default = "default_cache_location")]
    pub location: String,
    /// Station and municipality catalogs TTL in hours
    #[serde(default = "default_catalog_ttl")]
    pub catalog_ttl_hours: u32,
    /// Observation and forecast payload TTL in minutes
    #[serde(default = "default_payload_ttl")]
    pub payload_ttl_minutes: u32,
}

/// Nearest-location search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub strategy: SearchStrategy,
    /// Farther than this from every station means outside coverage
    #[serde(default = "default_max_station_distance")]
    pub max_station_distance_km: f64,
    /// Farther than this from every municipality means outside coverage
    #[serde(default = "default_max_municipality_distance")]
    pub max_municipality_distance_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Minutes between update cycles
    #[serde(default = "default_update_interval")]
    pub interval_minutes: u32,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty or json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_api_base_url() -> String {
    crate::aemet::API_BASE_URL.to_string()
}

fn default_api_timeout() -> u64 {
    30
}

fn default_api_max_retries() -> u32 {
    3
}

// Puerta del Sol, Madrid
fn default_latitude() -> f64 {
    40.4168
}

fn default_longitude() -> f64 {
    -3.7038
}

fn default_cache_persistent() -> bool {
    true
}

fn default_cache_location() -> String {
    "~/.cache/aemet-weather".to_string()
}

fn default_catalog_ttl() -> u32 {
    7 * 24
}

fn default_payload_ttl() -> u32 {
    10
}

fn default_max_station_distance() -> f64 {
    40.0
}

fn default_max_municipality_distance() -> f64 {
    25.0
}

fn default_update_interval() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_api_base_url(),
            timeout_seconds: default_api_timeout(),
            max_retries: default_api_max_retries(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: default_latitude(),
            longitude: default_longitude(),
            station: None,
            municipality: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persistent: default_cache_persistent(),
            location: default_cache_location(),
            catalog_ttl_hours: default_catalog_ttl(),
            payload_ttl_minutes: default_payload_ttl(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            strategy: SearchStrategy::default(),
            max_station_distance_km: default_max_station_distance(),
            max_municipality_distance_km: default_max_municipality_distance(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_update_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LocationConfig {
    #[must_use]
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

impl CacheConfig {
    #[must_use]
    pub fn catalog_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.catalog_ttl_hours))
    }

    #[must_use]
    pub fn payload_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.payload_ttl_minutes))
    }

    /// Cache directory with a leading `~` expanded
    #[must_use]
    pub fn directory(&self) -> PathBuf {
        match self.location.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.location)),
            None => PathBuf::from(&self.location),
        }
    }
}

impl UpdateConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_minutes) * 60)
    }
}

impl AemetConfig {
    /// Load configuration from `config_path`, or the default location, plus
    /// environment variables
    pub fn load_from_path(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        // Load from file if path is provided or use default location
        let config_file = config_path.unwrap_or_else(|| {
            Self::get_config_path().unwrap_or_else(|| PathBuf::from("config.toml"))
        });

        if config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.clone())
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // Environment overrides, e.g. AEMET_API__API_KEY
        builder = builder.add_source(
            Environment::with_prefix("AEMET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| "Failed to build configuration")?;

        let mut config: AemetConfig = settings
            .try_deserialize()
            .with_context(|| "Failed to deserialize configuration")?;

        config.apply_defaults();
        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("aemet-weather").join("config.toml"))
    }

    /// Apply default values to missing configuration fields
    pub fn apply_defaults(&mut self) {
        if self.api.base_url.is_empty() {
            self.api.base_url = default_api_base_url();
        }
        if self.api.timeout_seconds == 0 {
            self.api.timeout_seconds = default_api_timeout();
        }
        if self.cache.location.is_empty() {
            self.cache.location = default_cache_location();
        }
        if self.cache.catalog_ttl_hours == 0 {
            self.cache.catalog_ttl_hours = default_catalog_ttl();
        }
        if self.cache.payload_ttl_minutes == 0 {
            self.cache.payload_ttl_minutes = default_payload_ttl();
        }
        if self.update.interval_minutes == 0 {
            self.update.interval_minutes = default_update_interval();
        }
        if self.logging.level.is_empty() {
            self.logging.level = default_log_level();
        }
        if self.logging.format.is_empty() {
            self.logging.format = default_log_format();
        }
        // blank override codes mean "search"
        if self.location.station.as_deref().is_some_and(|code| code.trim().is_empty()) {
            self.location.station = None;
        }
        if self
            .location
            .municipality
            .as_deref()
            .is_some_and(|code| code.trim().is_empty())
        {
            self.location.municipality = None;
        }
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.validate_api_key()?;
        self.validate_location()?;
        self.validate_numeric_ranges()?;
        self.validate_string_values()?;
        Ok(())
    }

    /// Validate the API key
    pub fn validate_api_key(&self) -> Result<()> {
        let api_key = self.api.api_key.trim();
        if api_key.is_empty() {
            return Err(WeatherError::config(
                "AEMET API key is missing. Request one at https://opendata.aemet.es and set api.api_key.",
            )
            .into());
        }

        if api_key.len() < 8 {
            return Err(WeatherError::config(
                "AEMET API key appears to be invalid (too short). Please check your API key.",
            )
            .into());
        }

        if api_key.len() > 1024 {
            return Err(WeatherError::config(
                "AEMET API key appears to be invalid (too long). Please check your API key.",
            )
            .into());
        }

        Ok(())
    }

    fn validate_location(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.location.latitude) {
            return Err(WeatherError::config(format!(
                "Latitude {} is out of range (-90 to 90)",
                self.location.latitude
            ))
            .into());
        }

        if !(-180.0..=180.0).contains(&self.location.longitude) {
            return Err(WeatherError::config(format!(
                "Longitude {} is out of range (-180 to 180)",
                self.location.longitude
            ))
            .into());
        }

        Ok(())
    }

    /// Validate numeric configuration ranges
    fn validate_numeric_ranges(&self) -> Result<()> {
        if self.api.timeout_seconds > 300 {
            return Err(WeatherError::config("AEMET API timeout cannot exceed 300 seconds").into());
        }

        if self.api.max_retries > 10 {
            return Err(WeatherError::config("AEMET API max retries cannot exceed 10").into());
        }

        if self.cache.catalog_ttl_hours > 24 * 30 {
            return Err(WeatherError::config("Catalog TTL cannot exceed 720 hours (30 days)").into());
        }

        if self.cache.payload_ttl_minutes > 24 * 60 {
            return Err(WeatherError::config("Payload TTL cannot exceed 1440 minutes (1 day)").into());
        }

        if self.update.interval_minutes > 24 * 60 {
            return Err(WeatherError::config("Update interval cannot exceed 1440 minutes (1 day)").into());
        }

        for (name, value) in [
            ("station", self.search.max_station_distance_km),
            ("municipality", self.search.max_municipality_distance_km),
        ] {
            if !(value > 0.0 && value <= 1000.0) {
                return Err(WeatherError::config(format!(
                    "Maximum {name} distance must be between 0 and 1000 km"
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Validate string configuration values
    fn validate_string_values(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(WeatherError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            ))
            .into());
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(WeatherError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_log_formats.join(", ")
            ))
            .into());
        }

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(WeatherError::config("AEMET API base URL must be a valid HTTP or HTTPS URL").into());
        }

        Ok(())
    }
}
