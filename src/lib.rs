//! `aemet-weather` - current conditions and forecasts from AEMET OpenData
//!
//! This library resolves the station and municipality nearest to a point,
//! caches the agency's catalogs and payloads, and reconciles station
//! observations with the horizon-dependent forecast into one current
//! conditions record and a list of daily forecast records.

pub mod aemet;
pub mod aggregate;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod forecast;
pub mod fusion;
pub mod geo_index;
pub mod models;
pub mod observation;
pub mod service;

// Re-export core types for public API
pub use aemet::{AemetClient, Resource, Upstream};
pub use aggregate::aggregate;
pub use cache::{CacheStore, FjallStore, MemoryStore, StoredBlob};
pub use catalog::{CatalogCache, Fetched};
pub use config::AemetConfig;
pub use error::WeatherError;
pub use fusion::fuse;
pub use geo_index::{GeoIndex, LocationQuery, NearestSearch, Resolution, SearchStrategy, resolve};
pub use models::{
    BucketKind, CurrentConditions, DailyForecastRecord, ForecastBucket, ForecastMode, GeoPoint, LocationEntry,
    LocationKind, Provenance, Sensor, Value,
};
pub use service::{ServiceOptions, WeatherReport, WeatherService};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, WeatherError>;
