//! Data models for the AEMET weather pipeline
//!
//! This module contains the core domain models organized by concern:
//! - Location: query points and catalog entries
//! - Weather: sensors, observations and current conditions
//! - Forecast: time buckets and exposed daily records

pub mod forecast;
pub mod location;
pub mod weather;

// Re-export all public types for convenient access
pub use forecast::{BucketKind, DailyForecastRecord, ForecastBucket, ForecastMode, ForecastSlot};
pub use location::{GeoPoint, LocationEntry, LocationKind};
pub use weather::{
    CurrentConditions, FusedReading, ObservationSample, Provenance, Sensor, SkyCode, Value,
    WeatherCondition,
};
