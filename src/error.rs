//! Error types and handling for the AEMET weather pipeline

use thiserror::Error;

use crate::models::LocationKind;

/// Main error type for the weather pipeline
#[derive(Error, Debug)]
pub enum WeatherError {
    /// An explicitly configured station or municipality code is not in the catalog
    #[error("Unknown {kind} code: {code}")]
    UnknownLocationCode { kind: LocationKind, code: String },

    /// The catalog holds no entries of the requested kind
    #[error("Catalog has no {kind} entries")]
    EmptyCatalog { kind: LocationKind },

    /// Network, HTTP or payload parse failure talking to the agency
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    /// The agency rejected the API key
    #[error("Invalid API key: {message}")]
    InvalidApiKey { message: String },

    /// The query point is farther from every known location than the coverage radius
    #[error("Nearest {kind} is {distance_km:.1} km away, outside agency coverage")]
    OutOfCoverage {
        kind: LocationKind,
        distance_km: f64,
    },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Cache operation errors
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// I/O operation errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl WeatherError {
    /// Create a new upstream error
    pub fn upstream<S: Into<String>>(message: S) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Whether a persisted copy may be served in place of a failed fetch.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WeatherError::UpstreamUnavailable { .. } | WeatherError::EmptyCatalog { .. }
        )
    }

    /// Get a user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            WeatherError::UnknownLocationCode { kind, code } => {
                format!("The configured {kind} code '{code}' does not exist. Please check your config.")
            }
            WeatherError::EmptyCatalog { .. } | WeatherError::UpstreamUnavailable { .. } => {
                "Unable to reach AEMET OpenData. Please check your internet connection.".to_string()
            }
            WeatherError::InvalidApiKey { .. } => {
                "AEMET rejected the API key. Please check your config file.".to_string()
            }
            WeatherError::OutOfCoverage { kind, distance_km } => {
                format!("No AEMET {kind} within reach ({distance_km:.0} km). Is the location in Spain?")
            }
            WeatherError::Config { .. } => {
                "Configuration error. Please check your config file and API key.".to_string()
            }
            WeatherError::Cache { .. } => {
                "Cache operation failed. You may need to clear your cache directory.".to_string()
            }
            WeatherError::Io { .. } => {
                "File operation failed. Please check file permissions.".to_string()
            }
        }
    }
}
