//! Weather Update Module
//!
//! One update cycle resolves the station and municipality for the configured
//! point, loads their payloads through the catalog cache, and produces the
//! current conditions plus the exposed forecast records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::aemet::{ATTRIBUTION, AemetClient};
use crate::aggregate::aggregate;
use crate::cache::{CacheStore, FjallStore, MemoryStore};
use crate::catalog::CatalogCache;
use crate::config::AemetConfig;
use crate::geo_index::{LocationQuery, Resolution};
use crate::models::{
    CurrentConditions, DailyForecastRecord, ForecastMode, GeoPoint, LocationKind, WeatherCondition,
};
use crate::observation::Observations;
use crate::{Result, WeatherError, forecast, fusion, observation};

/// What the service resolves and how it exposes the forecast
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOptions {
    pub point: GeoPoint,
    pub station: Option<String>,
    pub municipality: Option<String>,
    pub mode: ForecastMode,
    pub max_station_distance_km: Option<f64>,
    pub max_municipality_distance_km: Option<f64>,
}

impl ServiceOptions {
    /// Nearest station and municipality to `point`, without coverage limits
    #[must_use]
    pub fn nearest(point: GeoPoint, mode: ForecastMode) -> Self {
        Self {
            point,
            station: None,
            municipality: None,
            mode,
            max_station_distance_km: None,
            max_municipality_distance_km: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &AemetConfig) -> Self {
        Self {
            point: config.location.point(),
            station: config.location.station.clone(),
            municipality: config.location.municipality.clone(),
            mode: config.forecast.mode,
            max_station_distance_km: Some(config.search.max_station_distance_km),
            max_municipality_distance_km: Some(config.search.max_municipality_distance_km),
        }
    }

    fn query(&self, kind: LocationKind) -> LocationQuery {
        let (code, max_distance_km) = match kind {
            LocationKind::Station => (&self.station, self.max_station_distance_km),
            LocationKind::Municipality => (&self.municipality, self.max_municipality_distance_km),
        };
        LocationQuery {
            point: self.point,
            code: code.clone(),
            max_distance_km,
        }
    }
}

/// Result of one update cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherReport {
    pub current: CurrentConditions,
    /// Generic condition derived from the current sky code
    pub condition: Option<WeatherCondition>,
    pub mode: ForecastMode,
    pub forecast: Vec<DailyForecastRecord>,
    /// When the agency issued the forecast
    pub forecast_issued_at: Option<DateTime<Utc>>,
    /// Station the observations came from
    pub station: Resolution,
    /// Municipality the forecast is for
    pub municipality: Resolution,
    /// Some input was served from a stale copy
    pub degraded: bool,
    pub attribution: String,
    pub updated_at: DateTime<Utc>,
}

/// Runs update cycles and keeps the last successful report
pub struct WeatherService {
    cache: CatalogCache,
    options: ServiceOptions,
    last_report: RwLock<Option<WeatherReport>>,
}

impl WeatherService {
    #[must_use]
    pub fn new(cache: CatalogCache, options: ServiceOptions) -> Self {
        Self {
            cache,
            options,
            last_report: RwLock::new(None),
        }
    }

    /// Wire the AEMET client and the configured store into a service
    pub fn from_config(config: &AemetConfig) -> Result<Self> {
        let upstream = Arc::new(AemetClient::new(&config.api)?);

        let store: Arc<dyn CacheStore> = if config.cache.persistent {
            let directory = config.cache.directory();
            std::fs::create_dir_all(&directory)?;
            info!("Using cache directory {}", directory.display());
            Arc::new(
                FjallStore::open(&directory)
                    .map_err(|e| WeatherError::cache(format!("Failed to open {}: {e:#}", directory.display())))?,
            )
        } else {
            Arc::new(MemoryStore::new())
        };

        let cache = CatalogCache::new(upstream, store)
            .with_ttls(config.cache.catalog_ttl(), config.cache.payload_ttl())
            .with_strategy(config.search.strategy);
        Ok(Self::new(cache, ServiceOptions::from_config(config)))
    }

    /// Run one update cycle
    pub async fn update(&self, now: DateTime<Utc>) -> Result<WeatherReport> {
        info!(
            "Updating AEMET weather for ({}) in {} mode",
            self.options.point.format_coordinates(),
            self.options.mode
        );

        let (station, stations_degraded) = self.resolve(LocationKind::Station, now).await?;
        let (municipality, municipalities_degraded) = self.resolve(LocationKind::Municipality, now).await?;

        let (observed, observations_degraded) = self.observations(&station.entry.id, now).await?;

        let document = self.cache.get_forecast(&municipality.entry.id, now).await?;
        let forecast_issued_at = document.value.issued_at();
        debug!(
            "Forecast for {} ({}) issued {:?}",
            document.value.nombre.as_deref().unwrap_or(&municipality.entry.name),
            document.value.provincia.as_deref().unwrap_or("unknown province"),
            forecast_issued_at
        );
        let buckets = forecast::normalize(&document.value, now);

        let current = fusion::fuse(&observed, &buckets, now);
        let records = aggregate(&buckets, self.options.mode);

        let degraded = stations_degraded || municipalities_degraded || observations_degraded || document.degraded;
        if degraded {
            warn!("Report built from stale data");
        }

        let report = WeatherReport {
            condition: current.condition(),
            current,
            mode: self.options.mode,
            forecast: records,
            forecast_issued_at,
            station,
            municipality,
            degraded,
            attribution: ATTRIBUTION.to_string(),
            updated_at: now,
        };

        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }

    /// Run one update cycle, falling back to the last successful report
    pub async fn refresh(&self, now: DateTime<Utc>) -> Option<WeatherReport> {
        match self.update(now).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Update failed: {}", e);
                warn!("{}", e.user_message());
                self.last_report().await
            }
        }
    }

    /// Last successfully built report
    pub async fn last_report(&self) -> Option<WeatherReport> {
        self.last_report.read().await.clone()
    }

    async fn resolve(&self, kind: LocationKind, now: DateTime<Utc>) -> Result<(Resolution, bool)> {
        let index = self.cache.get_catalog(kind, now).await?;
        let resolution = index.value.resolve(&self.options.query(kind))?;
        debug!(
            "Using {} {} ({}) at {:.1} km",
            kind, resolution.entry.id, resolution.entry.name, resolution.distance_km
        );
        Ok((resolution, index.degraded))
    }

    /// Latest station readings. A station that cannot be read leaves the
    /// current conditions to the forecast.
    async fn observations(&self, station_id: &str, now: DateTime<Utc>) -> Result<(Observations, bool)> {
        match self.cache.get_observations(station_id, now).await {
            Ok(series) => Ok((observation::normalize(&series.value), series.degraded)),
            Err(e) if e.is_recoverable() => {
                warn!("No observations from station {}: {}", station_id, e);
                Ok((Observations::new(), true))
            }
            Err(e) => Err(e),
        }
    }
}
