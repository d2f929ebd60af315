//! Raw AEMET payload shapes and catalog parsing
//!
//! AEMET serves numbers both as JSON numbers and as strings (sometimes with a
//! decimal comma), and uses empty strings for missing values. Every numeric
//! field here goes through [`lenient_f64`] so that both spellings decode and
//! anything else becomes absent.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Europe::Madrid;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::models::{GeoPoint, LocationEntry, LocationKind};
use crate::{Result, WeatherError};

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }))
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

/// First-stage response of a staged endpoint
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub estado: Option<u16>,
    pub descripcion: Option<String>,
    pub datos: Option<String>,
}

impl Envelope {
    /// URL of the actual payload, or the error the agency reported
    pub fn into_data_url(self) -> Result<String> {
        let description = self
            .descripcion
            .unwrap_or_else(|| "No description provided".to_string());
        match self.estado {
            Some(200) => self
                .datos
                .ok_or_else(|| WeatherError::upstream("Envelope without data URL")),
            Some(401) => Err(WeatherError::InvalidApiKey {
                message: description,
            }),
            Some(404) => Err(WeatherError::upstream(format!("Not found: {description}"))),
            Some(429) => Err(WeatherError::upstream(format!("Too many requests: {description}"))),
            Some(status) => Err(WeatherError::upstream(format!("Error {status}: {description}"))),
            None => Err(WeatherError::upstream("Envelope without status")),
        }
    }
}

/// One row of a station series; the station catalog is built from the same rows
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawObservation {
    pub idema: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ubi: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lon: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub alt: Option<f64>,
    /// End of the observation interval, UTC without zone suffix
    #[serde(default, deserialize_with = "lenient_string")]
    pub fint: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub prec: Option<f64>,
    /// Mean wind speed in m/s
    #[serde(default, deserialize_with = "lenient_f64")]
    pub vv: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub dv: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub pres: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub hr: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub tamin: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub ta: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub tpr: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub vis: Option<f64>,
    /// Snow layer thickness in cm
    #[serde(default, deserialize_with = "lenient_f64")]
    pub nieve: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMunicipality {
    id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    nombre: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    latitud_dec: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitud_dec: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    altitud: Option<f64>,
}

/// Forecast document of one municipality
#[derive(Debug, Clone, Deserialize)]
pub struct RawForecastDocument {
    #[serde(default, deserialize_with = "lenient_string")]
    pub nombre: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub provincia: Option<String>,
    /// Issue time, local without zone suffix
    #[serde(default, deserialize_with = "lenient_string")]
    pub elaborado: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub version: Option<String>,
    pub prediccion: RawPrediction,
}

impl RawForecastDocument {
    /// Issue time as UTC, if `elaborado` is present and a valid local time
    #[must_use]
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(self.elaborado.as_deref()?, "%Y-%m-%dT%H:%M:%S").ok()?;
        naive
            .and_local_timezone(Madrid)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPrediction {
    #[serde(default)]
    pub dia: Vec<RawDay>,
}

/// One calendar day of the forecast
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDay {
    /// Local date, e.g. `2024-05-01T00:00:00`
    pub fecha: String,
    #[serde(default)]
    pub prob_precipitacion: Vec<RawPeriodValue>,
    #[serde(default)]
    pub estado_cielo: Vec<RawSky>,
    #[serde(default)]
    pub viento: Vec<RawWind>,
    #[serde(default)]
    pub racha_max: Vec<RawPeriodValue>,
    /// Snow level in m
    #[serde(default)]
    pub cota_nieve_prov: Vec<RawPeriodValue>,
    pub temperatura: Option<RawRange>,
    pub sens_termica: Option<RawRange>,
    pub humedad_relativa: Option<RawRange>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub uv_max: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPeriodValue {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub periodo: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSky {
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub periodo: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub descripcion: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawWind {
    #[serde(default, deserialize_with = "lenient_string")]
    pub direccion: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub velocidad: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub periodo: Option<String>,
}

/// Daily extremes plus instantaneous points at given local hours
#[derive(Debug, Clone, Deserialize)]
pub struct RawRange {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub maxima: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub minima: Option<f64>,
    #[serde(default)]
    pub dato: Vec<RawHourPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHourPoint {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
    pub hora: Option<u32>,
}

fn malformed(what: &str, err: serde_json::Error) -> WeatherError {
    WeatherError::upstream(format!("Malformed {what} payload: {err}"))
}

/// Parse a station observation series
pub fn parse_observations(body: &str) -> Result<Vec<RawObservation>> {
    serde_json::from_str(body).map_err(|e| malformed("observation", e))
}

/// Parse a forecast document. AEMET wraps it in a one-element array.
pub fn parse_forecast(body: &str) -> Result<RawForecastDocument> {
    let documents: Vec<RawForecastDocument> = serde_json::from_str(body).map_err(|e| malformed("forecast", e))?;
    let document = documents
        .into_iter()
        .next()
        .ok_or_else(|| WeatherError::upstream("Empty forecast payload"))?;
    if document.version.as_deref().is_some_and(|v| v != "1.0") {
        warn!("Forecast schema version {:?} is not known, parsing anyway", document.version);
    }
    Ok(document)
}

/// Parse a catalog listing into entries of `kind`, in catalog order
pub fn parse_catalog(kind: LocationKind, body: &str) -> Result<Vec<LocationEntry>> {
    let entries = match kind {
        LocationKind::Station => parse_stations(body)?,
        LocationKind::Municipality => parse_municipalities(body)?,
    };
    debug!("Parsed {} {} catalog entries", entries.len(), kind);
    if entries.is_empty() {
        return Err(WeatherError::EmptyCatalog { kind });
    }
    Ok(entries)
}

fn parse_stations(body: &str) -> Result<Vec<LocationEntry>> {
    let rows: Vec<RawObservation> = serde_json::from_str(body).map_err(|e| malformed("station catalog", e))?;
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    // the listing holds one row per recent observation; keep the first per station
    for row in rows {
        if !seen.insert(row.idema.clone()) {
            continue;
        }
        let (Some(lat), Some(lon)) = (row.lat, row.lon) else {
            debug!("Skipping station {} without coordinates", row.idema);
            continue;
        };
        let name = row.ubi.clone().unwrap_or_else(|| row.idema.clone());
        let mut entry = LocationEntry::new(row.idema, LocationKind::Station, GeoPoint::new(lat, lon), name);
        entry.elevation = row.alt;
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_municipalities(body: &str) -> Result<Vec<LocationEntry>> {
    let rows: Vec<RawMunicipality> =
        serde_json::from_str(body).map_err(|e| malformed("municipality catalog", e))?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id.strip_prefix("id").unwrap_or(&row.id).to_string();
            let (Some(lat), Some(lon)) = (row.latitud_dec, row.longitud_dec) else {
                debug!("Skipping municipality {} without coordinates", id);
                return None;
            };
            let name = row.nombre.unwrap_or_else(|| id.clone());
            let mut entry = LocationEntry::new(id, LocationKind::Municipality, GeoPoint::new(lat, lon), name);
            entry.elevation = row.altitud;
            Some(entry)
        })
        .collect())
}
