//! Latest per-sensor readings from a station series

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use crate::aemet::payload::RawObservation;
use crate::models::weather::ms_to_kmh;
use crate::models::{ObservationSample, Sensor};

/// Latest sample per sensor. Sensors the station never reported are absent.
pub type Observations = BTreeMap<Sensor, ObservationSample>;

/// Parse an observation instant. AEMET stamps observations in UTC, usually
/// without a zone suffix.
fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }
    if let Ok(instant) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(instant.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn readings(row: &RawObservation) -> [(Sensor, Option<f64>); 10] {
    [
        (Sensor::Precipitation, row.prec),
        (Sensor::WindSpeed, row.vv.map(ms_to_kmh)),
        (Sensor::WindBearing, row.dv),
        (Sensor::Pressure, row.pres),
        (Sensor::Humidity, row.hr),
        (Sensor::TempLow, row.tamin),
        (Sensor::Temperature, row.ta),
        (Sensor::DewPoint, row.tpr),
        (Sensor::Visibility, row.vis),
        (Sensor::Snow, row.nieve),
    ]
}

/// Reduce a station series to the most recent value of every sensor
#[must_use]
pub fn normalize(series: &[RawObservation]) -> Observations {
    let mut timed: Vec<(DateTime<Utc>, &RawObservation)> = series
        .iter()
        .filter_map(|row| {
            let Some(raw) = row.fint.as_deref() else {
                warn!("Skipping {} sample without timestamp", row.idema);
                return None;
            };
            match parse_instant(raw) {
                Some(instant) => Some((instant, row)),
                None => {
                    warn!("Skipping {} sample with unparseable timestamp '{}'", row.idema, raw);
                    None
                }
            }
        })
        .collect();
    // stable: equal timestamps keep payload order, so the later row wins below
    timed.sort_by_key(|(instant, _)| *instant);

    let mut latest = Observations::new();
    for (timestamp, row) in timed {
        for (sensor, value) in readings(row) {
            if let Some(value) = value {
                latest.insert(
                    sensor,
                    ObservationSample {
                        timestamp,
                        sensor,
                        value,
                    },
                );
            }
        }
    }

    debug!("Normalized {} samples into {} sensors", series.len(), latest.len());
    latest
}
