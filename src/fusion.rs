//! Current conditions from observations with forecast fallback

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{CurrentConditions, ForecastBucket, FusedReading, Provenance, Sensor, Value};
use crate::observation::Observations;

/// Today's finest bucket for `sensor` whose interval contains `now`
fn covering_bucket(forecast: &[ForecastBucket], sensor: Sensor, now: DateTime<Utc>) -> Option<&ForecastBucket> {
    forecast
        .iter()
        .filter(|bucket| bucket.day_offset == 0 && bucket.sensor == sensor && bucket.contains(now))
        .min_by_key(|bucket| bucket.kind)
}

/// Fuse observations and forecast into the conditions at `now`.
///
/// Per sensor: the observed value if the station reported one, otherwise the
/// value of the covering forecast bucket, otherwise nothing.
#[must_use]
pub fn fuse(observations: &Observations, forecast: &[ForecastBucket], now: DateTime<Utc>) -> CurrentConditions {
    let mut readings = BTreeMap::new();

    for sensor in Sensor::ALL {
        let reading = if let Some(sample) = observations.get(&sensor) {
            FusedReading {
                value: Value::Number(sample.value),
                provenance: Provenance::Observed,
                source_time: sample.timestamp,
            }
        } else if let Some(bucket) = covering_bucket(forecast, sensor, now) {
            FusedReading {
                value: bucket.value.clone(),
                provenance: Provenance::ForecastFallback,
                source_time: bucket.start,
            }
        } else {
            continue;
        };
        readings.insert(sensor, reading);
    }

    debug!(
        "Fused {} sensors ({} observed)",
        readings.len(),
        readings
            .values()
            .filter(|reading| reading.provenance == Provenance::Observed)
            .count()
    );
    CurrentConditions {
        timestamp: now,
        readings,
    }
}
