//! Select the forecast records exposed to the host

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use chrono_tz::Europe::Madrid;

use crate::forecast::MAX_DAY_OFFSET;
use crate::models::{BucketKind, DailyForecastRecord, ForecastBucket, ForecastMode, ForecastSlot};

/// Kind exposed for a day: today's 6-hour buckets in hourly mode when there
/// are any, the daily summary otherwise
fn exposed_kind(day_offset: u8, mode: ForecastMode, buckets: &[&ForecastBucket]) -> BucketKind {
    if day_offset == 0
        && mode == ForecastMode::Hourly
        && buckets.iter().any(|bucket| bucket.kind == BucketKind::Hour6)
    {
        BucketKind::Hour6
    } else {
        BucketKind::Day
    }
}

/// Record of one present day. A day without buckets of its exposed kind
/// keeps its record with no slots.
fn record(day_offset: u8, mode: ForecastMode, buckets: &[&ForecastBucket]) -> Option<DailyForecastRecord> {
    let kind = exposed_kind(day_offset, mode, buckets);
    let day_start = buckets.iter().map(|bucket| bucket.start).min()?;

    let mut slots: BTreeMap<DateTime<Utc>, ForecastSlot> = BTreeMap::new();
    for bucket in buckets.iter().filter(|bucket| bucket.kind == kind) {
        slots
            .entry(bucket.start)
            .or_insert_with(|| ForecastSlot {
                start: bucket.start,
                end: bucket.end,
                values: BTreeMap::new(),
            })
            .values
            .entry(bucket.sensor)
            .or_insert_with(|| bucket.value.clone());
    }

    Some(DailyForecastRecord {
        day_offset,
        kind,
        date: day_start.with_timezone(&Madrid).date_naive(),
        slots: slots.into_values().collect(),
    })
}

/// One record per day offset present in `forecast`, ordered by day offset
#[must_use]
pub fn aggregate(forecast: &[ForecastBucket], mode: ForecastMode) -> Vec<DailyForecastRecord> {
    let mut days: BTreeMap<u8, Vec<&ForecastBucket>> = BTreeMap::new();
    for bucket in forecast.iter().filter(|bucket| bucket.day_offset <= MAX_DAY_OFFSET) {
        days.entry(bucket.day_offset).or_default().push(bucket);
    }

    days.into_iter()
        .filter_map(|(day_offset, buckets)| record(day_offset, mode, &buckets))
        .collect()
}
