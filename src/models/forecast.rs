//! Forecast buckets and the exposed daily records

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Sensor, Value};

/// Interval length of a forecast bucket. Ordered finest first.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    Hour6,
    Hour12,
    Day,
}

impl BucketKind {
    /// Interval length in hours
    #[must_use]
    pub fn hours(&self) -> u32 {
        match self {
            BucketKind::Hour6 => 6,
            BucketKind::Hour12 => 12,
            BucketKind::Day => 24,
        }
    }

    /// Local start hours of every bucket of this kind within one day
    #[must_use]
    pub fn start_hours(&self) -> &'static [u32] {
        match self {
            BucketKind::Hour6 => &[0, 6, 12, 18],
            BucketKind::Hour12 => &[0, 12],
            BucketKind::Day => &[0],
        }
    }
}

/// One forecast value for one sensor over a half-open interval `[start, end)`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ForecastBucket {
    /// Days ahead of the forecast's first day (0 = today)
    pub day_offset: u8,
    pub kind: BucketKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sensor: Sensor,
    pub value: Value,
}

impl ForecastBucket {
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// How the forecast list is exposed to the host
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForecastMode {
    /// Today at 6-hour resolution, later days as daily summaries
    Hourly,
    /// Daily summaries only
    #[default]
    Daily,
}

impl fmt::Display for ForecastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastMode::Hourly => f.write_str("hourly"),
            ForecastMode::Daily => f.write_str("daily"),
        }
    }
}

impl FromStr for ForecastMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(ForecastMode::Hourly),
            "daily" => Ok(ForecastMode::Daily),
            other => Err(format!("Invalid forecast mode '{other}'. Must be one of: hourly, daily")),
        }
    }
}

/// Values of every sensor for one exposed interval
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ForecastSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub values: BTreeMap<Sensor, Value>,
}

impl ForecastSlot {
    #[must_use]
    pub fn number(&self, sensor: Sensor) -> Option<f64> {
        self.values.get(&sensor).and_then(Value::as_number)
    }
}

/// The forecast exposed for one day
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DailyForecastRecord {
    pub day_offset: u8,
    /// Kind of the buckets actually exposed in `slots`
    pub kind: BucketKind,
    /// Local calendar date of the day
    pub date: NaiveDate,
    /// One slot for a daily record, one per 6-hour interval for an intra-day record
    pub slots: Vec<ForecastSlot>,
}
