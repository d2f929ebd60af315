//! Reshape the agency's daily forecast document into time buckets
//!
//! The agency publishes finer sub-day periods for the first days of the
//! horizon and coarser ones later on. Which bucket kinds exist for a day is
//! fixed by [`policy`]; payload periods are matched against that table and
//! never used to infer a granularity. A period the table expects but the
//! payload lacks simply yields no bucket.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Europe::Madrid;
use tracing::{debug, warn};

use crate::aemet::payload::{RawDay, RawForecastDocument, RawPeriodValue, RawRange};
use crate::models::weather::cardinal_to_degrees;
use crate::models::{BucketKind, ForecastBucket, Sensor, SkyCode, Value};

/// Last day offset the pipeline keeps
pub const MAX_DAY_OFFSET: u8 = 4;

/// Bucket kinds published for a day offset
#[must_use]
pub fn policy(day_offset: u8) -> &'static [BucketKind] {
    match day_offset {
        0 | 1 => &[BucketKind::Hour6, BucketKind::Day],
        2 | 3 => &[BucketKind::Hour12, BucketKind::Day],
        4 => &[BucketKind::Day],
        _ => &[],
    }
}

type BucketKey = (u8, DateTime<Utc>, BucketKind, Sensor);

/// Buckets of one forecast day, keyed in output order
struct DayBuckets<'a> {
    day_offset: u8,
    date: NaiveDate,
    kinds: &'static [BucketKind],
    out: &'a mut BTreeMap<BucketKey, (DateTime<Utc>, Value)>,
}

impl DayBuckets<'_> {
    /// Local hour `hour` of this day (24 meaning the next midnight) as UTC
    fn instant(&self, hour: u32) -> Option<DateTime<Utc>> {
        let naive = self.date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour));
        Madrid
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    }

    fn emit(&mut self, kind: BucketKind, start_hour: u32, sensor: Sensor, value: Value) {
        if !self.kinds.contains(&kind) {
            return;
        }
        let (Some(start), Some(end)) = (self.instant(start_hour), self.instant(start_hour + kind.hours())) else {
            warn!("Skipping {} bucket at {} {}h: not a local time", kind_name(kind), self.date, start_hour);
            return;
        };
        self.out
            .entry((self.day_offset, start, kind, sensor))
            .or_insert((end, value));
    }

    fn emit_period(&mut self, periodo: Option<&str>, sensor: Sensor, value: Value) {
        match parse_period(periodo) {
            Some((kind, start_hour)) => self.emit(kind, start_hour, sensor, value),
            None => debug!("Ignoring unknown period {:?} for {}", periodo, sensor),
        }
    }

    fn numbers(&mut self, values: &[RawPeriodValue], sensor: Sensor) {
        for entry in values {
            if let Some(value) = entry.value {
                self.emit_period(entry.periodo.as_deref(), sensor, Value::Number(value));
            }
        }
    }

    /// Daily extremes and the instantaneous points, each point standing for
    /// the 6-hour bucket that ends at its hour.
    fn range(&mut self, range: &RawRange, high: Sensor, low: Option<Sensor>) {
        if let Some(maxima) = range.maxima {
            self.emit(BucketKind::Day, 0, high, Value::Number(maxima));
        }
        if let (Some(low), Some(minima)) = (low, range.minima) {
            self.emit(BucketKind::Day, 0, low, Value::Number(minima));
        }
        for point in &range.dato {
            let (Some(value), Some(hour)) = (point.value, point.hora) else {
                continue;
            };
            match hour.checked_sub(BucketKind::Hour6.hours()) {
                Some(start) if BucketKind::Hour6.start_hours().contains(&start) => {
                    self.emit(BucketKind::Hour6, start, high, Value::Number(value));
                }
                _ => debug!("Ignoring {} point at hour {}", high, hour),
            }
        }
    }

    fn day(&mut self, day: &RawDay) {
        for sky in &day.estado_cielo {
            let periodo = sky.periodo.as_deref();
            if let Some(code) = &sky.value {
                self.emit_period(periodo, Sensor::Condition, Value::Sky(SkyCode(code.clone())));
            }
            if let Some(description) = &sky.descripcion {
                self.emit_period(periodo, Sensor::Description, Value::Text(description.clone()));
            }
        }

        self.numbers(&day.prob_precipitacion, Sensor::PrecipitationProbability);
        self.numbers(&day.racha_max, Sensor::WindGust);
        self.numbers(&day.cota_nieve_prov, Sensor::SnowLevel);

        for wind in &day.viento {
            let periodo = wind.periodo.as_deref();
            if let Some(bearing) = wind.direccion.as_deref().and_then(cardinal_to_degrees) {
                self.emit_period(periodo, Sensor::WindBearing, Value::Number(bearing));
            }
            if let Some(speed) = wind.velocidad {
                self.emit_period(periodo, Sensor::WindSpeed, Value::Number(speed));
            }
        }

        if let Some(temperature) = &day.temperatura {
            self.range(temperature, Sensor::Temperature, Some(Sensor::TempLow));
        }
        if let Some(sensation) = &day.sens_termica {
            self.range(sensation, Sensor::ThermalSensation, Some(Sensor::ThermalSensationLow));
        }
        if let Some(humidity) = &day.humedad_relativa {
            self.range(humidity, Sensor::Humidity, Some(Sensor::HumidityLow));
        }
        if let Some(uv) = day.uv_max {
            self.emit(BucketKind::Day, 0, Sensor::UvIndex, Value::Number(uv));
        }
    }
}

/// Kind and start hour of an agency period such as `"06-12"`.
/// A missing period means the whole day.
fn parse_period(periodo: Option<&str>) -> Option<(BucketKind, u32)> {
    let Some(periodo) = periodo else {
        return Some((BucketKind::Day, 0));
    };
    let (start, end) = periodo.split_once('-')?;
    let start: u32 = start.trim().parse().ok()?;
    let end: u32 = end.trim().parse().ok()?;
    let kind = match end.checked_sub(start)? {
        6 => BucketKind::Hour6,
        12 => BucketKind::Hour12,
        24 => BucketKind::Day,
        _ => return None,
    };
    kind.start_hours().contains(&start).then_some((kind, start))
}

fn kind_name(kind: BucketKind) -> &'static str {
    match kind {
        BucketKind::Hour6 => "6-hour",
        BucketKind::Hour12 => "12-hour",
        BucketKind::Day => "daily",
    }
}

fn parse_date(fecha: &str) -> Option<NaiveDate> {
    let date = fecha.get(..10).unwrap_or(fecha);
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Reshape a forecast document into buckets ordered by
/// `(day_offset, start, kind, sensor)`. Day offsets count calendar days from
/// the Europe/Madrid date of `now`; blocks dated before today are dropped.
#[must_use]
pub fn normalize(document: &RawForecastDocument, now: DateTime<Utc>) -> Vec<ForecastBucket> {
    let today = now.with_timezone(&Madrid).date_naive();
    let mut out = BTreeMap::new();

    for day in &document.prediccion.dia {
        let Some(date) = parse_date(&day.fecha) else {
            warn!("Skipping forecast day with unparseable date '{}'", day.fecha);
            continue;
        };
        let days_ahead = (date - today).num_days();
        if days_ahead < 0 {
            debug!("Skipping past forecast day {} (today is {})", date, today);
            continue;
        }
        let Some(day_offset) = u8::try_from(days_ahead).ok().filter(|offset| *offset <= MAX_DAY_OFFSET) else {
            continue;
        };

        DayBuckets {
            day_offset,
            date,
            kinds: policy(day_offset),
            out: &mut out,
        }
        .day(day);
    }

    debug!(
        "Normalized {} forecast days into {} buckets",
        document.prediccion.dia.len(),
        out.len()
    );
    out.into_iter()
        .map(|((day_offset, start, kind, sensor), (end, value))| ForecastBucket {
            day_offset,
            kind,
            start,
            end,
            sensor,
            value,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aemet::payload::parse_forecast;

    const DOCUMENT: &str = r#"[{
        "nombre": "Madrid", "provincia": "Madrid", "version": "1.0",
        "prediccion": {"dia": [
            {"fecha": "2024-05-01T00:00:00",
             "probPrecipitacion": [
                {"value": 10, "periodo": "00-24"},
                {"value": 5, "periodo": "00-12"},
                {"value": 0, "periodo": "00-06"},
                {"value": 15, "periodo": "06-12"},
                {"value": 20, "periodo": "12-18"},
                {"value": "", "periodo": "18-24"}],
             "estadoCielo": [
                {"value": "12", "periodo": "00-24", "descripcion": "Poco nuboso"},
                {"value": "11n", "periodo": "00-06"}],
             "viento": [
                {"direccion": "NO", "velocidad": 15, "periodo": "00-24"},
                {"direccion": "C", "velocidad": 0, "periodo": "00-06"}],
             "rachaMax": [{"value": "", "periodo": "00-24"}, {"value": "40", "periodo": "12-18"}],
             "temperatura": {"maxima": 24, "minima": 11,
                "dato": [{"value": 12, "hora": 6}, {"value": 21, "hora": 12},
                         {"value": 23, "hora": 18}, {"value": 16, "hora": 24}]},
             "humedadRelativa": {"maxima": 80, "minima": 35, "dato": [{"value": 75, "hora": 6}]},
             "sensTermica": {"maxima": 25, "minima": 9, "dato": [{"value": 20, "hora": 12}]},
             "cotaNieveProv": [{"value": "1800", "periodo": "00-24"}],
             "uvMax": 7},
            {"fecha": "2024-05-02T00:00:00",
             "probPrecipitacion": [{"value": 30, "periodo": "00-24"}]},
            {"fecha": "2024-05-03T00:00:00",
             "probPrecipitacion": [
                {"value": 40, "periodo": "00-24"},
                {"value": 45, "periodo": "00-12"},
                {"value": 35, "periodo": "12-24"},
                {"value": 99, "periodo": "00-06"}]},
            {"fecha": "2024-05-05T00:00:00",
             "probPrecipitacion": [{"value": 50}, {"value": 55, "periodo": "00-12"}],
             "temperatura": {"maxima": 27, "minima": 14}},
            {"fecha": "2024-05-06T00:00:00",
             "probPrecipitacion": [{"value": 60}]}
        ]}
    }]"#;

    fn buckets() -> Vec<ForecastBucket> {
        normalize(&parse_forecast(DOCUMENT).unwrap(), utc(1, 8))
    }

    fn utc(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_policy_table() {
        assert_eq!(policy(0), &[BucketKind::Hour6, BucketKind::Day]);
        assert_eq!(policy(1), &[BucketKind::Hour6, BucketKind::Day]);
        assert_eq!(policy(2), &[BucketKind::Hour12, BucketKind::Day]);
        assert_eq!(policy(3), &[BucketKind::Hour12, BucketKind::Day]);
        assert_eq!(policy(4), &[BucketKind::Day]);
        assert!(policy(5).is_empty());
    }

    #[test]
    fn test_kinds_follow_policy_not_payload() {
        for bucket in buckets() {
            assert!(
                policy(bucket.day_offset).contains(&bucket.kind),
                "{:?} bucket on day {}",
                bucket.kind,
                bucket.day_offset
            );
        }
    }

    #[test]
    fn test_day_offsets_count_calendar_days() {
        let offsets: Vec<u8> = buckets().iter().map(|b| b.day_offset).collect();
        assert!(offsets.contains(&0));
        assert!(offsets.contains(&1));
        assert!(offsets.contains(&2));
        // 2024-05-05 is four days after today, 05-06 is dropped
        assert!(offsets.contains(&4));
        assert!(!offsets.contains(&3));
        assert!(offsets.iter().all(|offset| *offset <= MAX_DAY_OFFSET));
    }

    #[test]
    fn test_local_periods_become_utc_intervals() {
        // Madrid is UTC+2 in May
        let buckets = buckets();
        let morning = buckets
            .iter()
            .find(|b| {
                b.day_offset == 0
                    && b.kind == BucketKind::Hour6
                    && b.sensor == Sensor::PrecipitationProbability
                    && b.value == Value::Number(15.0)
            })
            .unwrap();
        assert_eq!(morning.start, utc(1, 4));
        assert_eq!(morning.end, utc(1, 10));

        let whole_day = buckets
            .iter()
            .find(|b| {
                b.day_offset == 0 && b.kind == BucketKind::Day && b.sensor == Sensor::PrecipitationProbability
            })
            .unwrap();
        assert_eq!(whole_day.start, Utc.with_ymd_and_hms(2024, 4, 30, 22, 0, 0).unwrap());
        assert_eq!(whole_day.end, utc(1, 22));
        assert_eq!(whole_day.value, Value::Number(10.0));
    }

    #[test]
    fn test_missing_period_is_not_reinterpreted() {
        let buckets = buckets();
        // day 0 has no 18-24 probability and no 12-hour buckets at all
        let day0: Vec<&ForecastBucket> = buckets
            .iter()
            .filter(|b| b.day_offset == 0 && b.sensor == Sensor::PrecipitationProbability)
            .collect();
        assert_eq!(day0.len(), 4);
        assert!(day0.iter().all(|b| b.kind != BucketKind::Hour12));

        // day 1 publishes only the daily summary
        let day1: Vec<&ForecastBucket> = buckets.iter().filter(|b| b.day_offset == 1).collect();
        assert_eq!(day1.len(), 1);
        assert_eq!(day1[0].kind, BucketKind::Day);

        // day 2 drops the 6-hour period the table does not allow
        let day2: Vec<BucketKind> = buckets
            .iter()
            .filter(|b| b.day_offset == 2)
            .map(|b| b.kind)
            .collect();
        assert_eq!(day2, [BucketKind::Hour12, BucketKind::Day, BucketKind::Hour12]);
    }

    #[test]
    fn test_sensor_mapping() {
        let buckets = buckets();
        let find = |kind: BucketKind, sensor: Sensor, start: DateTime<Utc>| {
            buckets
                .iter()
                .find(|b| b.day_offset == 0 && b.kind == kind && b.sensor == sensor && b.start == start)
                .map(|b| b.value.clone())
        };
        let midnight = Utc.with_ymd_and_hms(2024, 4, 30, 22, 0, 0).unwrap();

        assert_eq!(find(BucketKind::Day, Sensor::Condition, midnight), Some(Value::Sky(SkyCode("12".into()))));
        assert_eq!(find(BucketKind::Hour6, Sensor::Condition, midnight), Some(Value::Sky(SkyCode("11n".into()))));
        assert_eq!(find(BucketKind::Day, Sensor::WindBearing, midnight), Some(Value::Number(315.0)));
        assert_eq!(find(BucketKind::Day, Sensor::WindSpeed, midnight), Some(Value::Number(15.0)));
        // calm has no bearing
        assert_eq!(find(BucketKind::Hour6, Sensor::WindBearing, midnight), None);
        assert_eq!(find(BucketKind::Hour6, Sensor::WindSpeed, midnight), Some(Value::Number(0.0)));
        assert_eq!(find(BucketKind::Day, Sensor::WindGust, midnight), None);
        assert_eq!(find(BucketKind::Hour6, Sensor::WindGust, utc(1, 10)), Some(Value::Number(40.0)));
        assert_eq!(find(BucketKind::Day, Sensor::Temperature, midnight), Some(Value::Number(24.0)));
        assert_eq!(find(BucketKind::Day, Sensor::TempLow, midnight), Some(Value::Number(11.0)));
        assert_eq!(find(BucketKind::Day, Sensor::Humidity, midnight), Some(Value::Number(80.0)));
        // hourly points stand for the 6-hour bucket ending at their hour
        assert_eq!(find(BucketKind::Hour6, Sensor::Temperature, midnight), Some(Value::Number(12.0)));
        assert_eq!(find(BucketKind::Hour6, Sensor::Temperature, utc(1, 16)), Some(Value::Number(16.0)));
        assert_eq!(find(BucketKind::Hour6, Sensor::Humidity, midnight), Some(Value::Number(75.0)));
    }

    #[test]
    fn test_secondary_daily_fields() {
        let buckets = buckets();
        let find = |kind: BucketKind, sensor: Sensor, start: DateTime<Utc>| {
            buckets
                .iter()
                .find(|b| b.day_offset == 0 && b.kind == kind && b.sensor == sensor && b.start == start)
                .map(|b| b.value.clone())
        };
        let midnight = Utc.with_ymd_and_hms(2024, 4, 30, 22, 0, 0).unwrap();

        assert_eq!(
            find(BucketKind::Day, Sensor::Description, midnight),
            Some(Value::Text("Poco nuboso".into()))
        );
        assert_eq!(find(BucketKind::Hour6, Sensor::Description, midnight), None);
        assert_eq!(find(BucketKind::Day, Sensor::HumidityLow, midnight), Some(Value::Number(35.0)));
        assert_eq!(find(BucketKind::Day, Sensor::ThermalSensation, midnight), Some(Value::Number(25.0)));
        assert_eq!(find(BucketKind::Day, Sensor::ThermalSensationLow, midnight), Some(Value::Number(9.0)));
        assert_eq!(find(BucketKind::Hour6, Sensor::ThermalSensation, utc(1, 4)), Some(Value::Number(20.0)));
        assert_eq!(find(BucketKind::Day, Sensor::UvIndex, midnight), Some(Value::Number(7.0)));
        assert_eq!(find(BucketKind::Day, Sensor::SnowLevel, midnight), Some(Value::Number(1800.0)));
    }

    #[test]
    fn test_document_from_yesterday_is_shifted_to_today() {
        // after local midnight, before the agency republishes
        let now = utc(2, 8);
        let buckets = normalize(&parse_forecast(DOCUMENT).unwrap(), now);

        let today = Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 0).unwrap();
        assert!(buckets.iter().all(|b| b.start >= today), "past day leaked");

        let covering: Vec<(u8, BucketKind)> = buckets
            .iter()
            .filter(|b| b.contains(now))
            .map(|b| (b.day_offset, b.kind))
            .collect();
        assert_eq!(covering, [(0, BucketKind::Day)]);

        // 05-05 is now three days ahead and 05-06 enters the horizon
        let offsets: Vec<u8> = buckets.iter().map(|b| b.day_offset).collect();
        assert!(offsets.contains(&3));
        assert!(offsets.contains(&4));
        assert_eq!(offsets.iter().filter(|offset| **offset == 4).count(), 1);
    }

    #[test]
    fn test_stale_document_yields_nothing() {
        let buckets = normalize(&parse_forecast(DOCUMENT).unwrap(), utc(20, 8));
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_output_is_ordered() {
        let buckets = buckets();
        let keys: Vec<_> = buckets.iter().map(|b| (b.day_offset, b.start, b.kind, b.sensor)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_dst_day_has_local_length() {
        let document = r#"[{"prediccion": {"dia": [
            {"fecha": "2024-03-31T00:00:00", "probPrecipitacion": [{"value": 5, "periodo": "00-24"}]}
        ]}}]"#;
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 10, 0, 0).unwrap();
        let buckets = normalize(&parse_forecast(document).unwrap(), now);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].end - buckets[0].start, Duration::hours(23));
    }
}
