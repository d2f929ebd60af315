//! Sensor readings, sky codes and the current-conditions record

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Every quantity the pipeline knows how to carry
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Sensor {
    /// Precipitation in mm
    Precipitation,
    /// Wind speed in km/h
    WindSpeed,
    /// Wind bearing in degrees (0 = North)
    WindBearing,
    /// Pressure in hPa
    Pressure,
    /// Relative humidity in %
    Humidity,
    /// Minimum temperature in Celsius
    TempLow,
    /// Temperature in Celsius
    Temperature,
    /// Dew point in Celsius
    DewPoint,
    /// Visibility in km
    Visibility,
    /// Sky state code
    Condition,
    /// Probability of precipitation in %
    PrecipitationProbability,
    /// Maximum gust in km/h
    WindGust,
    /// Snow layer thickness in cm
    Snow,
    /// Minimum relative humidity in %
    HumidityLow,
    /// Apparent temperature in Celsius
    ThermalSensation,
    /// Minimum apparent temperature in Celsius
    ThermalSensationLow,
    /// Maximum UV index
    UvIndex,
    /// Snow level in m
    SnowLevel,
    /// Sky state in words, e.g. "Poco nuboso"
    Description,
}

impl Sensor {
    /// Sensors a station may report
    pub const OBSERVED: [Sensor; 10] = [
        Sensor::Precipitation,
        Sensor::WindSpeed,
        Sensor::WindBearing,
        Sensor::Pressure,
        Sensor::Humidity,
        Sensor::TempLow,
        Sensor::Temperature,
        Sensor::DewPoint,
        Sensor::Visibility,
        Sensor::Snow,
    ];

    /// The fixed sensor set of a current-conditions record
    pub const ALL: [Sensor; 19] = [
        Sensor::Precipitation,
        Sensor::WindSpeed,
        Sensor::WindBearing,
        Sensor::Pressure,
        Sensor::Humidity,
        Sensor::TempLow,
        Sensor::Temperature,
        Sensor::DewPoint,
        Sensor::Visibility,
        Sensor::Condition,
        Sensor::PrecipitationProbability,
        Sensor::WindGust,
        Sensor::Snow,
        Sensor::HumidityLow,
        Sensor::ThermalSensation,
        Sensor::ThermalSensationLow,
        Sensor::UvIndex,
        Sensor::SnowLevel,
        Sensor::Description,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensor::Precipitation => "precipitation",
            Sensor::WindSpeed => "wind_speed",
            Sensor::WindBearing => "wind_bearing",
            Sensor::Pressure => "pressure",
            Sensor::Humidity => "humidity",
            Sensor::TempLow => "templow",
            Sensor::Temperature => "temperature",
            Sensor::DewPoint => "dew_point",
            Sensor::Visibility => "visibility",
            Sensor::Condition => "condition",
            Sensor::PrecipitationProbability => "precipitation_probability",
            Sensor::WindGust => "wind_gust",
            Sensor::Snow => "snow",
            Sensor::HumidityLow => "humidity_low",
            Sensor::ThermalSensation => "thermal_sensation",
            Sensor::ThermalSensationLow => "thermal_sensation_low",
            Sensor::UvIndex => "uv_index",
            Sensor::SnowLevel => "snow_level",
            Sensor::Description => "description",
        }
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque AEMET sky state code, e.g. `"12"` or `"11n"`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SkyCode(pub String);

impl SkyCode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `raw` has the shape of a sky code: digits with an optional `n`
    fn is_code(raw: &str) -> bool {
        let digits = raw.strip_suffix('n').unwrap_or(raw);
        !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
    }

    /// Generic weather condition for this sky code.
    ///
    /// Night variants carry an `n` suffix; codes without an explicit night
    /// mapping fall back to their day code.
    #[must_use]
    pub fn condition(&self) -> Option<WeatherCondition> {
        let code = self.0.trim();
        match code {
            "11n" => Some(WeatherCondition::ClearNight),
            _ => {
                let day = code.strip_suffix('n').unwrap_or(code);
                WeatherCondition::from_day_code(day)
            }
        }
    }
}

/// Condition vocabulary of a generic home-automation weather entity
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WeatherCondition {
    Sunny,
    ClearNight,
    #[serde(rename = "partlycloudy")]
    PartlyCloudy,
    Cloudy,
    Rainy,
    Pouring,
    Snowy,
    Lightning,
    LightningRainy,
    Fog,
    Calima,
}

impl WeatherCondition {
    fn from_day_code(code: &str) -> Option<Self> {
        let condition = match code {
            "11" => WeatherCondition::Sunny,
            "12" | "13" | "43" | "44" | "71" => WeatherCondition::PartlyCloudy,
            "14" | "15" | "16" | "17" | "45" | "46" => WeatherCondition::Cloudy,
            "23" | "24" | "25" | "26" => WeatherCondition::Rainy,
            "27" => WeatherCondition::Pouring,
            "33" | "34" | "35" | "36" | "72" | "73" | "74" => WeatherCondition::Snowy,
            "51" | "52" | "53" | "54" => WeatherCondition::Lightning,
            "61" | "62" | "63" | "64" => WeatherCondition::LightningRainy,
            "81" | "82" => WeatherCondition::Fog,
            "83" => WeatherCondition::Calima,
            _ => return None,
        };
        Some(condition)
    }
}

/// A sensor value: numeric, a sky code for [`Sensor::Condition`], or free
/// text for [`Sensor::Description`]
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Sky(SkyCode),
    Text(String),
}

// strings are told apart by shape since both serialize as plain JSON strings
impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Value::Number(n),
            Raw::Text(text) if SkyCode::is_code(&text) => Value::Sky(SkyCode(text)),
            Raw::Text(text) => Value::Text(text),
        })
    }
}

impl Value {
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Sky(_) | Value::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_sky(&self) -> Option<&SkyCode> {
        match self {
            Value::Sky(code) => Some(code),
            Value::Number(_) | Value::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            Value::Number(_) | Value::Sky(_) => None,
        }
    }
}

/// The latest instantaneous reading of one sensor at a station
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ObservationSample {
    pub timestamp: DateTime<Utc>,
    pub sensor: Sensor,
    pub value: f64,
}

/// Where a current-conditions value came from
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Observed,
    ForecastFallback,
}

/// One fused sensor value with its origin
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FusedReading {
    pub value: Value,
    pub provenance: Provenance,
    /// Observation time, or the start of the forecast bucket used
    pub source_time: DateTime<Utc>,
}

/// Current conditions at the configured location
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CurrentConditions {
    /// Instant the record was fused for
    pub timestamp: DateTime<Utc>,
    /// Present sensors only; a missing key means the sensor is absent
    pub readings: BTreeMap<Sensor, FusedReading>,
}

impl CurrentConditions {
    #[must_use]
    pub fn get(&self, sensor: Sensor) -> Option<&FusedReading> {
        self.readings.get(&sensor)
    }

    #[must_use]
    pub fn number(&self, sensor: Sensor) -> Option<f64> {
        self.get(sensor).and_then(|reading| reading.value.as_number())
    }

    #[must_use]
    pub fn provenance(&self, sensor: Sensor) -> Option<Provenance> {
        self.get(sensor).map(|reading| reading.provenance)
    }

    /// Generic condition derived from the fused sky code
    #[must_use]
    pub fn condition(&self) -> Option<WeatherCondition> {
        self.get(Sensor::Condition)
            .and_then(|reading| reading.value.as_sky())
            .and_then(SkyCode::condition)
    }
}

/// Convert a cardinal wind direction to degrees. Calm (`C`) has no bearing.
#[must_use]
pub fn cardinal_to_degrees(direction: &str) -> Option<f64> {
    let degrees = match direction.trim() {
        "N" => 0.0,
        "NNE" => 22.5,
        "NE" => 45.0,
        "ENE" => 67.5,
        "E" => 90.0,
        "ESE" => 112.5,
        "SE" => 135.0,
        "SSE" => 157.5,
        "S" => 180.0,
        "SSO" | "SSW" => 202.5,
        "SO" | "SW" => 225.0,
        "OSO" | "WSW" => 247.5,
        "O" | "W" => 270.0,
        "ONO" | "WNW" => 292.5,
        "NO" | "NW" => 315.0,
        "NNO" | "NNW" => 337.5,
        _ => return None,
    };
    Some(degrees)
}

/// Convert m/s to km/h
#[must_use]
pub fn ms_to_kmh(speed: f64) -> f64 {
    speed * 3.6
}
