//! Location model for catalog entries and query points

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point on the earth's surface in decimal degrees
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
}

impl GeoPoint {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in kilometres
    #[must_use]
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine::distance(
            haversine::Location {
                latitude: self.latitude,
                longitude: self.longitude,
            },
            haversine::Location {
                latitude: other.latitude,
                longitude: other.longitude,
            },
            haversine::Units::Kilometers,
        )
    }

    /// Position on the unit sphere. Euclidean distance between these points
    /// grows monotonically with great-circle distance.
    #[must_use]
    pub fn to_unit_sphere(&self) -> [f64; 3] {
        let lat = self.latitude.to_radians();
        let lon = self.longitude.to_radians();
        [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
    }

    /// Format location as coordinates string
    #[must_use]
    pub fn format_coordinates(&self) -> String {
        format!("{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// Which agency catalog a location belongs to
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    /// Automatic weather station reporting observations
    Station,
    /// Municipality used as the forecast target
    Municipality,
}

impl LocationKind {
    /// Key fragment used for cache entries
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Station => "station",
            LocationKind::Municipality => "municipality",
        }
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A station or municipality known to the agency
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LocationEntry {
    /// Agency-assigned code (station `idema`, municipality INE code)
    pub id: String,
    pub kind: LocationKind,
    pub point: GeoPoint,
    pub name: String,
    /// Altitude in metres, when the catalog provides it
    pub elevation: Option<f64>,
}

impl LocationEntry {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: LocationKind, point: GeoPoint, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            point,
            name: name.into(),
            elevation: None,
        }
    }
}
