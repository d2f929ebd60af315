//! AEMET OpenData access
//!
//! The [`Upstream`] trait is the seam between the pipeline and the network:
//! [`AemetClient`] talks to the real service, tests plug in canned payloads.

pub mod client;
pub mod payload;

use std::fmt;

use async_trait::async_trait;

use crate::Result;
use crate::models::LocationKind;

pub use client::{API_BASE_URL, ATTRIBUTION, AemetClient};

/// Something the agency serves
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Master list of stations or municipalities
    Catalog(LocationKind),
    /// Recent observation series of one station
    Observations(String),
    /// Daily forecast document of one municipality
    Forecast(String),
}

impl Resource {
    /// Endpoint path below the API base URL
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Resource::Catalog(LocationKind::Station) => "/observacion/convencional/todas".to_string(),
            Resource::Catalog(LocationKind::Municipality) => "/maestro/municipios".to_string(),
            Resource::Observations(id) => format!(
                "/observacion/convencional/datos/estacion/{}",
                urlencoding::encode(id)
            ),
            Resource::Forecast(id) => format!(
                "/prediccion/especifica/municipio/diaria/{}",
                urlencoding::encode(id)
            ),
        }
    }

    /// Whether the endpoint answers with an envelope pointing at the data.
    /// The municipality master list is served directly.
    #[must_use]
    pub fn is_staged(&self) -> bool {
        !matches!(self, Resource::Catalog(LocationKind::Municipality))
    }

    /// Key under which the raw payload is persisted
    #[must_use]
    pub fn cache_key(&self) -> String {
        match self {
            Resource::Catalog(kind) => format!("catalog/{kind}"),
            Resource::Observations(id) => format!("observations/{id}"),
            Resource::Forecast(id) => format!("forecast/{id}"),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// Source of raw agency payloads
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch the full body of `resource`
    async fn fetch(&self, resource: &Resource) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Resource::Catalog(LocationKind::Station), "/observacion/convencional/todas", true)]
    #[case(Resource::Catalog(LocationKind::Municipality), "/maestro/municipios", false)]
    #[case(
        Resource::Observations("3195".into()),
        "/observacion/convencional/datos/estacion/3195",
        true
    )]
    #[case(
        Resource::Forecast("28079".into()),
        "/prediccion/especifica/municipio/diaria/28079",
        true
    )]
    fn test_resource_endpoints(#[case] resource: Resource, #[case] path: &str, #[case] staged: bool) {
        assert_eq!(resource.path(), path);
        assert_eq!(resource.is_staged(), staged);
    }

    #[test]
    fn test_cache_keys_are_distinct() {
        let keys = [
            Resource::Catalog(LocationKind::Station).cache_key(),
            Resource::Catalog(LocationKind::Municipality).cache_key(),
            Resource::Observations("28079".into()).cache_key(),
            Resource::Forecast("28079".into()).cache_key(),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_station_codes_are_escaped() {
        let resource = Resource::Observations("B 228".into());
        assert!(resource.path().ends_with("/B%20228"));
    }
}
