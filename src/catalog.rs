//! Time-bounded cache of agency catalogs and per-location payloads
//!
//! Every resource is persisted as the raw body the agency served, stamped
//! with the instant it was fetched. A body is parsed before it is persisted,
//! so the store only ever holds copies that were readable at write time.
//! When a refresh fails with a recoverable error the last persisted copy is
//! served and the result is flagged as degraded.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::aemet::payload::{self, RawForecastDocument, RawObservation};
use crate::aemet::{Resource, Upstream};
use crate::cache::{CacheStore, StoredBlob};
use crate::geo_index::{GeoIndex, SearchStrategy};
use crate::models::LocationKind;
use crate::Result;

/// Default catalog freshness window
pub const CATALOG_TTL_DAYS: i64 = 7;

/// Default observation and forecast freshness window
pub const PAYLOAD_TTL_MINUTES: i64 = 10;

/// A value together with where it came from
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    /// When the underlying payload was fetched from the agency
    pub refreshed_at: DateTime<Utc>,
    /// Served from a persisted copy after a failed refresh
    pub degraded: bool,
}

impl<T> Fetched<T> {
    fn stale(self) -> Self {
        Self {
            degraded: true,
            ..self
        }
    }
}

type IndexSlot = RwLock<Option<Fetched<Arc<GeoIndex>>>>;

/// Catalog and payload cache in front of an [`Upstream`]
pub struct CatalogCache {
    upstream: Arc<dyn Upstream>,
    store: Arc<dyn CacheStore>,
    strategy: SearchStrategy,
    catalog_ttl: Duration,
    payload_ttl: Duration,
    stations: IndexSlot,
    municipalities: IndexSlot,
}

impl CatalogCache {
    #[must_use]
    pub fn new(upstream: Arc<dyn Upstream>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            upstream,
            store,
            strategy: SearchStrategy::default(),
            catalog_ttl: Duration::days(CATALOG_TTL_DAYS),
            payload_ttl: Duration::minutes(PAYLOAD_TTL_MINUTES),
            stations: RwLock::new(None),
            municipalities: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_ttls(mut self, catalog_ttl: Duration, payload_ttl: Duration) -> Self {
        self.catalog_ttl = catalog_ttl;
        self.payload_ttl = payload_ttl;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn slot(&self, kind: LocationKind) -> &IndexSlot {
        match kind {
            LocationKind::Station => &self.stations,
            LocationKind::Municipality => &self.municipalities,
        }
    }

    /// Geo index over the catalog of `kind`
    pub async fn get_catalog(&self, kind: LocationKind, now: DateTime<Utc>) -> Result<Fetched<Arc<GeoIndex>>> {
        let slot = self.slot(kind);
        let known = slot.read().await.clone();

        if let Some(known) = &known
            && is_fresh(known.refreshed_at, self.catalog_ttl, now)
        {
            return Ok(known.clone());
        }

        let strategy = self.strategy;
        let fetched = self
            .load(&Resource::Catalog(kind), self.catalog_ttl, now, known.as_ref(), |body| {
                let entries = payload::parse_catalog(kind, body)?;
                GeoIndex::build(kind, entries, strategy).map(Arc::new)
            })
            .await?;

        if known.as_ref().map(|k| k.refreshed_at) != Some(fetched.refreshed_at) {
            info!(
                "Committed {} index with {} entries from {}",
                kind,
                fetched.value.len(),
                fetched.refreshed_at
            );
            *slot.write().await = Some(Fetched {
                degraded: false,
                ..fetched.clone()
            });
        }
        Ok(fetched)
    }

    /// Recent observation series of a station
    pub async fn get_observations(&self, station_id: &str, now: DateTime<Utc>) -> Result<Fetched<Vec<RawObservation>>> {
        let resource = Resource::Observations(station_id.to_string());
        self.load(&resource, self.payload_ttl, now, None, payload::parse_observations)
            .await
    }

    /// Daily forecast document of a municipality
    pub async fn get_forecast(&self, municipality_id: &str, now: DateTime<Utc>) -> Result<Fetched<RawForecastDocument>> {
        let resource = Resource::Forecast(municipality_id.to_string());
        self.load(&resource, self.payload_ttl, now, None, payload::parse_forecast)
            .await
    }

    /// Serve `resource` from the store while fresh, otherwise refresh it,
    /// falling back to the persisted copy on recoverable failures.
    async fn load<T, F>(
        &self,
        resource: &Resource,
        ttl: Duration,
        now: DateTime<Utc>,
        known: Option<&Fetched<T>>,
        parse: F,
    ) -> Result<Fetched<T>>
    where
        T: Clone,
        F: Fn(&str) -> Result<T>,
    {
        let key = resource.cache_key();

        if let Some(stored_at) = self.stored_at(&key).await
            && is_fresh(stored_at, ttl, now)
            && let Some(cached) = self.restore(&key, known, &parse).await
        {
            debug!("Serving cached {} from {}", resource, cached.refreshed_at);
            return Ok(cached);
        }

        match self.refresh(resource, now, &parse).await {
            Ok(value) => Ok(Fetched {
                value,
                refreshed_at: now,
                degraded: false,
            }),
            Err(err) if err.is_recoverable() => {
                warn!("Refreshing {} failed: {}", resource, err);
                match self.restore(&key, known, &parse).await {
                    Some(stale) => {
                        warn!("Serving stale {} from {}", resource, stale.refreshed_at);
                        Ok(stale.stale())
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn refresh<T, F>(&self, resource: &Resource, now: DateTime<Utc>, parse: &F) -> Result<T>
    where
        F: Fn(&str) -> Result<T>,
    {
        debug!("Fetching {} from upstream", resource);
        let body = self.upstream.fetch(resource).await?;
        let value = parse(&body)?;

        if let Err(e) = self
            .store
            .replace(&resource.cache_key(), StoredBlob::new(now, body))
            .await
        {
            warn!("Failed to persist {}: {:#}", resource, e);
        }
        Ok(value)
    }

    async fn stored_at(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.store.refreshed_at(key).await {
            Ok(stored_at) => stored_at,
            Err(e) => {
                warn!("Failed to read cache timestamp of {}: {:#}", key, e);
                None
            }
        }
    }

    /// The persisted copy of `key`, reusing `known` when it is that same copy
    async fn restore<T, F>(&self, key: &str, known: Option<&Fetched<T>>, parse: &F) -> Option<Fetched<T>>
    where
        T: Clone,
        F: Fn(&str) -> Result<T>,
    {
        let Some(stored_at) = self.stored_at(key).await else {
            return known.cloned();
        };
        if let Some(known) = known
            && known.refreshed_at == stored_at
        {
            return Some(Fetched {
                degraded: false,
                ..known.clone()
            });
        }

        let blob = match self.store.read(key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return known.cloned(),
            Err(e) => {
                warn!("Failed to read cached {}: {:#}", key, e);
                return known.cloned();
            }
        };
        match parse(&blob.body) {
            Ok(value) => Some(Fetched {
                value,
                refreshed_at: blob.refreshed_at,
                degraded: false,
            }),
            Err(e) => {
                warn!("Discarding unreadable cached {}: {}", key, e);
                known.cloned()
            }
        }
    }
}

fn is_fresh(refreshed_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(refreshed_at) < ttl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WeatherError;
    use crate::cache::MemoryStore;
    use crate::models::GeoPoint;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const STATIONS: &str = r#"[
        {"idema":"A","ubi":"ALPHA","lat":0.0,"lon":0.0},
        {"idema":"B","ubi":"BRAVO","lat":0.0,"lon":1.0},
        {"idema":"C","ubi":"CHARLIE","lat":1.0,"lon":0.0}
    ]"#;

    #[derive(Default)]
    struct FakeUpstream {
        bodies: Mutex<HashMap<String, String>>,
        failure: Mutex<Option<fn() -> WeatherError>>,
        offline: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeUpstream {
        fn serve(&self, resource: &Resource, body: &str) {
            self.bodies
                .lock()
                .unwrap()
                .insert(resource.cache_key(), body.to_string());
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for FakeUpstream {
        async fn fetch(&self, resource: &Resource) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(failure) = *self.failure.lock().unwrap() {
                return Err(failure());
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(WeatherError::upstream("connection refused"));
            }
            self.bodies
                .lock()
                .unwrap()
                .get(&resource.cache_key())
                .cloned()
                .ok_or_else(|| WeatherError::upstream("404"))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn setup() -> (Arc<FakeUpstream>, Arc<MemoryStore>, CatalogCache) {
        let upstream = Arc::new(FakeUpstream::default());
        upstream.serve(&Resource::Catalog(LocationKind::Station), STATIONS);
        let store = Arc::new(MemoryStore::new());
        let cache = CatalogCache::new(upstream.clone(), store.clone());
        (upstream, store, cache)
    }

    #[tokio::test]
    async fn test_catalog_served_from_cache_within_ttl() {
        let (upstream, _, cache) = setup();

        let first = cache.get_catalog(LocationKind::Station, t0()).await.unwrap();
        assert!(!first.degraded);
        assert_eq!(first.value.len(), 3);

        let later = t0() + Duration::days(6);
        let second = cache.get_catalog(LocationKind::Station, later).await.unwrap();
        assert_eq!(upstream.calls(), 1);
        assert!(Arc::ptr_eq(&first.value, &second.value));
        assert_eq!(second.refreshed_at, t0());
    }

    #[tokio::test]
    async fn test_catalog_refetched_after_ttl() {
        let (upstream, _, cache) = setup();
        let first = cache.get_catalog(LocationKind::Station, t0()).await.unwrap();

        upstream.serve(
            &Resource::Catalog(LocationKind::Station),
            r#"[{"idema":"D","lat":0.1,"lon":0.1}]"#,
        );
        let later = t0() + Duration::days(7);
        let second = cache.get_catalog(LocationKind::Station, later).await.unwrap();
        assert_eq!(upstream.calls(), 2);
        assert!(!Arc::ptr_eq(&first.value, &second.value));
        assert_eq!(second.value.len(), 1);
        assert_eq!(second.refreshed_at, later);
    }

    #[tokio::test]
    async fn test_stale_copy_served_when_upstream_fails() {
        let (upstream, _, cache) = setup();
        let first = cache.get_catalog(LocationKind::Station, t0()).await.unwrap();

        upstream.offline.store(true, Ordering::SeqCst);
        let later = t0() + Duration::days(30);
        let stale = cache.get_catalog(LocationKind::Station, later).await.unwrap();
        assert!(stale.degraded);
        assert!(Arc::ptr_eq(&first.value, &stale.value));
        assert_eq!(stale.refreshed_at, t0());
    }

    #[tokio::test]
    async fn test_fails_when_nothing_persisted() {
        let (upstream, _, cache) = setup();
        upstream.offline.store(true, Ordering::SeqCst);
        let result = cache.get_catalog(LocationKind::Station, t0()).await;
        assert!(matches!(result, Err(WeatherError::UpstreamUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_invalid_api_key_is_not_masked_by_cache() {
        let (upstream, _, cache) = setup();
        cache.get_catalog(LocationKind::Station, t0()).await.unwrap();

        *upstream.failure.lock().unwrap() = Some(|| WeatherError::InvalidApiKey {
            message: "401".into(),
        });
        let result = cache
            .get_catalog(LocationKind::Station, t0() + Duration::days(8))
            .await;
        assert!(matches!(result, Err(WeatherError::InvalidApiKey { .. })));
    }

    #[tokio::test]
    async fn test_unparseable_refresh_keeps_previous_copy() {
        let (upstream, store, cache) = setup();
        cache.get_catalog(LocationKind::Station, t0()).await.unwrap();

        upstream.serve(&Resource::Catalog(LocationKind::Station), "[]");
        let later = t0() + Duration::days(8);
        let fetched = cache.get_catalog(LocationKind::Station, later).await.unwrap();
        assert!(fetched.degraded);
        assert_eq!(fetched.value.len(), 3);

        let key = Resource::Catalog(LocationKind::Station).cache_key();
        assert_eq!(store.refreshed_at(&key).await.unwrap(), Some(t0()));
    }

    #[tokio::test]
    async fn test_payload_ttl_is_independent() {
        let (upstream, _, cache) = setup();
        upstream.serve(&Resource::Observations("A".into()), r#"[{"idema":"A","ta":18.2}]"#);

        cache.get_catalog(LocationKind::Station, t0()).await.unwrap();
        cache.get_observations("A", t0()).await.unwrap();
        cache
            .get_observations("A", t0() + Duration::minutes(9))
            .await
            .unwrap();
        assert_eq!(upstream.calls(), 2);

        let later = t0() + Duration::minutes(10);
        cache.get_observations("A", later).await.unwrap();
        cache.get_catalog(LocationKind::Station, later).await.unwrap();
        assert_eq!(upstream.calls(), 3);
    }

    #[tokio::test]
    async fn test_restart_reads_persisted_catalog() {
        let (upstream, store, cache) = setup();
        cache.get_catalog(LocationKind::Station, t0()).await.unwrap();
        drop(cache);

        let restarted = CatalogCache::new(upstream.clone(), store).with_strategy(SearchStrategy::RTree);
        let fetched = restarted
            .get_catalog(LocationKind::Station, t0() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(upstream.calls(), 1);
        assert!(!fetched.degraded);
        let (nearest, _) = fetched.value.nearest(GeoPoint::new(0.1, 0.1)).unwrap();
        assert_eq!(nearest.id, "A");
    }
}
