//! # Geolocation Service Library
//!
//! IP geolocation through a pool of interchangeable upstream providers, with
//! response normalization, provider selection with fallback, and a per-IP
//! lookaside cache.
//!
//! ## Features
//!
//! - Declarative provider templates (URL pattern, placeholders, field map)
//! - JSON and shallow XML responses normalized into one canonical record
//! - Keyless providers used by default, keyed ones once an API key is set
//! - Addon providers registered at runtime
//! - Per-IP visit counters kept in a memory view over a persistent store
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use geoloc_service::{GeoClient, Hook};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = GeoClient::new().await?;
//!     let result = client.resolve("8.8.8.8", Hook::Public, false).await?;
//!
//!     println!("Country: {}", result.country_code);
//!     println!("Provider: {:?}", result.provider);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod http;
pub mod instances;
pub mod metrics;
pub mod parser;
pub mod provider;
pub mod registry;
pub mod request;
pub mod store;
pub mod template;

// Re-export main types for easy access
pub use crate::cache::{CacheRecord, CacheService, Hook, ValidationResult, UNKNOWN_COUNTRY};
pub use crate::catalog::{ProviderEntry, ProviderKind, CACHE_PROVIDER};
pub use crate::config::{Config, ProviderSetting, Settings};
pub use crate::errors::GeoError;
pub use crate::instances::{provider_factory, InstanceRegistry, ProviderFactory};
pub use crate::provider::{GeoProvider, RemoteProvider};
pub use crate::registry::ProviderRegistry;
pub use crate::request::RequestArgs;
pub use crate::template::{CanonicalField, IpFamilies, ProviderTemplate};

use crate::{
    http::{HttpFetcher, ReqwestFetcher},
    store::{CacheStore, JsonFileStore, MemoryStore},
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::{net::IpAddr, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Provider-independent location record.
///
/// Either an error record (`error_message` set) or a location whose
/// `country_code`, when present, is exactly two uppercase ASCII letters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<String>,
}

impl CanonicalLocation {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }

    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        match field {
            CanonicalField::ErrorMessage => self.error_message.as_deref(),
            CanonicalField::CountryCode => self.country_code.as_deref(),
            CanonicalField::CountryName => self.country_name.as_deref(),
            CanonicalField::RegionName => self.region_name.as_deref(),
            CanonicalField::CityName => self.city_name.as_deref(),
            CanonicalField::Latitude => self.latitude.as_deref(),
            CanonicalField::Longitude => self.longitude.as_deref(),
        }
    }

    pub(crate) fn set(&mut self, field: CanonicalField, value: Option<String>) {
        let slot = match field {
            CanonicalField::ErrorMessage => &mut self.error_message,
            CanonicalField::CountryCode => &mut self.country_code,
            CanonicalField::CountryName => &mut self.country_name,
            CanonicalField::RegionName => &mut self.region_name,
            CanonicalField::CityName => &mut self.city_name,
            CanonicalField::Latitude => &mut self.latitude,
            CanonicalField::Longitude => &mut self.longitude,
        };
        *slot = value;
    }

    /// A usable answer: no error and a country code.
    fn is_located(&self) -> bool {
        !self.is_error() && self.country_code.is_some()
    }
}

/// The provider that answered and what it said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Located {
    pub provider: String,
    pub location: CanonicalLocation,
}

/// Response structure for resolutions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoResponse {
    pub ip: String,
    /// `None` when no provider could locate the address
    pub provider: Option<String>,
    pub location: CanonicalLocation,
    pub country_code: String,
    pub cached: bool,
    pub query_time_ms: u64,
    pub record: CacheRecord,
}

/// High-level geolocation client: selection, fallback and caching.
#[derive(Clone)]
pub struct GeoClient {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    instances: Arc<InstanceRegistry>,
    cache: Arc<CacheService>,
}

impl GeoClient {
    /// Create a new client with configuration from files and environment
    pub async fn new() -> Result<Self, GeoError> {
        let config = Arc::new(Config::load()?);
        Self::new_with_config(config).await
    }

    /// Create a new client with custom configuration
    pub async fn new_with_config(config: Arc<Config>) -> Result<Self, GeoError> {
        let fetcher: Arc<dyn HttpFetcher> = Arc::new(ReqwestFetcher::new(&config)?);
        let store: Arc<dyn CacheStore> = match &config.store_path {
            Some(path) => Arc::new(JsonFileStore::open(path).await?),
            None => Arc::new(MemoryStore::new()),
        };

        info!(
            "Geolocation client initialized ({} store)",
            if config.store_path.is_some() { "file" } else { "memory" }
        );

        Ok(Self::with_parts(config, fetcher, store))
    }

    /// Assemble a client from explicit transport and store.
    pub fn with_parts(config: Arc<Config>, fetcher: Arc<dyn HttpFetcher>, store: Arc<dyn CacheStore>) -> Self {
        let cache = Arc::new(CacheService::new(&config, store));
        let instances = Arc::new(InstanceRegistry::new(cache.clone(), fetcher));

        Self {
            config,
            registry: Arc::new(ProviderRegistry::new()),
            instances,
            cache,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    /// Extend the addon pool. The first registration of a name wins.
    pub fn register_addon(&self, entry: ProviderEntry, factory: ProviderFactory) -> bool {
        if !self.registry.register_addon(entry.clone()) {
            return false;
        }
        self.instances.register_factory(&entry.name, factory)
    }

    pub fn eligible_providers(&self) -> Vec<String> {
        self.registry.eligible_providers(self.settings())
    }

    fn default_args(&self) -> RequestArgs {
        RequestArgs::with_timeout(Duration::from_secs(self.config.http_timeout_seconds))
    }

    fn candidates(&self, fresh: bool) -> Result<Vec<(String, Arc<dyn GeoProvider>)>, GeoError> {
        let names: Vec<String> = self
            .eligible_providers()
            .into_iter()
            .filter(|name| !(fresh && name == CACHE_PROVIDER))
            .collect();
        if names.is_empty() {
            return Err(GeoError::NoEligibleProvider);
        }

        Ok(names
            .into_iter()
            .filter_map(|name| {
                self.instances
                    .get_instance(&name, self.settings())
                    .map(|provider| (name, provider))
            })
            .collect())
    }

    async fn attempt(
        &self,
        name: &str,
        provider: &dyn GeoProvider,
        ip: &str,
        args: &RequestArgs,
    ) -> Option<CanonicalLocation> {
        let timeout = args
            .timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.http_timeout_seconds));

        debug!("Trying {} for {}", name, ip);
        let outcome = match tokio::time::timeout(timeout, provider.lookup(ip, args)).await {
            Ok(result) => result,
            Err(elapsed) => Err(GeoError::from(elapsed)),
        };

        match outcome {
            Ok(location) if location.is_located() => Some(location),
            Ok(location) => {
                debug!(
                    "{} gave no location for {}: {}",
                    name,
                    ip,
                    location.error_message.as_deref().unwrap_or("no country code")
                );
                None
            }
            Err(e) => {
                warn!("Provider {} failed for {}: {}", name, ip, e);
                None
            }
        }
    }

    /// Try the eligible providers in order; the first usable answer wins.
    pub async fn locate(&self, ip: &str, args: &RequestArgs) -> Result<Located, GeoError> {
        self.locate_with_options(ip, args, false).await
    }

    /// Like [`locate`](Self::locate); `fresh` skips the cache provider.
    pub async fn locate_with_options(
        &self,
        ip: &str,
        args: &RequestArgs,
        fresh: bool,
    ) -> Result<Located, GeoError> {
        let ip = parse_ip(ip)?;

        for (name, provider) in self.candidates(fresh)? {
            if let Some(location) = self.attempt(&name, provider.as_ref(), &ip, args).await {
                return Ok(Located { provider: name, location });
            }
        }

        Err(GeoError::ProvidersExhausted(ip))
    }

    /// Ask every eligible provider at once, then take the first usable answer
    /// in priority order.
    pub async fn locate_concurrent(&self, ip: &str, args: &RequestArgs) -> Result<Located, GeoError> {
        let ip = parse_ip(ip)?;
        let candidates = self.candidates(false)?;

        let answers = join_all(
            candidates
                .iter()
                .map(|(name, provider)| self.attempt(name, provider.as_ref(), &ip, args)),
        )
        .await;

        candidates
            .into_iter()
            .zip(answers)
            .find_map(|((name, _), answer)| answer.map(|location| Located { provider: name, location }))
            .ok_or(GeoError::ProvidersExhausted(ip))
    }

    /// Locate `ip` and record the visit in the cache.
    ///
    /// An address nobody could locate resolves to [`UNKNOWN_COUNTRY`].
    pub async fn resolve(&self, ip: &str, hook: Hook, authenticated: bool) -> Result<GeoResponse, GeoError> {
        self.resolve_with_options(ip, hook, authenticated, false).await
    }

    pub async fn resolve_with_options(
        &self,
        ip: &str,
        hook: Hook,
        authenticated: bool,
        fresh: bool,
    ) -> Result<GeoResponse, GeoError> {
        let start_time = std::time::Instant::now();
        let ip = parse_ip(ip)?;

        let (provider, location) = match self.locate_with_options(&ip, &self.default_args(), fresh).await {
            Ok(located) => (Some(located.provider), located.location),
            Err(e @ (GeoError::NoEligibleProvider | GeoError::ProvidersExhausted(_))) => {
                warn!("Could not locate {}: {}", ip, e);
                (None, CanonicalLocation::error(e.to_string()))
            }
            Err(e) => return Err(e),
        };

        let country_code = location
            .country_code
            .clone()
            .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string());

        let validation = ValidationResult::new(ip.clone(), country_code.clone(), chrono::Utc::now())
            .authenticated(authenticated);
        // a failed lookup is counted but never persisted
        let record = self
            .cache
            .upsert_with_options(hook, &validation, self.settings(), true, provider.is_some())
            .await;

        let query_time = start_time.elapsed().as_millis() as u64;
        info!(
            "Resolved {} to {} via {} in {}ms",
            ip,
            country_code,
            provider.as_deref().unwrap_or("nothing"),
            query_time
        );

        Ok(GeoResponse {
            cached: provider.as_deref() == Some(CACHE_PROVIDER),
            ip,
            provider,
            location,
            country_code,
            query_time_ms: query_time,
            record,
        })
    }

    pub async fn clear_cache(&self) -> Result<(), GeoError> {
        self.cache.clear().await
    }

    /// Drop stored records older than the cache retention window.
    pub async fn collect_garbage(&self) -> Result<usize, GeoError> {
        self.cache
            .collect_garbage(Duration::from_secs(self.config.cache_ttl_seconds))
            .await
    }
}

/// Validate and canonicalize an address ("::FFFF:1.2.3.4" and friends).
fn parse_ip(ip: &str) -> Result<String, GeoError> {
    ip.trim()
        .parse::<IpAddr>()
        .map(|addr| addr.to_string())
        .map_err(|_| GeoError::InvalidIp(ip.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::MockFetcher;

    const IP_API_BODY: &str = r#"{"status":"success","country":"Japan","countryCode":"JP","city":"Tokyo"}"#;
    const GEOIPLOOKUP_BODY: &str = "<ip><results><result><countrycode>DE</countrycode>\
                                    <countryname>Germany</countryname></result></results></ip>";

    fn settings() -> Settings {
        Settings {
            randomize: false,
            ..Settings::default()
        }
    }

    fn client(settings: Settings, fetcher: MockFetcher) -> (GeoClient, Arc<MockFetcher>, Arc<MemoryStore>) {
        let fetcher = Arc::new(fetcher);
        let store = Arc::new(MemoryStore::new());
        let client = GeoClient::with_parts(
            Arc::new(Config::with_settings(settings)),
            fetcher.clone(),
            store.clone(),
        );
        (client, fetcher, store)
    }

    #[test]
    fn test_canonical_location_serializes_present_fields_only() {
        let location = CanonicalLocation {
            country_code: Some("US".to_string()),
            city_name: Some("Ashburn".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&location).unwrap();
        assert_eq!(json, r#"{"countryCode":"US","cityName":"Ashburn"}"#);
        assert_eq!(location.get(CanonicalField::CityName), Some("Ashburn"));
        assert!(!location.is_error());
        assert!(CanonicalLocation::error("boom").is_error());
    }

    #[tokio::test]
    async fn test_resolve_then_cache_hit() {
        let (client, fetcher, store) = client(
            settings(),
            MockFetcher::new().respond("ip-api.com", "application/json", IP_API_BODY),
        );

        let first = client.resolve("1.2.3.4", Hook::Public, false).await.unwrap();
        assert_eq!(first.provider.as_deref(), Some("IP-API.com"));
        assert_eq!(first.country_code, "JP");
        assert!(!first.cached);
        assert_eq!(first.record.view_count, 1);
        assert!(store.search("1.2.3.4").await.unwrap().is_some());

        let second = client.resolve("1.2.3.4", Hook::Public, false).await.unwrap();
        assert_eq!(second.provider.as_deref(), Some(CACHE_PROVIDER));
        assert!(second.cached);
        assert_eq!(second.country_code, "JP");
        assert_eq!(second.record.request_count, 2);
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_resolution_skips_cache() {
        let (client, fetcher, _) = client(
            settings(),
            MockFetcher::new().respond("ip-api.com", "application/json", IP_API_BODY),
        );

        client.resolve("1.2.3.4", Hook::Public, false).await.unwrap();
        let fresh = client
            .resolve_with_options("1.2.3.4", Hook::Public, false, true)
            .await
            .unwrap();

        assert_eq!(fresh.provider.as_deref(), Some("IP-API.com"));
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let (client, fetcher, _) = client(
            settings(),
            MockFetcher::new()
                .respond_status("ip-api.com", 429, "TOO MANY REQUESTS")
                .respond("geoiplookup.net", "text/xml", GEOIPLOOKUP_BODY),
        );

        let located = client.locate("5.6.7.8", &RequestArgs::default()).await.unwrap();

        assert_eq!(located.provider, "GeoIPLookup");
        assert_eq!(located.location.country_code.as_deref(), Some("DE"));
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_fatal() {
        let (client, _, _) = client(
            settings(),
            MockFetcher::new()
                .fail("ip-api.com", "connection refused")
                .respond("geoiplookup.net", "text/xml", GEOIPLOOKUP_BODY),
        );

        let located = client.locate("5.6.7.8", &RequestArgs::default()).await.unwrap();
        assert_eq!(located.provider, "GeoIPLookup");
    }

    #[tokio::test]
    async fn test_exhausted_providers_resolve_to_unknown() {
        let (client, _, store) = client(
            settings(),
            MockFetcher::new()
                .respond_status("ip-api.com", 503, "")
                .respond("geoiplookup.net", "application/octet-stream", "\u{0}"),
        );

        let err = client.locate("9.9.9.9", &RequestArgs::default()).await.unwrap_err();
        assert!(matches!(err, GeoError::ProvidersExhausted(_)));

        let response = client.resolve("9.9.9.9", Hook::Public, false).await.unwrap();
        assert_eq!(response.country_code, UNKNOWN_COUNTRY);
        assert_eq!(response.provider, None);
        assert!(response.location.is_error());
        assert_eq!(response.record.view_count, 1);
        assert!(store.search("9.9.9.9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_resolution_does_not_pin_unknown_country() {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(Config::with_settings(settings()));

        let failing = GeoClient::with_parts(
            config.clone(),
            Arc::new(
                MockFetcher::new()
                    .respond_status("ip-api.com", 429, "TOO MANY REQUESTS")
                    .respond_status("geoiplookup.net", 503, ""),
            ),
            store.clone(),
        );
        let first = failing.resolve("1.2.3.4", Hook::Public, false).await.unwrap();
        assert_eq!(first.country_code, UNKNOWN_COUNTRY);

        // the unknown answer stays in the failing client's memory view only
        let again = failing.resolve("1.2.3.4", Hook::Public, false).await.unwrap();
        assert_eq!(again.provider, None);
        assert_eq!(again.record.view_count, 2);

        let healthy_fetcher =
            Arc::new(MockFetcher::new().respond("ip-api.com", "application/json", IP_API_BODY));
        let healthy = GeoClient::with_parts(config, healthy_fetcher.clone(), store.clone());
        let second = healthy.resolve("1.2.3.4", Hook::Public, false).await.unwrap();

        assert_eq!(second.country_code, "JP");
        assert_eq!(second.provider.as_deref(), Some("IP-API.com"));
        assert_eq!(healthy_fetcher.requests().len(), 1);
        assert_eq!(
            store.search("1.2.3.4").await.unwrap().map(|r| r.country_code),
            Some("JP".to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_country_in_memory_falls_through_to_remote() {
        let (client, fetcher, _) = client(
            settings(),
            MockFetcher::new().respond("ip-api.com", "application/json", IP_API_BODY),
        );
        client
            .cache()
            .upsert(
                Hook::Public,
                &ValidationResult::new("1.2.3.4", UNKNOWN_COUNTRY, chrono::Utc::now()),
                client.settings(),
                true,
            )
            .await;

        let response = client.resolve("1.2.3.4", Hook::Public, false).await.unwrap();

        assert_eq!(response.provider.as_deref(), Some("IP-API.com"));
        assert_eq!(response.country_code, "JP");
        assert_eq!(fetcher.requests().len(), 1);
    }

    struct SlowProvider;

    #[async_trait::async_trait]
    impl GeoProvider for SlowProvider {
        fn name(&self) -> &str {
            "Slow"
        }

        async fn lookup(&self, _ip: &str, _args: &RequestArgs) -> Result<CanonicalLocation, GeoError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(CanonicalLocation {
                country_code: Some("FR".to_string()),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_provider_exceeding_timeout_is_skipped() {
        let (client, _, _) = client(
            settings(),
            MockFetcher::new().respond("ip-api.com", "application/json", IP_API_BODY),
        );
        assert!(client.register_addon(
            ProviderEntry::new("Slow", false, "IPv4, IPv6 / test"),
            provider_factory(|_| Ok(Arc::new(SlowProvider) as Arc<dyn GeoProvider>)),
        ));

        let args = RequestArgs::with_timeout(Duration::from_millis(50));
        let started = std::time::Instant::now();
        let located = client.locate("5.6.7.8", &args).await.unwrap();

        assert_eq!(located.provider, "IP-API.com");
        assert_eq!(located.location.country_code.as_deref(), Some("JP"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_fresh_with_only_cache_eligible_has_no_provider() {
        let mut settings = settings();
        settings.restrict_api = true;
        let (client, _, _) = client(settings, MockFetcher::new());

        assert_eq!(client.eligible_providers(), vec![CACHE_PROVIDER.to_string()]);
        let err = client
            .locate_with_options("8.8.8.8", &RequestArgs::default(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::NoEligibleProvider));
    }

    #[tokio::test]
    async fn test_no_eligible_provider() {
        let mut settings = settings();
        settings.restrict_api = true;
        settings.cache_hold = false;
        let (client, fetcher, _) = client(settings, MockFetcher::new());

        assert!(client.eligible_providers().is_empty());
        let err = client.locate("8.8.8.8", &RequestArgs::default()).await.unwrap_err();
        assert!(matches!(err, GeoError::NoEligibleProvider));

        let response = client.resolve("8.8.8.8", Hook::Public, false).await.unwrap();
        assert_eq!(response.country_code, UNKNOWN_COUNTRY);
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_ip_is_rejected() {
        let (client, _, _) = client(settings(), MockFetcher::new());

        let result = client.resolve("not-an-ip", Hook::Public, false).await;
        assert!(matches!(result, Err(GeoError::InvalidIp(_))));

        let result = client.locate("", &RequestArgs::default()).await;
        assert!(matches!(result, Err(GeoError::InvalidIp(_))));
    }

    #[tokio::test]
    async fn test_ipv6_is_canonicalized() {
        let (client, fetcher, _) = client(
            settings(),
            MockFetcher::new().respond("ip-api.com", "application/json", IP_API_BODY),
        );

        let response = client.resolve(" 2001:DB8:0:0::1 ", Hook::Public, false).await.unwrap();

        assert_eq!(response.ip, "2001:db8::1");
        assert_eq!(fetcher.requests(), vec!["http://ip-api.com/json/2001:db8::1".to_string()]);
    }

    #[tokio::test]
    async fn test_locate_concurrent_prefers_priority_order() {
        let (client, fetcher, _) = client(
            settings(),
            MockFetcher::new()
                .respond("ip-api.com", "application/json", IP_API_BODY)
                .respond("geoiplookup.net", "text/xml", GEOIPLOOKUP_BODY),
        );

        let located = client
            .locate_concurrent("5.6.7.8", &RequestArgs::default())
            .await
            .unwrap();

        assert_eq!(located.provider, "IP-API.com");
        assert_eq!(located.location.country_code.as_deref(), Some("JP"));
        // both were asked; the cache provider does not go over the wire
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_registered_addon_is_tried_first() {
        let (client, fetcher, _) = client(
            settings(),
            MockFetcher::new()
                .respond("geo.example.com", "application/json", r#"{"cc":"FR"}"#)
                .respond("ip-api.com", "application/json", IP_API_BODY),
        );
        let addon_fetcher: Arc<dyn HttpFetcher> = fetcher.clone();
        let registered = client.register_addon(
            ProviderEntry::new("Example", false, "IPv4 / test"),
            provider_factory(move |api_key| {
                let template = ProviderTemplate::new(IpFamilies::V4, "https://geo.example.com/{ip}")
                    .field(CanonicalField::CountryCode, "cc");
                Ok(Arc::new(RemoteProvider::custom("Example", template, api_key, addon_fetcher.clone())?)
                    as Arc<dyn GeoProvider>)
            }),
        );
        assert!(registered);
        assert!(!client.register_addon(
            ProviderEntry::new("Example", false, "again"),
            provider_factory(|_| Err(GeoError::Internal("unused".to_string()))),
        ));

        let located = client.locate("5.6.7.8", &RequestArgs::default()).await.unwrap();
        assert_eq!(located.provider, "Example");
        assert_eq!(located.location.country_code.as_deref(), Some("FR"));

        // IPv6 is outside the addon's families, so the built-ins answer
        let located = client.locate("2001:db8::2", &RequestArgs::default()).await.unwrap();
        assert_eq!(located.provider, "IP-API.com");
    }

    #[tokio::test]
    async fn test_clear_cache_forgets_records() {
        let (client, _, store) = client(
            settings(),
            MockFetcher::new().respond("ip-api.com", "application/json", IP_API_BODY),
        );

        client.resolve("1.2.3.4", Hook::Public, false).await.unwrap();
        client.clear_cache().await.unwrap();

        assert_eq!(store.len().await, 0);
        let again = client.resolve("1.2.3.4", Hook::Public, false).await.unwrap();
        assert_eq!(again.provider.as_deref(), Some("IP-API.com"));
        assert_eq!(again.record.request_count, 1);
    }
}
