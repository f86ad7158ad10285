//! Lookaside IP cache.
//!
//! A `moka` map in front of a durable [`CacheStore`]. Each record tracks how
//! often an IP was seen (`request_count`), how many page views fall into the
//! current visit (`view_count`) and failure counts reported by the caller.

use crate::{
    catalog::CACHE_PROVIDER,
    config::{Config, Settings},
    errors::GeoError,
    provider::GeoProvider,
    request::RequestArgs,
    store::CacheStore,
    CanonicalLocation,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, warn};

/// Country code recorded when the origin of an IP is unknown.
pub const UNKNOWN_COUNTRY: &str = "ZZ";

/// Context a lookup happens in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hook {
    Public,
    Admin,
    Login,
    Comment,
    Xmlrpc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub ip: String,
    pub timestamp: DateTime<Utc>,
    pub hook: Hook,
    /// Reserved; no built-in provider reports an ASN.
    pub asn: Option<String>,
    pub country_code: String,
    pub authenticated: bool,
    pub fail_count: u32,
    pub request_count: u64,
    pub last_access: DateTime<Utc>,
    pub view_count: u32,
    pub host: Option<String>,
}

/// Outcome of resolving one request, as handed to [`CacheService::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub ip: String,
    pub country_code: String,
    pub asn: Option<String>,
    pub authenticated: bool,
    pub fail_count: Option<u32>,
    pub host: Option<String>,
    pub time: DateTime<Utc>,
}

impl ValidationResult {
    pub fn new(ip: impl Into<String>, country_code: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            ip: ip.into(),
            country_code: country_code.into(),
            asn: None,
            authenticated: false,
            fail_count: None,
            host: None,
            time,
        }
    }

    pub fn authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    pub fn fail_count(mut self, fail_count: u32) -> Self {
        self.fail_count = Some(fail_count);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn asn(mut self, asn: impl Into<String>) -> Self {
        self.asn = Some(asn.into());
        self
    }
}

/// Keeps the install window open until dropped.
pub struct InstallWindow {
    open: Arc<AtomicUsize>,
}

impl Drop for InstallWindow {
    fn drop(&mut self) {
        let remaining = self.open.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!("Install window closed ({} still open)", remaining);
    }
}

pub struct CacheService {
    memory: Cache<String, CacheRecord>,
    store: Arc<dyn CacheStore>,
    installing: Arc<AtomicUsize>,
}

impl CacheService {
    pub fn new(config: &Config, store: Arc<dyn CacheStore>) -> Self {
        let memory = Cache::builder()
            .max_capacity(config.cache_max_entries)
            .time_to_live(Duration::from_secs(config.cache_ttl_seconds))
            .build();

        Self {
            memory,
            store,
            installing: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Memory first; on a miss, optionally read through to the store.
    ///
    /// A store miss is not remembered, so a later write to the store is seen.
    pub async fn get(&self, ip: &str, read_through: bool) -> Result<Option<CacheRecord>, GeoError> {
        if let Some(record) = self.memory.get(ip).await {
            debug!("Cache hit for {}", ip);
            return Ok(Some(record));
        }

        if !read_through {
            debug!("Cache miss for {}", ip);
            return Ok(None);
        }

        match self.store.search(ip).await? {
            Some(record) => {
                debug!("Cache store hit for {}", ip);
                self.memory.insert(ip.to_string(), record.clone()).await;
                Ok(Some(record))
            }
            None => {
                debug!("Cache miss for {}", ip);
                Ok(None)
            }
        }
    }

    /// Update (or create) the record for `validation.ip`.
    ///
    /// The read-modify-write of the counters is atomic per IP.
    pub async fn upsert(
        &self,
        hook: Hook,
        validation: &ValidationResult,
        settings: &Settings,
        count_up: bool,
    ) -> CacheRecord {
        self.upsert_with_options(hook, validation, settings, count_up, true)
            .await
    }

    /// Like [`upsert`](Self::upsert); with `persist` false the visit is only
    /// counted in the memory view.
    pub async fn upsert_with_options(
        &self,
        hook: Hook,
        validation: &ValidationResult,
        settings: &Settings,
        count_up: bool,
        persist: bool,
    ) -> CacheRecord {
        let ip = validation.ip.clone();
        let store = self.store.clone();
        let read_through = settings.cache_hold;

        let entry = self
            .memory
            .entry(ip.clone())
            .and_upsert_with(|current| {
                let current = current.map(|entry| entry.into_value());
                async move {
                    let existing = match current {
                        Some(record) => Some(record),
                        None if read_through => store.search(&ip).await.unwrap_or_else(|e| {
                            warn!("Cache store read failed for {}: {}", ip, e);
                            None
                        }),
                        None => None,
                    };
                    next_record(hook, validation, settings, count_up, existing)
                }
            })
            .await;
        let record = entry.into_value();

        // An "unknown" answer for an admin or during a database install is transient
        let transient_unknown = record.country_code == UNKNOWN_COUNTRY
            && (validation.authenticated || self.is_installing());

        if persist && settings.cache_hold && !transient_unknown {
            if let Err(e) = self.store.write(&record).await {
                warn!("Failed to persist cache record for {}: {}", record.ip, e);
            }
        } else {
            debug!("Not persisting cache record for {}", record.ip);
        }

        record
    }

    pub async fn clear(&self) -> Result<(), GeoError> {
        self.memory.invalidate_all();
        self.store.clear().await
    }

    /// Remove store records older than `retention` and flush expired memory entries.
    pub async fn collect_garbage(&self, retention: Duration) -> Result<usize, GeoError> {
        let removed = self.store.delete_expired(retention).await?;
        self.memory.run_pending_tasks().await;
        debug!("Cache garbage collection removed {} records", removed);
        Ok(removed)
    }

    pub fn begin_install(&self) -> InstallWindow {
        self.installing.fetch_add(1, Ordering::SeqCst);
        InstallWindow {
            open: self.installing.clone(),
        }
    }

    pub fn is_installing(&self) -> bool {
        self.installing.load(Ordering::SeqCst) > 0
    }
}

fn next_record(
    hook: Hook,
    validation: &ValidationResult,
    settings: &Settings,
    count_up: bool,
    existing: Option<CacheRecord>,
) -> CacheRecord {
    let time = validation.time;

    let (fail_count, calls, mut last_access, mut view_count) = match &existing {
        Some(cached) => (
            validation.fail_count.unwrap_or(0),
            cached.request_count + u64::from(count_up),
            cached.last_access,
            cached.view_count,
        ),
        None => (validation.fail_count.unwrap_or(0), 1, time, 1),
    };

    if existing.is_some() && hook == Hook::Public {
        let window = i64::try_from(settings.behavior.time).unwrap_or(i64::MAX);
        if (time - last_access).num_seconds() > window {
            view_count = 1;
        } else {
            view_count = view_count.saturating_add(1);
        }
        last_access = time;
    }

    CacheRecord {
        ip: validation.ip.clone(),
        timestamp: time,
        hook,
        asn: validation.asn.clone(),
        country_code: validation.country_code.clone(),
        authenticated: validation.authenticated,
        fail_count,
        request_count: if settings.save_statistics { calls } else { 0 },
        last_access,
        view_count,
        host: validation.host.clone().filter(|host| *host != validation.ip),
    }
}

/// The cache exposed as a provider, so "check the cache" sits in the same
/// provider list as the remote services.
pub struct CacheProvider {
    cache: Arc<CacheService>,
}

impl CacheProvider {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl GeoProvider for CacheProvider {
    fn name(&self) -> &str {
        CACHE_PROVIDER
    }

    async fn lookup(&self, ip: &str, _args: &RequestArgs) -> Result<CanonicalLocation, GeoError> {
        Ok(match self.cache.get(ip, true).await? {
            // an unknown origin is never an answer; let the remote providers try
            Some(record) if record.country_code == UNKNOWN_COUNTRY => {
                CanonicalLocation::error("unknown country in the cache")
            }
            Some(record) => CanonicalLocation {
                country_code: Some(record.country_code),
                ..Default::default()
            },
            None => CanonicalLocation::error("not in the cache"),
        })
    }
}
