//! Construct-once provider instances.
//!
//! Every provider name maps to at most one live driver per registry. Built-in
//! kinds are built from the catalog; addons supply a factory when they register.

use crate::{
    cache::{CacheProvider, CacheService},
    catalog::{provider_identity, ProviderKind},
    config::Settings,
    errors::GeoError,
    http::HttpFetcher,
    provider::{GeoProvider, RemoteProvider},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};
use tracing::{debug, warn};

/// Builds an addon driver from its (optional) API key.
pub type ProviderFactory =
    Arc<dyn Fn(Option<String>) -> Result<Arc<dyn GeoProvider>, GeoError> + Send + Sync>;

pub fn provider_factory<F>(build: F) -> ProviderFactory
where
    F: Fn(Option<String>) -> Result<Arc<dyn GeoProvider>, GeoError> + Send + Sync + 'static,
{
    Arc::new(build)
}

pub struct InstanceRegistry {
    cache: Arc<CacheService>,
    fetcher: Arc<dyn HttpFetcher>,
    factories: RwLock<HashMap<String, ProviderFactory>>,
    instances: Mutex<HashMap<String, Arc<dyn GeoProvider>>>,
}

impl InstanceRegistry {
    pub fn new(cache: Arc<CacheService>, fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            cache,
            fetcher,
            factories: RwLock::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn fetcher(&self) -> Arc<dyn HttpFetcher> {
        self.fetcher.clone()
    }

    /// Register how to build an addon. The first factory for a name is kept.
    pub fn register_factory(&self, name: &str, factory: ProviderFactory) -> bool {
        let mut factories = self.factories.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let identity = provider_identity(name);
        if factories.contains_key(&identity) {
            return false;
        }
        factories.insert(identity, factory);
        true
    }

    /// The single driver for `name`, built on first use.
    ///
    /// Returns `None` for names that resolve to nothing; construction failures
    /// are logged and not remembered.
    pub fn get_instance(&self, name: &str, settings: &Settings) -> Option<Arc<dyn GeoProvider>> {
        let identity = provider_identity(name);
        if identity.is_empty() {
            return None;
        }

        // held across construction so two callers never build the same provider
        let mut instances = self.instances.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(instance) = instances.get(&identity) {
            return Some(instance.clone());
        }

        match self.construct(name, &identity, settings) {
            Ok(Some(instance)) => {
                debug!("Constructed provider instance {}", name);
                instances.insert(identity, instance.clone());
                Some(instance)
            }
            Ok(None) => {
                debug!("No provider named {}", name);
                None
            }
            Err(e) => {
                warn!("Failed to construct provider {}: {}", name, e);
                None
            }
        }
    }

    fn construct(
        &self,
        name: &str,
        identity: &str,
        settings: &Settings,
    ) -> Result<Option<Arc<dyn GeoProvider>>, GeoError> {
        let instance: Arc<dyn GeoProvider> = match ProviderKind::from_name(name) {
            Some(ProviderKind::Cache) => Arc::new(CacheProvider::new(self.cache.clone())),
            Some(kind) => {
                let api_key = settings.api_key(kind.display_name());
                Arc::new(RemoteProvider::new(kind, api_key, self.fetcher.clone())?)
            }
            None => {
                let factory = self
                    .factories
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .get(identity)
                    .cloned();
                match factory {
                    Some(factory) => factory(settings.api_key(name))?,
                    None => return Ok(None),
                }
            }
        };

        Ok(Some(instance))
    }

    /// Forget every constructed driver, e.g. after API keys changed.
    pub fn reset(&self) {
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
