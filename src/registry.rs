//! Provider pools and the selection policy.
//!
//! Two pools: the built-in remote providers and the addon/internal pool (which
//! always starts with the `Cache` pseudo-provider). Selection returns provider
//! display names in the order they should be tried.

use crate::{
    catalog::{ProviderEntry, BUILTIN_PROVIDERS, CACHE_ENTRY, CACHE_PROVIDER},
    config::Settings,
};
use rand::seq::SliceRandom;
use std::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

pub struct ProviderRegistry {
    builtins: Vec<ProviderEntry>,
    addons: RwLock<Vec<ProviderEntry>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            builtins: BUILTIN_PROVIDERS.clone(),
            addons: RwLock::new(vec![CACHE_ENTRY.clone()]),
        }
    }

    fn addon_pool(&self) -> RwLockReadGuard<'_, Vec<ProviderEntry>> {
        self.addons.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an addon provider. An already registered name is kept as is.
    pub fn register_addon(&self, entry: ProviderEntry) -> bool {
        let mut addons = self.addons.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if addons.iter().any(|existing| existing.name == entry.name) {
            debug!("Addon provider {} already registered", entry.name);
            return false;
        }
        debug!("Registered addon provider {}", entry.name);
        addons.push(entry);
        true
    }

    /// Addon names (never `Cache`) that are not deselected, or all of them with `force`.
    pub fn addons(&self, settings: &Settings, force: bool) -> Vec<String> {
        self.addon_pool()
            .iter()
            .filter(|entry| entry.name != CACHE_PROVIDER)
            .filter(|entry| {
                force
                    || settings
                        .provider_setting(&entry.name)
                        .map_or(true, |setting| setting.is_selected())
            })
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub fn entry(&self, name: &str) -> Option<ProviderEntry> {
        self.addon_pool()
            .iter()
            .chain(self.builtins.iter())
            .find(|entry| entry.name == name)
            .cloned()
    }

    /// Candidate entries: addons in registration order (without `Cache` unless
    /// asked for), then, with `all`, the built-ins, optionally shuffled.
    pub fn providers(&self, shuffle: bool, include_cache: bool, all: bool) -> Vec<ProviderEntry> {
        let mut list: Vec<ProviderEntry> = self
            .addon_pool()
            .iter()
            .filter(|entry| include_cache || entry.name != CACHE_PROVIDER)
            .cloned()
            .collect();

        if all {
            let mut builtins = self.builtins.clone();
            if shuffle {
                builtins.shuffle(&mut rand::rng());
            }
            list.extend(builtins);
        }

        list
    }

    /// Names of the providers to try, in order.
    ///
    /// A provider qualifies when it has a configured key/selection, or when it
    /// needs no key and was not explicitly deselected. An empty list means no
    /// geolocation is available.
    pub fn eligible_providers(&self, settings: &Settings) -> Vec<String> {
        self.eligible_providers_with(settings, settings.randomize, true, false)
    }

    pub fn eligible_providers_with(
        &self,
        settings: &Settings,
        shuffle: bool,
        include_cache: bool,
        all: bool,
    ) -> Vec<String> {
        let include_cache = include_cache && settings.cache_hold;
        let all = !settings.restrict_api || all;

        let names: Vec<String> = self
            .providers(shuffle, include_cache, all)
            .into_iter()
            .filter(|entry| match settings.provider_setting(&entry.name) {
                Some(setting) => setting.is_selected(),
                None => !entry.requires_api_key,
            })
            .map(|entry| entry.name)
            .collect();

        debug!("Eligible providers: {:?}", names);
        names
    }
}
