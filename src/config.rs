use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Instant};

/// Per-provider entry of the `providers` settings map.
///
/// A string is an API key, a boolean is an explicit (de)selection of a provider
/// that needs no key. Empty strings and `false` both mean "not selected".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderSetting {
    Enabled(bool),
    ApiKey(String),
}

impl ProviderSetting {
    pub fn is_selected(&self) -> bool {
        match self {
            ProviderSetting::Enabled(enabled) => *enabled,
            ProviderSetting::ApiKey(key) => !key.trim().is_empty(),
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        match self {
            ProviderSetting::ApiKey(key) if !key.trim().is_empty() => Some(key.trim()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Behavior {
    /// Gap in seconds after which a returning public visitor counts as a new visit
    pub time: u64,
}

impl Default for Behavior {
    fn default() -> Self {
        Self { time: 5 }
    }
}

/// Settings consumed by provider selection, instance construction and the cache layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub providers: HashMap<String, ProviderSetting>,
    pub cache_hold: bool,
    pub save_statistics: bool,
    pub restrict_api: bool,
    pub randomize: bool,
    pub behavior: Behavior,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            cache_hold: true,
            save_statistics: true,
            restrict_api: false,
            randomize: true,
            behavior: Behavior::default(),
        }
    }
}

impl Settings {
    /// Exact match on the display name first, then a case-insensitive match.
    pub fn provider_setting(&self, provider: &str) -> Option<&ProviderSetting> {
        self.providers.get(provider).or_else(|| {
            self.providers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(provider))
                .map(|(_, setting)| setting)
        })
    }

    pub fn api_key(&self, provider: &str) -> Option<String> {
        self.provider_setting(provider)
            .and_then(ProviderSetting::api_key)
            .map(str::to_string)
    }

    pub fn set_provider(&mut self, provider: &str, setting: ProviderSetting) -> &mut Self {
        self.providers.insert(provider.to_string(), setting);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub http_timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: u64,
    pub cache_gc_interval_seconds: u64,
    pub store_path: Option<String>,
    pub user_agent: String,
    pub settings: Settings,
    pub start_time: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigData {
    pub port: u16,
    pub http_timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: u64,
    pub cache_gc_interval_seconds: u64,
    #[serde(default)]
    pub store_path: Option<String>,
    pub user_agent: String,
    #[serde(default)]
    pub settings: Settings,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_settings(Settings::default())
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let is_production = Self::is_production_environment();

        let mut settings = config::Config::builder()
            .set_default("port", Self::get_default_port())?
            .set_default("http_timeout_seconds", if is_production { 10 } else { 5 })?
            .set_default("cache_ttl_seconds", if is_production { 3600 } else { 1800 })?
            .set_default("cache_max_entries", 10_000)?
            .set_default("cache_gc_interval_seconds", 900)?
            .set_default("user_agent", Self::default_user_agent())?
            .add_source(
                config::File::with_name(
                    &std::env::var("GEOLOC_CONFIG").unwrap_or_else(|_| "geoloc".to_string()),
                )
                .required(false),
            );

        // Environment variables win over the config file
        settings = Self::apply_env_overrides(settings)?;

        let config_data: ConfigData = settings.build()?.try_deserialize()?;

        Ok(Config {
            port: config_data.port,
            http_timeout_seconds: config_data.http_timeout_seconds,
            cache_ttl_seconds: config_data.cache_ttl_seconds,
            cache_max_entries: config_data.cache_max_entries,
            cache_gc_interval_seconds: config_data.cache_gc_interval_seconds,
            store_path: config_data.store_path.filter(|p| !p.trim().is_empty()),
            user_agent: config_data.user_agent,
            settings: config_data.settings,
            start_time: Instant::now(),
        })
    }

    /// Development defaults around the given settings, without touching files or the environment.
    pub fn with_settings(settings: Settings) -> Self {
        Config {
            port: 3000,
            http_timeout_seconds: 5,
            cache_ttl_seconds: 1800,
            cache_max_entries: 10_000,
            cache_gc_interval_seconds: 900,
            store_path: None,
            user_agent: Self::default_user_agent(),
            settings,
            start_time: Instant::now(),
        }
    }

    fn default_user_agent() -> String {
        format!("geoloc-service/{}", env!("CARGO_PKG_VERSION"))
    }

    fn is_production_environment() -> bool {
        std::env::var("ENVIRONMENT")
            .or_else(|_| std::env::var("ENV"))
            .map(|env| env.to_lowercase() == "production" || env.to_lowercase() == "prod")
            .unwrap_or(false)
    }

    fn get_default_port() -> u16 {
        std::env::var("PORT")
            .or_else(|_| std::env::var("HTTP_PORT"))
            .or_else(|_| std::env::var("SERVER_PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000)
    }

    fn apply_env_overrides(
        mut settings: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let env_mappings = [
            ("PORT", "port"),
            ("HTTP_TIMEOUT_SECONDS", "http_timeout_seconds"),
            ("HTTP_TIMEOUT", "http_timeout_seconds"),
            ("CACHE_TTL_SECONDS", "cache_ttl_seconds"),
            ("CACHE_TTL", "cache_ttl_seconds"),
            ("CACHE_MAX_ENTRIES", "cache_max_entries"),
            ("CACHE_SIZE", "cache_max_entries"),
            ("CACHE_GC_INTERVAL_SECONDS", "cache_gc_interval_seconds"),
            ("CACHE_STORE_PATH", "store_path"),
            ("USER_AGENT", "user_agent"),
            ("CACHE_HOLD", "settings.cache_hold"),
            ("SAVE_STATISTICS", "settings.save_statistics"),
            ("RESTRICT_API", "settings.restrict_api"),
            ("RANDOMIZE_PROVIDERS", "settings.randomize"),
            ("BEHAVIOR_TIME", "settings.behavior.time"),
        ];

        for (env_var, config_key) in env_mappings {
            if let Ok(value) = std::env::var(env_var) {
                settings = settings.set_override(config_key, value)?;
            }
        }

        Ok(settings)
    }
}
