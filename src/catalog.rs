use crate::template::{CanonicalField, IpFamilies, ProviderTemplate};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Display name of the cache pseudo-provider.
pub const CACHE_PROVIDER: &str = "Cache";

/// Every provider this crate knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    IpApiCom,
    GeoIpLookup,
    IpInfoIo,
    IpApi,
    IpDataCo,
    IpStack,
    IpInfoDb,
    Cache,
}

/// Selection-pool entry: display name, whether a key is needed, and a human description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub requires_api_key: bool,
    pub capability: String,
}

impl ProviderEntry {
    pub fn new(name: impl Into<String>, requires_api_key: bool, capability: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires_api_key,
            capability: capability.into(),
        }
    }
}

// Built-in remote providers, in their default (unshuffled) order
pub static BUILTIN_PROVIDERS: Lazy<Vec<ProviderEntry>> = Lazy::new(|| {
    vec![
        ProviderEntry::new("IP-API.com", false, "IPv4, IPv6 / free for non-commercial use"),
        ProviderEntry::new("GeoIPLookup", false, "IPv4, IPv6 / free"),
        ProviderEntry::new("ipinfo.io", true, "IPv4, IPv6 / free up to 50,000 lookups monthly"),
        ProviderEntry::new("ipapi", true, "IPv4, IPv6 / free up to 1,000 lookups monthly for registered user"),
        ProviderEntry::new("Ipdata.co", true, "IPv4, IPv6 / free up to 1,500 lookups daily"),
        ProviderEntry::new("ipstack", true, "IPv4, IPv6 / free for registered user"),
        ProviderEntry::new("IPInfoDB", true, "IPv4, IPv6 / free for registered user"),
    ]
});

pub static CACHE_ENTRY: Lazy<ProviderEntry> =
    Lazy::new(|| ProviderEntry::new(CACHE_PROVIDER, false, "IPv4, IPv6"));

// Identity (word characters only, lowercased) -> kind
static PROVIDER_IDENTITIES: Lazy<HashMap<&'static str, ProviderKind>> = Lazy::new(|| {
    let mut map = HashMap::new();

    map.insert("ipapicom", ProviderKind::IpApiCom);
    map.insert("geoiplookup", ProviderKind::GeoIpLookup);
    map.insert("ipinfoio", ProviderKind::IpInfoIo);
    map.insert("ipapi", ProviderKind::IpApi);
    map.insert("ipdataco", ProviderKind::IpDataCo);
    map.insert("ipstack", ProviderKind::IpStack);
    map.insert("ipinfodb", ProviderKind::IpInfoDb);
    map.insert("cache", ProviderKind::Cache);

    map
});

static BUILTIN_TEMPLATES: Lazy<HashMap<ProviderKind, ProviderTemplate>> = Lazy::new(|| {
    use CanonicalField::*;

    let mut map = HashMap::new();

    // http://ip-api.com/json/2a00:1210:fffe:200::1
    map.insert(
        ProviderKind::IpApiCom,
        ProviderTemplate::new(IpFamilies::Both, "http://ip-api.com/{format}/{ip}")
            .format("json")
            .field(ErrorMessage, "message")
            .field(CountryCode, "countryCode")
            .field(CountryName, "country")
            .field(RegionName, "regionName")
            .field(CityName, "city")
            .field(Latitude, "lat")
            .field(Longitude, "lon"),
    );

    // XML only
    map.insert(
        ProviderKind::GeoIpLookup,
        ProviderTemplate::new(IpFamilies::Both, "http://api.geoiplookup.net/?query={ip}")
            .field(CountryCode, "countrycode")
            .field(CountryName, "countryname")
            .field(RegionName, "countryname")
            .field(CityName, "city")
            .field(Latitude, "latitude")
            .field(Longitude, "longitude"),
    );

    // `loc` holds "lat,lon"; the `country` option returns a bare code as text/plain
    map.insert(
        ProviderKind::IpInfoIo,
        ProviderTemplate::new(IpFamilies::Both, "https://ipinfo.io/{ip}/{option}?token={api_key}")
            .option("json")
            .field(CountryCode, "country")
            .field(CountryName, "country")
            .field(RegionName, "region")
            .field(CityName, "city")
            .field(Latitude, "loc")
            .field(Longitude, "loc"),
    );

    // Failures come back as {"success": false, "error": {"info": "..."}}
    map.insert(
        ProviderKind::IpApi,
        ProviderTemplate::new(IpFamilies::Both, "http://api.ipapi.com/{ip}?access_key={api_key}")
            .field(CountryCode, "country_code")
            .field(CountryName, "country_name")
            .field(RegionName, "region_name")
            .field(CityName, "city")
            .field(Latitude, "latitude")
            .field(Longitude, "longitude"),
    );

    map.insert(
        ProviderKind::IpDataCo,
        ProviderTemplate::new(IpFamilies::Both, "https://api.ipdata.co/{ip}?api-key={api_key}")
            .field(ErrorMessage, "message")
            .field(CountryCode, "country_code")
            .field(CountryName, "country_name")
            .field(RegionName, "region")
            .field(CityName, "city")
            .field(Latitude, "latitude")
            .field(Longitude, "longitude"),
    );

    map.insert(
        ProviderKind::IpStack,
        ProviderTemplate::new(
            IpFamilies::Both,
            "http://api.ipstack.com/{ip}?access_key={api_key}&output={format}",
        )
        .format("json")
        .field(CountryCode, "country_code")
        .field(CountryName, "country_name")
        .field(RegionName, "region_name")
        .field(CityName, "city")
        .field(Latitude, "latitude")
        .field(Longitude, "longitude"),
    );

    map.insert(
        ProviderKind::IpInfoDb,
        ProviderTemplate::new(
            IpFamilies::Both,
            "https://api.ipinfodb.com/v3/{option}/?key={api_key}&format={format}&ip={ip}",
        )
        .format("xml")
        .option("ip-city")
        .field(ErrorMessage, "statusMessage")
        .field(CountryCode, "countryCode")
        .field(CountryName, "countryName")
        .field(RegionName, "regionName")
        .field(CityName, "cityName")
        .field(Latitude, "latitude")
        .field(Longitude, "longitude"),
    );

    map
});

/// Reduce a display name to its identity: word characters only, lowercased.
pub fn provider_identity(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}

impl ProviderKind {
    /// Resolve a display name ("IP-API.com", "ipinfo.io", ...) to a known kind.
    pub fn from_name(name: &str) -> Option<Self> {
        PROVIDER_IDENTITIES.get(provider_identity(name).as_str()).copied()
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::IpApiCom => "IP-API.com",
            ProviderKind::GeoIpLookup => "GeoIPLookup",
            ProviderKind::IpInfoIo => "ipinfo.io",
            ProviderKind::IpApi => "ipapi",
            ProviderKind::IpDataCo => "Ipdata.co",
            ProviderKind::IpStack => "ipstack",
            ProviderKind::IpInfoDb => "IPInfoDB",
            ProviderKind::Cache => CACHE_PROVIDER,
        }
    }

    /// Request/response template; the cache pseudo-provider has none.
    pub fn template(&self) -> Option<&'static ProviderTemplate> {
        BUILTIN_TEMPLATES.get(self)
    }
}
