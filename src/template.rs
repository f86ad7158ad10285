//! Declarative provider templates.
//!
//! A template says how to reach one upstream service (URL pattern with
//! placeholders, supported address families) and how to read its answer
//! (canonical field → upstream field map).

use crate::{errors::GeoError, request};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::BTreeMap, net::IpAddr};
use url::Url;

pub const IP_PLACEHOLDER: &str = "{ip}";
pub const API_KEY_PLACEHOLDER: &str = "{api_key}";
pub const FORMAT_PLACEHOLDER: &str = "{format}";
pub const OPTION_PLACEHOLDER: &str = "{option}";

const KNOWN_PLACEHOLDERS: [&str; 4] = [
    IP_PLACEHOLDER,
    API_KEY_PLACEHOLDER,
    FORMAT_PLACEHOLDER,
    OPTION_PLACEHOLDER,
];

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^{}]*\}").expect("Failed to compile placeholder regex"));

/// Address families a provider can answer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpFamilies {
    V4,
    V6,
    Both,
}

impl IpFamilies {
    pub fn supports(&self, ip: &IpAddr) -> bool {
        matches!(
            (self, ip),
            (IpFamilies::Both, _) | (IpFamilies::V4, IpAddr::V4(_)) | (IpFamilies::V6, IpAddr::V6(_))
        )
    }
}

/// Fields of the canonical location schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CanonicalField {
    ErrorMessage,
    CountryCode,
    CountryName,
    RegionName,
    CityName,
    Latitude,
    Longitude,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 7] = [
        CanonicalField::ErrorMessage,
        CanonicalField::CountryCode,
        CanonicalField::CountryName,
        CanonicalField::RegionName,
        CanonicalField::CityName,
        CanonicalField::Latitude,
        CanonicalField::Longitude,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::ErrorMessage => "errorMessage",
            CanonicalField::CountryCode => "countryCode",
            CanonicalField::CountryName => "countryName",
            CanonicalField::RegionName => "regionName",
            CanonicalField::CityName => "cityName",
            CanonicalField::Latitude => "latitude",
            CanonicalField::Longitude => "longitude",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTemplate {
    families: IpFamilies,
    url: Cow<'static, str>,
    format: Cow<'static, str>,
    option: Cow<'static, str>,
    fields: BTreeMap<CanonicalField, Cow<'static, str>>,
}

impl ProviderTemplate {
    pub fn new(families: IpFamilies, url: impl Into<Cow<'static, str>>) -> Self {
        Self {
            families,
            url: url.into(),
            format: Cow::Borrowed(""),
            option: Cow::Borrowed(""),
            fields: BTreeMap::new(),
        }
    }

    pub fn format(mut self, format: impl Into<Cow<'static, str>>) -> Self {
        self.format = format.into();
        self
    }

    pub fn option(mut self, option: impl Into<Cow<'static, str>>) -> Self {
        self.option = option.into();
        self
    }

    pub fn field(mut self, canonical: CanonicalField, upstream: impl Into<Cow<'static, str>>) -> Self {
        self.fields.insert(canonical, upstream.into());
        self
    }

    /// Copy of this template with a different `{option}` value.
    pub fn with_option(&self, option: impl Into<Cow<'static, str>>) -> Self {
        self.clone().option(option)
    }

    pub fn families(&self) -> IpFamilies {
        self.families
    }

    pub fn url_pattern(&self) -> &str {
        &self.url
    }

    pub fn format_value(&self) -> &str {
        &self.format
    }

    pub fn option_value(&self) -> &str {
        &self.option
    }

    /// Upstream key mapped to a canonical field, if any.
    pub fn upstream(&self, field: CanonicalField) -> Option<&str> {
        self.fields
            .get(&field)
            .map(|name| name.as_ref())
            .filter(|name| !name.is_empty())
    }

    pub fn fields(&self) -> impl Iterator<Item = (CanonicalField, &str)> {
        self.fields
            .iter()
            .filter(|(_, upstream)| !upstream.is_empty())
            .map(|(field, upstream)| (*field, upstream.as_ref()))
    }

    /// Reject templates that could never produce a usable request.
    pub fn validate(&self) -> Result<(), GeoError> {
        if !self.url.contains(IP_PLACEHOLDER) {
            return Err(GeoError::InvalidTemplate(format!(
                "URL pattern '{}' has no {} placeholder",
                self.url, IP_PLACEHOLDER
            )));
        }

        if let Some(unknown) = PLACEHOLDER_RE
            .find_iter(&self.url)
            .map(|m| m.as_str())
            .find(|token| !KNOWN_PLACEHOLDERS.contains(token))
        {
            return Err(GeoError::InvalidTemplate(format!(
                "unknown placeholder {} in '{}'",
                unknown, self.url
            )));
        }

        let sample = request::build_url("192.0.2.1", self, Some("key"));
        let parsed = Url::parse(&sample).map_err(|e| {
            GeoError::InvalidTemplate(format!("'{}' is not a valid URL: {}", sample, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GeoError::InvalidTemplate(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        if self.fields().next().is_none() {
            return Err(GeoError::InvalidTemplate(format!(
                "template for '{}' maps no fields",
                self.url
            )));
        }

        Ok(())
    }
}
