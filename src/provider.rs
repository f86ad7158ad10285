//! Provider drivers.
//!
//! Every remote provider is a [`RemoteProvider`]: template + request builder +
//! normalizer. The few providers that need more get a small post-processing
//! step keyed on their [`ProviderKind`].

use crate::{
    catalog::ProviderKind,
    errors::GeoError,
    http::HttpFetcher,
    parser::{self, Decoded},
    request::{self, RequestArgs},
    template::ProviderTemplate,
    CanonicalLocation,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait GeoProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Full location lookup. `Err` means the provider could not be asked at all
    /// (family mismatch, transport failure); upstream failures come back as an
    /// error record.
    async fn lookup(&self, ip: &str, args: &RequestArgs) -> Result<CanonicalLocation, GeoError>;

    async fn lookup_country(&self, ip: &str, args: &RequestArgs) -> Result<Option<String>, GeoError> {
        Ok(self.lookup(ip, args).await?.country_code)
    }
}

/// Raw outcome of one upstream query, before projection.
enum Answer {
    Decoded(Decoded),
    Failed(String),
}

pub struct RemoteProvider {
    name: String,
    kind: Option<ProviderKind>,
    template: ProviderTemplate,
    api_key: Option<String>,
    fetcher: Arc<dyn HttpFetcher>,
}

impl RemoteProvider {
    /// Driver for a built-in provider.
    pub fn new(
        kind: ProviderKind,
        api_key: Option<String>,
        fetcher: Arc<dyn HttpFetcher>,
    ) -> Result<Self, GeoError> {
        let template = kind
            .template()
            .ok_or_else(|| GeoError::UnknownProvider(kind.display_name().to_string()))?
            .clone();

        let api_key = match kind {
            // IPInfoDB keys are plain word characters; drop anything else
            ProviderKind::IpInfoDb => api_key.map(|key| {
                key.chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_')
                    .collect::<String>()
            }),
            _ => api_key,
        };

        Ok(Self {
            name: kind.display_name().to_string(),
            kind: Some(kind),
            template,
            api_key,
            fetcher,
        })
    }

    /// Driver for an addon provider described only by its template.
    pub fn custom(
        name: impl Into<String>,
        template: ProviderTemplate,
        api_key: Option<String>,
        fetcher: Arc<dyn HttpFetcher>,
    ) -> Result<Self, GeoError> {
        template.validate()?;
        Ok(Self {
            name: name.into(),
            kind: None,
            template,
            api_key,
            fetcher,
        })
    }

    pub fn kind(&self) -> Option<ProviderKind> {
        self.kind
    }

    pub fn template(&self) -> &ProviderTemplate {
        &self.template
    }

    async fn query(
        &self,
        ip: &str,
        args: &RequestArgs,
        template: &ProviderTemplate,
    ) -> Result<Answer, GeoError> {
        parser::check_family(ip, template, &self.name)?;

        let url = request::build_url(ip.trim(), template, self.api_key.as_deref());
        debug!("Querying {} for {}", self.name, ip);

        let response = self.fetcher.fetch(&url, args).await?;
        if !response.is_success() {
            return Ok(Answer::Failed(format!("HTTP status {}", response.status)));
        }

        Ok(
            match parser::decode(&response.body, response.content_type.as_deref(), template) {
                Ok(decoded) => Answer::Decoded(decoded),
                Err(message) => Answer::Failed(message),
            },
        )
    }

    fn post_process(&self, template: &ProviderTemplate, answer: Answer) -> CanonicalLocation {
        let decoded = match answer {
            Answer::Decoded(decoded) => decoded,
            Answer::Failed(message) => return CanonicalLocation::error(message),
        };

        let mut location = parser::project(&decoded, template);

        match self.kind {
            Some(ProviderKind::IpInfoIo) => {
                // "loc": "35.6895,139.6917"
                if let Some(loc) = location.latitude.take() {
                    let mut parts = loc.splitn(2, ',');
                    location.latitude = parts.next().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
                    location.longitude = parts.next().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
                }
            }
            Some(ProviderKind::IpApi) if location.country_name.is_none() => {
                let info = decoded
                    .get("error")
                    .and_then(|error| error.get("info"))
                    .and_then(|info| info.as_str())
                    .map(parser::escape_html)
                    .unwrap_or_else(|| "unknown error".to_string());
                return CanonicalLocation::error(info);
            }
            _ => {}
        }

        location
    }

    /// Template for the cheaper country-only endpoint, where one exists.
    fn country_template(&self) -> Option<ProviderTemplate> {
        match self.kind {
            Some(ProviderKind::IpInfoIo) => Some(self.template.with_option("country")),
            Some(ProviderKind::IpInfoDb) => Some(self.template.with_option("ip-country")),
            _ => None,
        }
    }
}

#[async_trait]
impl GeoProvider for RemoteProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, ip: &str, args: &RequestArgs) -> Result<CanonicalLocation, GeoError> {
        let answer = self.query(ip, args, &self.template).await?;
        Ok(self.post_process(&self.template, answer))
    }

    async fn lookup_country(&self, ip: &str, args: &RequestArgs) -> Result<Option<String>, GeoError> {
        match self.country_template() {
            Some(template) => {
                let answer = self.query(ip, args, &template).await?;
                Ok(self.post_process(&template, answer).country_code)
            }
            None => Ok(self.lookup(ip, args).await?.country_code),
        }
    }
}
