//! Outbound HTTP seam. Providers only see [`HttpFetcher`]; the default
//! implementation wraps a shared `reqwest::Client`.

use crate::{config::Config, errors::GeoError, request::RequestArgs};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// What the core needs from an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, url: &str, args: &RequestArgs) -> Result<HttpResponse, GeoError>;
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(config: &Config) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .build()
            .map_err(GeoError::HttpError)?;

        info!(
            "HTTP fetcher initialized (timeout {}s, user agent '{}')",
            config.http_timeout_seconds, config.user_agent
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, args: &RequestArgs) -> Result<HttpResponse, GeoError> {
        let mut request = self.client.get(url);
        if let Some(timeout) = args.timeout {
            request = request.timeout(timeout);
        }
        for (name, value) in &args.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GeoError::Timeout
            } else {
                GeoError::HttpError(e)
            }
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(GeoError::HttpError)?;

        debug!("GET {} -> {} ({} bytes)", url, status, body.len());

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
