use crate::template::{
    ProviderTemplate, API_KEY_PLACEHOLDER, FORMAT_PLACEHOLDER, IP_PLACEHOLDER, OPTION_PLACEHOLDER,
};
use std::time::Duration;

/// Per-call arguments handed to the transport.
#[derive(Debug, Clone, Default)]
pub struct RequestArgs {
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

impl RequestArgs {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Substitute the IP, API key, format and option into the template's URL pattern.
///
/// Pure string substitution; a malformed pattern yields an unusable URL rather
/// than an error (templates are checked by [`ProviderTemplate::validate`]).
pub fn build_url(ip: &str, template: &ProviderTemplate, api_key: Option<&str>) -> String {
    // {ip} goes last so an address can never be mistaken for another placeholder
    template
        .url_pattern()
        .replace(API_KEY_PLACEHOLDER, api_key.unwrap_or(""))
        .replace(FORMAT_PLACEHOLDER, template.format_value())
        .replace(OPTION_PLACEHOLDER, template.option_value())
        .replace(IP_PLACEHOLDER, ip)
}
