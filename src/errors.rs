#[cfg(feature = "server")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
#[cfg(feature = "server")]
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Invalid IP address: {0}")]
    InvalidIp(String),

    #[error("{provider} does not support the address family of {ip}")]
    FamilyMismatch { ip: String, provider: String },

    #[error("Network timeout")]
    Timeout,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("No eligible geolocation provider")]
    NoEligibleProvider,

    #[error("All providers failed for {0}")]
    ProvidersExhausted(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid provider template: {0}")]
    InvalidTemplate(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Cache store error: {0}")]
    StoreError(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<tokio::time::error::Elapsed> for GeoError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GeoError::Timeout
    }
}

impl GeoError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GeoError::InvalidIp(_) => "invalid_ip",
            GeoError::FamilyMismatch { .. } => "family_mismatch",
            GeoError::Timeout => "timeout",
            GeoError::HttpError(_) => "transport",
            GeoError::NoEligibleProvider => "no_eligible_provider",
            GeoError::ProvidersExhausted(_) => "providers_exhausted",
            GeoError::UnknownProvider(_) => "unknown_provider",
            GeoError::InvalidTemplate(_) => "invalid_template",
            GeoError::IoError(_) => "io_error",
            GeoError::JsonError(_) => "json_error",
            GeoError::ConfigError(_) => "config_error",
            GeoError::StoreError(_) => "store_error",
            GeoError::Internal(_) => "internal",
        }
    }
}

#[cfg(feature = "server")]
impl IntoResponse for GeoError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            GeoError::InvalidIp(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            GeoError::UnknownProvider(_) => (StatusCode::NOT_FOUND, self.to_string()),
            GeoError::Timeout => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            GeoError::NoEligibleProvider | GeoError::ProvidersExhausted(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
