use axum::{
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, StatusCode},
    response::Json,
    routing::{delete, get},
    Router,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

// Garbage collection never runs more often than this
const MIN_GC_INTERVAL_SECS: u64 = 60;

use geoloc_service::{
    config::Config, errors::GeoError, metrics, GeoClient, GeoResponse, Hook, ProviderEntry,
};

#[derive(Clone)]
pub struct AppState {
    client: GeoClient,
    config: Arc<Config>,
}

// IP taken from the `/geo/:ip` path
#[derive(Debug, Clone)]
pub struct ValidatedIp(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ValidatedIp
where
    S: Send + Sync,
{
    type Rejection = GeoError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .uri
            .path()
            .strip_prefix("/geo/")
            .and_then(|rest| rest.split('/').next())
            .unwrap_or("");
        Self::validate(ip)
    }
}

impl ValidatedIp {
    pub fn validate(ip: &str) -> Result<Self, GeoError> {
        let ip = ip.trim();
        match ip.parse::<std::net::IpAddr>() {
            Ok(addr) => Ok(ValidatedIp(addr.to_string())),
            Err(_) => {
                metrics::increment_errors("invalid_ip");
                Err(GeoError::InvalidIp(ip.to_string()))
            }
        }
    }
}

// Public routes always count visits with the public hook
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GeoQuery {
    /// IPv4 or IPv6 address to locate
    ip: String,
    #[serde(default)]
    /// Skip the cache provider if true
    fresh: bool,
}

#[derive(Serialize)]
struct ProvidersResponse {
    eligible: Vec<String>,
    providers: Vec<ProviderEntry>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "geoloc_service=info,tower_http=debug".into()),
        )
        .init();

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!("Configuration loaded successfully");

    let client = GeoClient::new_with_config(config.clone()).await?;

    // Initialize metrics
    metrics::init_metrics();

    spawn_garbage_collector(client.clone(), config.cache_gc_interval_seconds);

    let app_state = AppState {
        client,
        config: config.clone(),
    };

    // Build the application
    let app = Router::new()
        .route("/geo", get(geo_lookup))
        .route("/geo/:ip", get(geo_lookup_path))
        .route("/providers", get(list_providers))
        .route("/cache", delete(clear_cache))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Geolocation service listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Metrics: http://{}/metrics", addr);

    // Graceful shutdown handling
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, gracefully shutting down...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

fn spawn_garbage_collector(client: GeoClient, interval_secs: u64) {
    let period = Duration::from_secs(interval_secs.max(MIN_GC_INTERVAL_SECS));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            match client.collect_garbage().await {
                Ok(0) => {}
                Ok(removed) => info!("Removed {} expired cache records", removed),
                Err(e) => {
                    warn!("Cache garbage collection failed: {}", e);
                    metrics::increment_errors(e.kind());
                }
            }
        }
    });
}

async fn geo_lookup(
    Query(params): Query<GeoQuery>,
    State(state): State<AppState>,
) -> Result<Json<GeoResponse>, GeoError> {
    let ip = ValidatedIp::validate(&params.ip)?.0;

    let response = match state
        .client
        .resolve_with_options(&ip, Hook::Public, false, params.fresh)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            metrics::increment_errors(e.kind());
            return Err(e);
        }
    };

    track_resolution(&response);

    Ok(Json(response))
}

// Record what a resolution did
fn track_resolution(response: &GeoResponse) {
    metrics::increment_requests(response.provider.as_deref());

    if response.cached {
        metrics::increment_cache_hits();
    } else {
        metrics::increment_cache_misses();
    }

    if response.provider.is_none() {
        metrics::increment_errors("unresolved");
    }

    metrics::record_query_time(response.query_time_ms);
}

async fn geo_lookup_path(
    validated_ip: ValidatedIp,
    State(state): State<AppState>,
) -> Result<Json<GeoResponse>, GeoError> {
    let query = GeoQuery {
        ip: validated_ip.0,
        fresh: false,
    };
    geo_lookup(Query(query), State(state)).await
}

async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        eligible: state.client.eligible_providers(),
        providers: state.client.registry().providers(false, true, true),
    })
}

async fn clear_cache(State(state): State<AppState>) -> Result<StatusCode, GeoError> {
    state.client.clear_cache().await.map_err(|e| {
        metrics::increment_errors(e.kind());
        e
    })?;
    info!("Cache cleared");
    Ok(StatusCode::NO_CONTENT)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.config.start_time.elapsed().as_secs(),
    })
}
