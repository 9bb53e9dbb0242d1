#![forbid(unsafe_code)]

//! Axum backend that ranks videos by viral ratio.
//!
//! Two entry points share the same scorer: `POST /api/viral/rank` ranks a
//! batch supplied by the caller, and `GET /api/youtube/viral` ranks fresh
//! candidates pulled from the YouTube Data API. Scoring itself is pure; the
//! only shared state here is a short-lived cache of provider responses.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{error, info, warn};
use viraltube_tools::{
    ScoringError,
    config::{RuntimeOverrides, RuntimeSettings, non_blank, resolve_runtime_settings},
    logging::init_tracing,
    metadata::{ScoredVideo, VideoMetadata, parse_batch},
    ranking::{QueryScope, RankOptions, ViralScorer},
    window::TimeWindow,
    youtube::{AudienceFilter, YouTubeClient},
};

#[derive(Debug, Clone, Default, PartialEq)]
struct BackendArgs {
    host: Option<IpAddr>,
    port: Option<u16>,
    env_path: Option<PathBuf>,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--host=") {
                parsed.host = Some(parse_host_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                parsed.port = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env-file=") {
                parsed.env_path = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    parsed.host = Some(parse_host_arg(&value)?);
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    parsed.port = Some(parse_port_arg(&value)?);
                }
                "--env-file" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--env-file requires a value"))?;
                    parsed.env_path = Some(PathBuf::from(value));
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }
        Ok(parsed)
    }

    fn overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            viral_host: self.host.map(|host| host.to_string()),
            viral_port: self.port,
            env_path: self.env_path.clone(),
            ..RuntimeOverrides::default()
        }
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/VIRAL_HOST")
}

/// Provider responses keyed by window and lowercased query.
struct ProviderCache {
    ttl: Duration,
    entries: RwLock<HashMap<(TimeWindow, String), CachedBatch>>,
}

struct CachedBatch {
    fetched_at: Instant,
    records: Arc<Vec<VideoMetadata>>,
}

impl ProviderCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn key(window: TimeWindow, query: Option<&str>) -> (TimeWindow, String) {
        (window, query.unwrap_or_default().to_lowercase())
    }

    fn get(&self, key: &(TimeWindow, String)) -> Option<Arc<Vec<VideoMetadata>>> {
        if self.ttl.is_zero() {
            return None;
        }
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.records))
    }

    fn insert(&self, key: (TimeWindow, String), records: Arc<Vec<VideoMetadata>>) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.write();
        entries.retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        entries.insert(
            key,
            CachedBatch {
                fetched_at: Instant::now(),
                records,
            },
        );
    }
}

/// Shared state injected into every Axum handler.
#[derive(Clone)]
struct AppState {
    rank_options: RankOptions,
    provider_options: RankOptions,
    max_results: usize,
    youtube: Option<Arc<YouTubeClient>>,
    cache: Arc<ProviderCache>,
}

impl AppState {
    fn from_settings(settings: &RuntimeSettings) -> Self {
        let query_scope = if settings.match_channel {
            QueryScope::TitleAndChannel
        } else {
            QueryScope::Title
        };
        let rank_options = RankOptions {
            query_scope,
            ..RankOptions::default()
        };
        let provider_options = RankOptions {
            candidate_pool: Some(settings.candidate_pool),
            ..rank_options.clone()
        };
        let audience = AudienceFilter {
            countries: settings.target_countries.clone(),
            language: settings.audience_language.clone(),
        };
        let youtube = settings
            .youtube_api_key
            .as_ref()
            .map(|key| Arc::new(YouTubeClient::new(key.clone(), audience)));

        Self {
            rank_options,
            provider_options,
            max_results: settings.max_results,
            youtube,
            cache: Arc::new(ProviderCache::new(Duration::from_secs(
                settings.cache_ttl_secs,
            ))),
        }
    }

    async fn fetch_candidates(
        &self,
        client: Arc<YouTubeClient>,
        window: TimeWindow,
        query: Option<String>,
    ) -> ApiResult<Arc<Vec<VideoMetadata>>> {
        let key = ProviderCache::key(window, query.as_deref());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let now = Utc::now();
        let fetched =
            tokio::task::spawn_blocking(move || client.fetch_recent(window, query.as_deref(), now))
                .await
                .map_err(|err| ApiError::internal(format!("provider task failed: {err}")))?
                .map_err(|err| {
                    warn!(error = %format!("{err:#}"), window = %window, "YouTube fetch failed");
                    ApiError::bad_gateway(format!("{err:#}"))
                })?;

        let records = Arc::new(fetched);
        self.cache.insert(key, Arc::clone(&records));
        Ok(records)
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ScoringError> for ApiError {
    fn from(err: ScoringError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "request failed");
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct VideosEnvelope {
    videos: Vec<ScoredVideo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RankRequest {
    #[serde(default)]
    videos: serde_json::Value,
    #[serde(default)]
    time_filter: Option<String>,
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    match_channel: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViralQuery {
    time_filter: Option<String>,
    max_results: Option<usize>,
    q: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BackendArgs::parse()?;
    let settings = resolve_runtime_settings(args.overrides())?;
    init_tracing(&settings.log_filter, settings.log_format)?;

    let host = parse_host_arg(&settings.viral_host)?;
    let state = AppState::from_settings(&settings);
    if state.youtube.is_none() {
        warn!("YOUTUBE_API_KEY not set; /api/youtube/viral will answer 503");
    }

    let addr = SocketAddr::new(host, settings.viral_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(%addr, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/viral/rank", post(rank_videos))
        .route("/api/youtube/viral", get(youtube_viral))
        .fallback(api_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn api_fallback() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn parse_window(filter: Option<&str>) -> ApiResult<TimeWindow> {
    match filter {
        Some(value) => Ok(value.parse::<TimeWindow>()?),
        None => Ok(TimeWindow::default()),
    }
}

async fn rank_videos(
    State(state): State<AppState>,
    payload: Result<Json<RankRequest>, JsonRejection>,
) -> ApiResult<Json<VideosEnvelope>> {
    let Json(request) = payload?;
    let window = parse_window(request.time_filter.as_deref())?;
    let records = parse_batch(request.videos)?;

    let mut options = state.rank_options.clone();
    if let Some(match_channel) = request.match_channel {
        options.query_scope = if match_channel {
            QueryScope::TitleAndChannel
        } else {
            QueryScope::Title
        };
    }

    let videos = ViralScorer::new(options).rank(
        &records,
        window,
        request.q.as_deref(),
        request.max_results,
        Utc::now(),
    );
    Ok(Json(VideosEnvelope { videos }))
}

async fn youtube_viral(
    State(state): State<AppState>,
    params: Result<Query<ViralQuery>, QueryRejection>,
) -> ApiResult<Json<VideosEnvelope>> {
    let Query(params) = params?;
    let window = parse_window(params.time_filter.as_deref())?;
    let Some(client) = state.youtube.clone() else {
        return Err(ApiError::unavailable(
            "YouTube API not configured. Please set YOUTUBE_API_KEY.",
        ));
    };

    let query = non_blank(params.q);
    let records = state.fetch_candidates(client, window, query).await?;
    let limit = params.max_results.unwrap_or(state.max_results);

    // The provider already matched the query against more than titles, so
    // the candidates are not filtered by it again.
    let videos = ViralScorer::new(state.provider_options.clone()).rank(
        &records,
        window,
        None,
        Some(limit),
        Utc::now(),
    );
    Ok(Json(VideosEnvelope { videos }))
}
