// src/api.rs
//! Read-only HTTP surface: liveness plus the market analytics views.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

use crate::analytics::{Analytics, DEFAULT_CHATTER_LIMIT};
use crate::clock::Clock;
use crate::error::{AnalyticsError, InputError, ValueError};
use crate::forecast::HISTORY_LOOKBACK_HOURS;
use crate::market::{CachedValue, ValueCache};
use crate::store::Observation;

const DEFAULT_SENTIMENT_HOURS: i64 = 24;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ValueCache>,
    pub analytics: Arc<Analytics>,
    pub clock: Arc<dyn Clock>,
    /// Cancelled on shutdown; aborts in-flight quote refreshes.
    pub cancel: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/coins/{coin}/price", get(coin_price))
        .route("/api/coins/{coin}/change24h", get(coin_change_24h))
        .route("/api/coins/{coin}/sentiment", get(coin_sentiment))
        .route("/api/coins/{coin}/history", get(coin_history))
        .route("/api/chatter", get(chatter))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// API-layer error type
#[derive(Debug)]
pub enum ApiError {
    /// 400 - invalid input
    BadRequest(String),
    /// 404 - no data for the request
    NotFound(String),
    /// 503 - store unavailable
    Unavailable(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
        };
        debug!(target: "api", status = status.as_u16(), %message, "request failed");
        let body = ErrorBody {
            error: error_type.into(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<InputError> for ApiError {
    fn from(err: InputError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<ValueError> for ApiError {
    fn from(err: ValueError) -> Self {
        match err {
            ValueError::Input(e) => e.into(),
            e @ ValueError::NoObservation { .. } => ApiError::NotFound(e.to_string()),
            ValueError::Store(e) => ApiError::Unavailable(e.to_string()),
        }
    }
}

impl From<AnalyticsError> for ApiError {
    fn from(err: AnalyticsError) -> Self {
        match err {
            AnalyticsError::Input(e) => e.into(),
            AnalyticsError::Store(e) => ApiError::Unavailable(e.to_string()),
        }
    }
}

async fn coin_price(
    State(state): State<AppState>,
    Path(coin): Path<String>,
) -> Result<Json<CachedValue>, ApiError> {
    let v = state.cache.get_value(&coin, &state.cancel).await?;
    Ok(Json(v))
}

#[derive(Serialize)]
struct ChangeOut {
    coin: String,
    change_24h: f64,
}

async fn coin_change_24h(
    State(state): State<AppState>,
    Path(coin): Path<String>,
) -> Result<Json<ChangeOut>, ApiError> {
    match state.analytics.percent_change_24h(&coin).await? {
        Some(change_24h) => Ok(Json(ChangeOut {
            coin: coin.trim().to_string(),
            change_24h,
        })),
        None => Err(ApiError::NotFound(format!(
            "not enough observations for {}",
            coin.trim()
        ))),
    }
}

#[derive(Deserialize)]
struct SentimentQuery {
    hours: Option<i64>,
}

#[derive(Serialize)]
struct SentimentOut {
    coin: String,
    hours: i64,
    score: i64,
}

async fn coin_sentiment(
    State(state): State<AppState>,
    Path(coin): Path<String>,
    Query(q): Query<SentimentQuery>,
) -> Result<Json<SentimentOut>, ApiError> {
    let hours = q.hours.unwrap_or(DEFAULT_SENTIMENT_HOURS);
    let score = state.analytics.sentiment_score(&coin, hours).await?;
    Ok(Json(SentimentOut {
        coin: coin.trim().to_string(),
        hours,
        score,
    }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    since: Option<i64>,
}

#[derive(Serialize)]
struct HistoryOut {
    coin: String,
    since: DateTime<Utc>,
    observations: Vec<Observation>,
}

async fn coin_history(
    State(state): State<AppState>,
    Path(coin): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryOut>, ApiError> {
    let (since, observations) = match q.since {
        Some(ts) => {
            let rows = state.analytics.historical_window_unix(&coin, ts).await?;
            let since = DateTime::<Utc>::from_timestamp(ts, 0).ok_or(InputError::TimestampOutOfRange(ts))?;
            (since, rows)
        }
        None => {
            let since = state.clock.now() - chrono::Duration::hours(HISTORY_LOOKBACK_HOURS);
            (since, state.analytics.historical_window(&coin, since).await?)
        }
    };
    Ok(Json(HistoryOut {
        coin: coin.trim().to_string(),
        since,
        observations,
    }))
}

#[derive(Deserialize)]
struct ChatterQuery {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct ChatterOut {
    sources: Vec<String>,
}

async fn chatter(
    State(state): State<AppState>,
    Query(q): Query<ChatterQuery>,
) -> Result<Json<ChatterOut>, ApiError> {
    let limit = match q.limit {
        None => DEFAULT_CHATTER_LIMIT,
        Some(n) if n <= 0 => return Err(InputError::NonPositiveLimit.into()),
        Some(n) => u32::try_from(n).unwrap_or(u32::MAX),
    };
    let sources = state.analytics.recent_non_neutral_sources(limit).await?;
    Ok(Json(ChatterOut { sources }))
}
