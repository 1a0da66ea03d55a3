//! HTTP query surface with JSON endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::channel::Channel;
use crate::error::BridgeError;
use crate::query::QueryService;

/// Text served on `/`
pub const LIVENESS_TEXT: &str = "MQTT to HTTP sensor bridge";

/// API application state
#[derive(Clone)]
pub struct ApiState {
    pub query: Arc<QueryService>,
}

/// Build the axum router
pub fn build_router(query: Arc<QueryService>) -> Router {
    let api_state = ApiState { query };

    Router::new()
        .route("/", get(index_handler))
        .route("/temperatura", get(temperature_handler))
        .route("/humedad", get(humidity_handler))
        .route("/humedad_tierra", get(soil_moisture_handler))
        .route("/mediana", get(median_handler))
        .route("/health", get(health_handler))
        .with_state(api_state)
}

/// Structured JSON error body
fn error_response(err: BridgeError) -> Response {
    let (status, code) = match &err {
        BridgeError::InsufficientData(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "insufficient_data")
        }
        BridgeError::StoreUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("Query failed: {}", err);
    } else {
        tracing::debug!("Query not served: {}", err);
    }

    (
        status,
        Json(serde_json::json!({
            "error": code,
            "message": err.to_string(),
        })),
    )
        .into_response()
}

async fn index_handler() -> impl IntoResponse {
    LIVENESS_TEXT
}

async fn temperature_handler(State(api): State<ApiState>) -> Response {
    match api.query.current_snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e),
    }
}

async fn humidity_handler(State(api): State<ApiState>) -> Response {
    history_response(&api, Channel::Humidity).await
}

async fn soil_moisture_handler(State(api): State<ApiState>) -> Response {
    history_response(&api, Channel::SoilMoisture).await
}

async fn history_response(api: &ApiState, channel: Channel) -> Response {
    let n = api.query.history_size();
    match api.query.latest_n(channel, n).await {
        Ok(readings) if readings.is_empty() => error_response(BridgeError::InsufficientData(
            format!("no {} readings stored", channel),
        )),
        Ok(readings) => Json(readings).into_response(),
        Err(e) => error_response(e),
    }
}

async fn median_handler(State(api): State<ApiState>) -> Response {
    let n = api.query.history_size();
    match api.query.latest_medians(n).await {
        Ok(medians) if medians.is_empty() => error_response(BridgeError::InsufficientData(
            "no medians recorded".to_string(),
        )),
        Ok(medians) => Json(medians).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}
