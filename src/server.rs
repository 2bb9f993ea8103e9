//! JSON-over-HTTP front end for the [`Engine`].
//!
//! One POST endpoint. The body is a JSON object whose input field holds the
//! text; the reply is `{"error": false, "type": <plugin>, "data": <data>}`
//! on success and `{"error": true, "message": <text>}` with status 400 on
//! any failure. When a memory service is bound, its token header is read
//! from the request and written back on the response.

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::request::Request;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    input_field: Arc<str>,
}

#[derive(Debug, Serialize)]
struct Success {
    error: bool,
    #[serde(rename = "type")]
    kind: String,
    data: Value,
}

/// Client-visible failure. Always a 400.
#[derive(Debug)]
pub struct ApiError {
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": true, "message": self.message })),
        )
            .into_response()
    }
}

/// Build the router for `engine` as described by `config`.
pub fn build_router(engine: Arc<Engine>, config: &ServerConfig) -> Result<Router> {
    let expose = engine.memory().map(|m| m.token_header().to_string());
    let state = AppState {
        engine,
        input_field: Arc::from(config.input_field()),
    };

    let mut router = Router::new()
        .route(&config.endpoint_path(), post(process).fallback(not_found))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let origins = config.cors_origins();
    if !origins.is_empty() {
        router = router.layer(cors_layer(&origins, expose.as_deref())?);
    }
    Ok(router)
}

fn cors_layer(origins: &[&str], token_header: Option<&str>) -> Result<CorsLayer> {
    let allow_origin = if origins.contains(&"*") {
        AllowOrigin::any()
    } else {
        let parsed = origins
            .iter()
            .map(|o| HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin '{o}'")))
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(parsed)
    };

    let mut layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if let Some(header) = token_header {
        let name = HeaderName::try_from(header)
            .with_context(|| format!("invalid token header '{header}'"))?;
        layer = layer.expose_headers([name]);
    }
    Ok(layer)
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let missing = || {
        ApiError::bad_request(format!(
            "{} field is mandatory and can not be empty",
            state.input_field
        ))
    };

    let input: serde_json::Map<String, Value> =
        serde_json::from_slice(&body).map_err(|_| missing())?;
    let text = input
        .get(state.input_field.as_ref())
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(missing)?;

    let mut req = Request::with_headers(text, headers);
    let memory = state.engine.memory();
    if let Some(memory) = &memory {
        req.token = req
            .header(memory.token_header())
            .unwrap_or_default()
            .to_string();
    }

    let processed = state.engine.process(&mut req).await.map_err(|e| {
        debug!(error = %e, "request failed");
        ApiError::bad_request(e.to_string())
    })?;

    let mut response = Json(Success {
        error: false,
        kind: processed.plugin,
        data: processed.data,
    })
    .into_response();

    if let Some(memory) = memory.filter(|_| !req.token.is_empty()) {
        let name = HeaderName::try_from(memory.token_header());
        let value = HeaderValue::from_str(&req.token);
        if let (Ok(name), Ok(value)) = (name, value) {
            response.headers_mut().insert(name, value);
        }
    }

    Ok(response)
}

/// Schedule the engine's pokes, then serve until Ctrl+C.
pub async fn serve(engine: Arc<Engine>, config: &ServerConfig) -> Result<()> {
    let app = build_router(Arc::clone(&engine), config)?;
    let _pokes = engine.schedule_pokes();

    let listener = tokio::net::TcpListener::bind(config.addr())
        .await
        .with_context(|| format!("failed to bind {}", config.addr()))?;
    info!(
        addr = %listener.local_addr()?,
        endpoint = %config.endpoint_path(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("server error")
}
