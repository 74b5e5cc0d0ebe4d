use crate::error::{BridgeError, BridgeResult};
use crate::state::BridgeState;
use crate::tokens::{PlaybackGrant, Verification};
use crate::types::*;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use stream_probe::{ProbeReport, ProbeRequest};
use telemetry::metrics::{encode_metrics, BRIDGE_DEVICES, BRIDGE_DEVICE_BITRATE, BRIDGE_DEVICE_FPS};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/devices", post(create_device).get(list_devices))
        .route("/devices/:id", get(get_device))
        .route("/devices/:id/status", get(device_status))
        .route("/devices/:id/start", post(start_device))
        .route("/devices/:id/stop", post(stop_device))
        .route("/devices/:id/metrics", post(record_metrics))
        .route("/devices/:id/discover", post(discover_device))
        .route("/streams/:id/token", post(issue_token))
        .route("/streams/:id/authorize", get(authorize_stream))
        .route("/webhooks/device-offline", post(device_offline))
        .route("/probe", post(probe))
        .layer(middleware::from_fn(telemetry::trace_http_request))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Required JSON body. Decode errors answer 400 with the usual error envelope.
fn parse_json<T: DeserializeOwned>(body: &Bytes) -> BridgeResult<T> {
    serde_json::from_slice(body).map_err(|e| BridgeError::validation(format!("invalid request body: {e}")))
}

/// Optional JSON body: empty means defaults.
fn parse_optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> BridgeResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_json(body)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn readyz(State(state): State<BridgeState>) -> impl IntoResponse {
    match state.repo.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Err(e) => {
            error!(error = %e, "readyz check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "not ready", "error": format!("{e:#}")})),
            )
        }
    }
}

async fn metrics(State(state): State<BridgeState>) -> BridgeResult<impl IntoResponse> {
    let devices = state.repo.list().await?;
    BRIDGE_DEVICES.set(devices.len() as i64);
    BRIDGE_DEVICE_FPS.reset();
    BRIDGE_DEVICE_BITRATE.reset();
    for device in &devices {
        BRIDGE_DEVICE_FPS
            .with_label_values(&[device.id.as_str()])
            .set(device.status.fps);
        BRIDGE_DEVICE_BITRATE
            .with_label_values(&[device.id.as_str()])
            .set(device.status.bitrate_kbps as f64);
    }

    let body = encode_metrics().map_err(|e| BridgeError::internal(format!("failed to encode metrics: {e}")))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

async fn create_device(
    State(state): State<BridgeState>,
    body: Bytes,
) -> BridgeResult<(StatusCode, Json<Device>)> {
    let req: CreateDeviceRequest = parse_json(&body)?;
    let device = state.orchestrator.create_device(req).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

async fn list_devices(State(state): State<BridgeState>) -> BridgeResult<Json<Vec<Device>>> {
    Ok(Json(state.orchestrator.list_devices().await?))
}

async fn get_device(
    State(state): State<BridgeState>,
    Path(id): Path<String>,
) -> BridgeResult<Json<Device>> {
    Ok(Json(state.orchestrator.get_device(&id).await?))
}

async fn device_status(
    State(state): State<BridgeState>,
    Path(id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> BridgeResult<Json<DeviceStatus>> {
    Ok(Json(state.orchestrator.status(&id, query.refresh).await?))
}

async fn start_device(
    State(state): State<BridgeState>,
    Path(id): Path<String>,
    body: Bytes,
) -> BridgeResult<Json<Device>> {
    let req: StartRequest = parse_optional_json(&body)?;
    Ok(Json(state.orchestrator.start(&id, req).await?))
}

async fn stop_device(
    State(state): State<BridgeState>,
    Path(id): Path<String>,
) -> BridgeResult<Json<Device>> {
    Ok(Json(state.orchestrator.stop(&id).await?))
}

async fn record_metrics(
    State(state): State<BridgeState>,
    Path(id): Path<String>,
    body: Bytes,
) -> BridgeResult<Json<Device>> {
    let update: MetricsUpdate = parse_json(&body)?;
    Ok(Json(state.orchestrator.record_metrics(&id, update).await?))
}

async fn discover_device(
    State(state): State<BridgeState>,
    Path(id): Path<String>,
    body: Bytes,
) -> BridgeResult<Json<ProbeReport>> {
    let req: DiscoverRequest = parse_optional_json(&body)?;
    let report = state.orchestrator.discover(&id, req, &state.scheduler).await?;
    Ok(Json(report))
}

async fn issue_token(
    State(state): State<BridgeState>,
    Path(id): Path<String>,
    body: Bytes,
) -> BridgeResult<Json<PlaybackGrant>> {
    let req: TokenRequest = parse_optional_json(&body)?;
    state.orchestrator.get_device(&id).await?;

    Ok(Json(state.tokens.issue(&id, req.scope.as_deref())?))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

async fn authorize_stream(
    State(state): State<BridgeState>,
    Path(id): Path<String>,
    Query(query): Query<AuthorizeQuery>,
    headers: HeaderMap,
) -> BridgeResult<Json<Value>> {
    if !state.tokens.verification_enabled() {
        warn!(camera_id = %id, "playback token verification disabled, allowing request");
        return Ok(Json(json!({"authorized": true, "verification": "disabled"})));
    }

    let token = query
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| BridgeError::Unauthorized("missing playback token".to_string()))?;

    match state.tokens.verify(&token, &id, query.target)? {
        Verification::Verified(claims) => Ok(Json(json!({
            "authorized": true,
            "verification": "verified",
            "camera_id": claims.sub,
            "scope": claims.scope,
            "expires_at": claims.exp,
        }))),
        Verification::Disabled => Ok(Json(json!({"authorized": true, "verification": "disabled"}))),
    }
}

async fn device_offline(
    State(state): State<BridgeState>,
    body: Bytes,
) -> BridgeResult<Json<Device>> {
    let webhook: OfflineWebhook = parse_json(&body)?;
    Ok(Json(state.orchestrator.mark_offline(webhook).await?))
}

async fn probe(
    State(state): State<BridgeState>,
    body: Bytes,
) -> BridgeResult<Json<ProbeReport>> {
    let req: ProbeRequest = parse_json(&body)?;
    let report = state
        .scheduler
        .run(&req)
        .await
        .map_err(|e| BridgeError::validation(e.to_string()))?;
    info!(outcome = report.outcome.as_str(), tried = report.candidates_tried, "ad-hoc probe finished");
    Ok(Json(report))
}
