use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{error, info, warn, Instrument};

use crate::correlation::{extract_or_generate_correlation_id, CorrelationId, X_CORRELATION_ID};

/// Axum middleware: logs every request with its latency and echoes the correlation id.
pub async fn trace_http_request(mut req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let correlation_id = extract_or_generate_correlation_id(req.headers());
    req.extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let span = tracing::info_span!(
        "http_request",
        method = %method,
        uri = %uri,
        correlation_id = %correlation_id,
    );
    let mut response = next.run(req).instrument(span).await;

    let latency_ms = start.elapsed().as_millis();
    let status = response.status();

    if status.is_server_error() {
        error!(
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            latency_ms = %latency_ms,
            correlation_id = %correlation_id,
            "HTTP request failed (server error)"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            latency_ms = %latency_ms,
            correlation_id = %correlation_id,
            "HTTP request failed (client error)"
        );
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            latency_ms = %latency_ms,
            correlation_id = %correlation_id,
            "HTTP request completed"
        );
    }

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(X_CORRELATION_ID, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    async fn test_handler() -> &'static str {
        "ok"
    }

    #[tokio::test]
    async fn test_trace_http_request_adds_correlation_header() {
        let app = Router::new()
            .route("/health", get(test_handler))
            .layer(axum::middleware::from_fn(trace_http_request));

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("BUG: request should build successfully");

        let response = app.oneshot(request).await.expect("BUG: request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_CORRELATION_ID));
    }

    #[tokio::test]
    async fn test_correlation_id_propagation() {
        let app = Router::new()
            .route("/health", get(test_handler))
            .layer(axum::middleware::from_fn(trace_http_request));

        let request = Request::builder()
            .uri("/health")
            .header(X_CORRELATION_ID, "probe-run-42")
            .body(Body::empty())
            .expect("BUG: request should build successfully");

        let response = app.oneshot(request).await.expect("BUG: request should succeed");

        let correlation_id = response
            .headers()
            .get(X_CORRELATION_ID)
            .and_then(|v| v.to_str().ok());
        assert_eq!(correlation_id, Some("probe-run-42"));
    }

    async fn current_span_name() -> String {
        tracing::Span::current()
            .metadata()
            .map(|m| m.name())
            .unwrap_or("none")
            .to_string()
    }

    #[tokio::test]
    async fn handler_runs_inside_request_span() {
        let _subscriber = tracing::subscriber::set_default(tracing_subscriber::registry());
        let app = Router::new()
            .route("/span", get(current_span_name))
            .layer(axum::middleware::from_fn(trace_http_request));

        let request = Request::builder()
            .uri("/span")
            .body(Body::empty())
            .expect("BUG: request should build successfully");

        let response = app.oneshot(request).await.expect("BUG: request should succeed");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("BUG: body should be readable");
        assert_eq!(&body[..], b"http_request");
    }
}
