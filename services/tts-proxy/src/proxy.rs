//! HTTP proxy logic
//!
//! Forwards inbound requests to the ElevenLabs API with a key drawn from the
//! pool, then reports the outcome back to the pool. Request and response
//! bodies are relayed as opaque bytes; upstream error statuses pass through
//! verbatim.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use key_pool::{KeyPool, PoolStatus};
use tracing::{error, info, instrument, warn};

use crate::metrics::{self, InFlightGuard};

/// Header ElevenLabs reads the API key from.
pub const API_KEY_HEADER: &str = "xi-api-key";

/// Largest request body accepted for forwarding.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Upstream body text kept in a key's last error.
const ERROR_EXCERPT_CHARS: usize = 200;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub upstream_url: String,
    pub timeout: Duration,
    pub pool: Arc<KeyPool>,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
}

impl ProxyState {
    fn count_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }
}

/// JSON error body: {"error":{"type":"...","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// 503 for an exhausted pool, with `Retry-After` when a cooldown will end.
fn exhausted_response(status: &PoolStatus, request_id: &str) -> Response {
    let mut response = error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        "keys_exhausted",
        "no API key available, retry later",
        request_id,
    );
    if let Some(secs) = retry_after_secs(status) {
        response
            .headers_mut()
            .insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

/// Seconds until the earliest cooldown ends, if any key is cooling down.
fn retry_after_secs(status: &PoolStatus) -> Option<u64> {
    status
        .keys
        .iter()
        .filter_map(|k| k.cooldown_remaining_secs)
        .min()
        .map(|secs| secs.max(1))
}

/// Failure text stored against a key for a non-2xx upstream response.
pub fn describe_failure(status: StatusCode, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let excerpt: String = text.trim().chars().take(ERROR_EXCERPT_CHARS).collect();
    if excerpt.is_empty() {
        format!("upstream returned {status}")
    } else {
        format!("upstream returned {status}: {excerpt}")
    }
}

/// Proxy an inbound request upstream using the healthiest pool key.
///
/// Every upstream attempt ends in exactly one `report_success` or
/// `report_error` for the key it used.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    let _in_flight = InFlightGuard::enter(&state.in_flight);
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let method = request.method().clone();
    let response = forward(state, request, &request_id).await;

    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: &str,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let upstream_url = match uri.path_and_query() {
        Some(pq) => format!("{}{}", state.upstream_url.trim_end_matches('/'), pq),
        None => state.upstream_url.clone(),
    };

    // Host belongs to the inbound connection; the client key is never forwarded.
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        let name_str = name.as_str();
        if is_hop_by_hop(name_str)
            || name_str.eq_ignore_ascii_case("host")
            || name_str.eq_ignore_ascii_case(API_KEY_HEADER)
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let body_bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            state.count_error();
            warn!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                "proxy_error",
                &format!("invalid request body: {e}"),
                request_id,
            );
        }
    };

    let Some(key) = state.pool.select().await else {
        state.count_error();
        metrics::record_upstream_error("keys_exhausted");
        return exhausted_response(&state.pool.status().await, request_id);
    };

    let key_value = match HeaderValue::from_str(key.secret()) {
        Ok(mut v) => {
            v.set_sensitive(true);
            v
        }
        Err(e) => {
            state.count_error();
            state
                .pool
                .report_error(key.secret(), format!("key is not a valid header value: {e}"))
                .await;
            error!(key = key.label(), "configured key is not a valid header value");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                "selected API key is malformed",
                request_id,
            );
        }
    };
    headers.insert(API_KEY_HEADER, key_value);

    let result = state
        .client
        .request(method, &upstream_url)
        .headers(headers)
        .timeout(state.timeout)
        .body(body_bytes)
        .send()
        .await;

    let upstream_response = match result {
        Ok(r) => r,
        Err(e) if e.is_timeout() => {
            state.count_error();
            metrics::record_upstream_error("timeout");
            let message = format!("upstream timeout after {}s", state.timeout.as_secs());
            state.pool.report_error(key.secret(), message.clone()).await;
            error!(key = key.label(), error = %e, "upstream timeout");
            return error_response(StatusCode::GATEWAY_TIMEOUT, "proxy_error", &message, request_id);
        }
        Err(e) => {
            state.count_error();
            metrics::record_upstream_error("connection");
            state
                .pool
                .report_error(key.secret(), format!("upstream request failed: {e}"))
                .await;
            error!(key = key.label(), error = %e, "upstream request failed");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "proxy_error",
                &format!("upstream error: {e}"),
                request_id,
            );
        }
    };

    let status = upstream_response.status();
    let resp_headers = upstream_response.headers().clone();

    let resp_body = match upstream_response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            state.count_error();
            metrics::record_upstream_error("body");
            state
                .pool
                .report_error(key.secret(), format!("failed to read upstream body: {e}"))
                .await;
            error!(key = key.label(), error = %e, "failed to read upstream response body");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "proxy_error",
                &format!("upstream response read error: {e}"),
                request_id,
            );
        }
    };

    if status.is_success() {
        state.pool.report_success(key.secret()).await;
    } else {
        state.count_error();
        metrics::record_upstream_error("status");
        state
            .pool
            .report_error(key.secret(), describe_failure(status, &resp_body))
            .await;
        info!(key = key.label(), status = status.as_u16(), "upstream returned error status");
    }

    let mut response = Response::builder().status(status);
    for (name, value) in &resp_headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(axum::body::Body::from(resp_body))
        .unwrap_or_else(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                &format!("response build error: {e}"),
                request_id,
            )
        })
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
