//! HTTP front-end
//!
//! Accepts `/write`, `/query`, `/ping` and `/stats` on one listener and
//! forwards into the cluster router. Write bodies are gzip-decoded and
//! re-encoded in canonical precision form before fan-out; query responses
//! carry the backend's content headers with the merged payload. Method and
//! parameter contracts mirror the database's own API so clients need no
//! relay-specific changes.

use crate::cluster::router::ClusterRouter;
use crate::config::HttpConfig;
use crate::lineproto::{normalize_lines, Precision};
use crate::Error;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, RawQuery, State};
use axum::http::header::{HeaderName, ALLOW, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use parking_lot::Mutex;
use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, warn};

/// Request bodies larger than this are rejected up front
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;
/// Cap on gzip-decoded bodies (decompression-bomb guard)
pub const MAX_DECODED_SIZE: usize = 64 * 1024 * 1024;
/// Body buffers kept around for reuse between requests
const BUFFER_POOL_SIZE: usize = 32;

/// Shared front-end state
#[derive(Clone)]
pub struct ApiState {
    router: Arc<ClusterRouter>,
    default_rp: Option<String>,
    buffers: Arc<BufferPool>,
}

/// Build the relay's HTTP router for one listener
pub fn build_router(router: Arc<ClusterRouter>, cfg: &HttpConfig) -> Router {
    Router::new()
        .route("/ping", any(handle_ping))
        .route("/write", any(handle_write))
        .route("/query", any(handle_query))
        .route("/stats", any(handle_stats))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(ApiState {
            router,
            default_rp: cfg.default_retention_policy.clone(),
            buffers: Arc::new(BufferPool::default()),
        })
}

/// Pool of reusable body buffers, reset between requests
#[derive(Default)]
struct BufferPool {
    pool: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    fn get(&self) -> Vec<u8> {
        self.pool.lock().pop().unwrap_or_default()
    }

    fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut pool = self.pool.lock();
        if pool.len() < BUFFER_POOL_SIZE {
            pool.push(buf);
        }
    }
}

async fn handle_ping(State(state): State<ApiState>, method: Method) -> Response {
    let stats = state.router.stats().live();
    stats.ping_requests.fetch_add(1, Ordering::Relaxed);

    if method == Method::GET || method == Method::HEAD {
        // the literal marker, not a version; clients sniffing this header
        // are talking to the relay
        (
            StatusCode::NO_CONTENT,
            [(HeaderName::from_static("x-influxdb-version"), "relay")],
        )
            .into_response()
    } else {
        stats.ping_requests_fail.fetch_add(1, Ordering::Relaxed);
        StatusCode::METHOD_NOT_ALLOWED.into_response()
    }
}

async fn handle_write(
    State(state): State<ApiState>,
    method: Method,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let stats = state.router.stats().live();

    if method != Method::POST {
        stats.write_requests_fail.fetch_add(1, Ordering::Relaxed);
        return if method == Method::OPTIONS {
            (StatusCode::NO_CONTENT, [(ALLOW, "POST")]).into_response()
        } else {
            json_error_allow_post(StatusCode::METHOD_NOT_ALLOWED, "invalid write method")
        };
    }

    let mut params = parse_query(raw_query.as_deref().unwrap_or(""));

    // fail early if the database is missing
    if !has_param(&params, "db") {
        stats.write_requests_fail.fetch_add(1, Ordering::Relaxed);
        return json_error(StatusCode::BAD_REQUEST, "missing parameter: db");
    }

    if let Some(rp) = &state.default_rp {
        if !params.iter().any(|(k, _)| k == "rp") {
            params.push(("rp".to_string(), rp.clone()));
        }
    }

    let precision = params
        .iter()
        .find(|(k, _)| k == "precision")
        .map(|(_, v)| v.as_str())
        .unwrap_or("");
    let precision = match Precision::parse(precision) {
        Ok(p) => p,
        Err(_) => {
            stats.write_requests_fail.fetch_add(1, Ordering::Relaxed);
            return json_error(StatusCode::BAD_REQUEST, "invalid precision");
        }
    };

    // transparently decode gzip request bodies
    let decoded;
    let payload: &[u8] = match headers.get(CONTENT_ENCODING).and_then(|v| v.to_str().ok()) {
        Some("gzip") => match decode_gzip(&body, MAX_DECODED_SIZE) {
            Ok(buf) => {
                decoded = buf;
                &decoded
            }
            Err(_) => {
                stats.write_requests_fail.fetch_add(1, Ordering::Relaxed);
                return json_error(StatusCode::BAD_REQUEST, "unable to decode gzip body");
            }
        },
        _ => &body,
    };

    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let mut normalized = state.buffers.get();
    if let Err(err) = normalize_lines(payload, precision, now, &mut normalized) {
        state.buffers.put(normalized);
        stats.write_requests_fail.fetch_add(1, Ordering::Relaxed);
        warn!(error = %err, "rejecting unparseable write body");
        return json_error(StatusCode::BAD_REQUEST, "unable to parse points");
    }

    // normalised query string: unknown parameters ride along
    let query = match serde_urlencoded::to_string(&params) {
        Ok(query) => query,
        Err(err) => {
            state.buffers.put(normalized);
            stats.write_requests_fail.fetch_add(1, Ordering::Relaxed);
            error!(error = %err, "query string re-encoding failed");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "problem writing points");
        }
    };

    let auth = header_str(&headers, &AUTHORIZATION);
    state.router.write(&normalized, &query, auth).await;
    state.buffers.put(normalized);

    StatusCode::NO_CONTENT.into_response()
}

async fn handle_query(
    State(state): State<ApiState>,
    method: Method,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let stats = state.router.stats().live();

    if method != Method::GET && method != Method::POST {
        stats.query_requests_fail.fetch_add(1, Ordering::Relaxed);
        return json_error(StatusCode::METHOD_NOT_ALLOWED, "invalid method");
    }

    let mut params = parse_query(raw_query.as_deref().unwrap_or(""));

    // form-encoded POST bodies carry parameters too
    let form_encoded = header_str(&headers, &CONTENT_TYPE)
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if method == Method::POST && form_encoded {
        if let Ok(text) = std::str::from_utf8(&body) {
            params.extend(parse_query(text));
        }
    }

    if !has_param(&params, "db") {
        stats.query_requests_fail.fetch_add(1, Ordering::Relaxed);
        return json_error(StatusCode::BAD_REQUEST, "missing parameter: db");
    }

    let q = params
        .iter()
        .find(|(k, _)| k == "q")
        .map(|(_, v)| v.trim().to_string())
        .unwrap_or_default();
    if q.is_empty() {
        stats.query_requests_fail.fetch_add(1, Ordering::Relaxed);
        return json_error(StatusCode::BAD_REQUEST, "empty query");
    }

    let form = match serde_urlencoded::to_string(&params) {
        Ok(form) => form,
        Err(err) => {
            stats.query_requests_fail.fetch_add(1, Ordering::Relaxed);
            error!(error = %err, "query string re-encoding failed");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "problem with query string");
        }
    };

    let auth = header_str(&headers, &AUTHORIZATION);
    match state.router.query(method.as_str(), &form, &q, auth).await {
        Ok(merged) => {
            let mut builder = Response::builder().status(StatusCode::OK);
            if let Some(ct) = merged.content_type {
                builder = builder.header(CONTENT_TYPE, ct);
            }
            if let Some(ce) = merged.content_encoding {
                builder = builder.header(CONTENT_ENCODING, ce);
            }
            builder
                .body(Body::from(merged.body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(Error::QueryForbidden) => json_error(StatusCode::BAD_REQUEST, "query forbidden"),
        Err(Error::NoMeasurement(_)) => {
            json_error(StatusCode::BAD_REQUEST, "can't get measurement")
        }
        Err(err) => {
            warn!(error = %err, "query merge failed");
            json_error(StatusCode::BAD_REQUEST, "query merge failed")
        }
    }
}

async fn handle_stats(State(state): State<ApiState>, method: Method) -> Response {
    if method != Method::GET {
        return json_error(StatusCode::METHOD_NOT_ALLOWED, "invalid method");
    }

    let snap = state.router.stats().snapshot();
    let metric = serde_json::json!({
        "name": "fluxgate",
        "tags": state.router.default_tags(),
        "fields": {
            "statQueryRequest": snap.query_requests.load(Ordering::Relaxed),
            "statQueryRequestFail": snap.query_requests_fail.load(Ordering::Relaxed),
            "statWriteRequest": snap.write_requests.load(Ordering::Relaxed),
            "statWriteRequestFail": snap.write_requests_fail.load(Ordering::Relaxed),
            "statPingRequest": snap.ping_requests.load(Ordering::Relaxed),
            "statPingRequestFail": snap.ping_requests_fail.load(Ordering::Relaxed),
            "statPointsWritten": snap.points_written.load(Ordering::Relaxed),
            "statPointsWrittenFail": snap.points_written_fail.load(Ordering::Relaxed),
            "statQueryRequestDuration": snap.query_request_duration.load(Ordering::Relaxed),
            "statWriteRequestDuration": snap.write_request_duration.load(Ordering::Relaxed),
        },
        "time": chrono::Utc::now().to_rfc3339(),
    });

    (
        [(CONTENT_TYPE, "application/json")],
        metric.to_string(),
    )
        .into_response()
}

fn parse_query(raw: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(raw).unwrap_or_default()
}

fn has_param(params: &[(String, String)], name: &str) -> bool {
    params.iter().any(|(k, v)| k == name && !v.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn json_error(code: StatusCode, message: &str) -> Response {
    let body = format!("{}\n", serde_json::json!({ "error": message }));
    (code, [(CONTENT_TYPE, "application/json")], body).into_response()
}

fn json_error_allow_post(code: StatusCode, message: &str) -> Response {
    let body = format!("{}\n", serde_json::json!({ "error": message }));
    (
        code,
        [(ALLOW, "POST"), (CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// Decode a gzip body, reading at most `max` bytes
fn decode_gzip(body: &[u8], max: usize) -> std::io::Result<Vec<u8>> {
    let decoder = flate2::read::GzDecoder::new(body);
    let mut decoder = decoder.take(max as u64);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded)?;
    Ok(decoded)
}
