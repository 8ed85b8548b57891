//! HTTP proxy that puts the offline cache in front of an origin server.
//!
//! Every request except the status endpoint is converted into a
//! [`Request`] and dispatched to the host's active worker.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::get;
use reqwest::Url;
use serde::Serialize;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::fetch::is_hop_by_hop;
use crate::lifecycle::{ServiceWorker, WorkerHost, WorkerState};
use crate::request::{Destination, Request, resolve_url};
use crate::response::Response;
use crate::stats::StatsSnapshot;

/// Path of the JSON status endpoint.
pub const STATUS_PATH: &str = "/__offline/status";

struct AppState<W> {
    host: Arc<WorkerHost<W>>,
    origin: Url,
    max_body_bytes: usize,
}

impl<W> Clone for AppState<W> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
            origin: self.origin.clone(),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    active_version: Option<String>,
    waiting_version: Option<String>,
    state: Option<WorkerState>,
    stats: Option<StatsSnapshot>,
}

async fn status<W: ServiceWorker + 'static>(State(state): State<AppState<W>>) -> impl IntoResponse {
    let host = &state.host;
    axum::Json(StatusResponse {
        active_version: host.active_version(),
        waiting_version: host.waiting_version(),
        state: host.state(),
        stats: host.active().and_then(|w| w.stats()),
    })
}

/// Picks the request destination from fetch metadata headers.
fn destination_from_headers(headers: &HeaderMap) -> Destination {
    if let Some(dest) = headers.get("sec-fetch-dest").and_then(|v| v.to_str().ok()) {
        return Destination::from_fetch_dest(dest);
    }
    let navigating = headers
        .get("sec-fetch-mode")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|mode| mode.eq_ignore_ascii_case("navigate"));
    if navigating {
        Destination::Document
    } else {
        Destination::Empty
    }
}

/// Builds the policy request for an incoming proxied request.
fn to_request(
    origin: &Url,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: bytes::Bytes,
) -> Result<Request> {
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    // A scheme-relative path would escape the origin.
    if !path.starts_with('/') || path.starts_with("//") {
        return Err(Error::Url {
            url: path.to_string(),
            reason: "path must be origin-relative".to_string(),
        });
    }
    let url = resolve_url(origin, path)?;

    let mut request = Request::new(method, url)
        .with_destination(destination_from_headers(headers))
        .with_body(body);
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    Ok(request)
}

fn into_http_response(response: &Response) -> HttpResponse {
    let mut builder = axum::http::Response::builder().status(response.status());
    for (name, value) in response.headers() {
        if !is_hop_by_hop(name) {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder
        .body(Body::from(response.body().clone()))
        .unwrap_or_else(|e| {
            log::warn!("Dropping malformed response: {e}");
            (StatusCode::BAD_GATEWAY, "malformed upstream response").into_response()
        })
}

fn error_status(error: &Error) -> StatusCode {
    match error {
        Error::NoActiveWorker => StatusCode::SERVICE_UNAVAILABLE,
        Error::Url { .. } => StatusCode::BAD_REQUEST,
        Error::NoResponse { .. } | Error::Network(_) | Error::Http(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

async fn proxy<W: ServiceWorker + 'static>(
    State(state): State<AppState<W>>,
    req: axum::extract::Request,
) -> HttpResponse {
    let (parts, body) = req.into_parts();
    let body = match to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            log::warn!("Rejected request body for {}: {e}", parts.uri);
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let result = match to_request(&state.origin, parts.method, &parts.uri, &parts.headers, body) {
        Ok(request) => state.host.dispatch(&request).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => into_http_response(&response),
        Err(e) => {
            log::warn!("No response for {}: {e}", parts.uri);
            (error_status(&e), e.to_string()).into_response()
        }
    }
}

/// Builds the proxy router.
pub fn router<W: ServiceWorker + 'static>(
    host: Arc<WorkerHost<W>>,
    origin: Url,
    max_body_bytes: usize,
) -> Router {
    let state = AppState {
        host,
        origin,
        max_body_bytes,
    };
    Router::new()
        .route(STATUS_PATH, get(status::<W>))
        .fallback(proxy::<W>)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Received SIGINT");
}

/// Serves the proxy until interrupted.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn run_server<W: ServiceWorker + 'static>(
    host: Arc<WorkerHost<W>>,
    origin: Url,
    config: &ServerConfig,
) -> Result<()> {
    let app = router(host, origin, config.max_body_bytes);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Serving offline proxy on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("Shutdown complete");
    Ok(())
}
