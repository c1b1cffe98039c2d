//! HTTP request handlers.

use crate::server::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, error};

const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";
const DEFAULT_CACHE: &str = "public, max-age=3600";

/// Health check endpoint.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let worker = state.renderer.health();
    let (status, label) = if worker.is_available() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (status, Json(json!({"status": label, "worker": worker})))
}

/// Fallback handler: static files first, then server-side rendering.
pub async fn handle_page(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let method = request.method();
    if method != Method::GET && method != Method::HEAD {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
            "Method Not Allowed",
        )
            .into_response();
    }

    let path = request.uri().path().to_owned();
    if let Some(target) = static_target(&state.client_dir, &path).await {
        return serve_static(request, &path, target).await;
    }

    render_page(&state, &path).await
}

/// Map a request path onto a file inside `client_dir`.
///
/// Returns `None` for the site root, for any `..` segment, and for paths that
/// cannot be decoded.
pub(crate) fn safe_join(client_dir: &Path, uri_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(uri_path).ok()?;
    let mut target = client_dir.to_path_buf();
    let mut segments = 0;

    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') => return None,
            s => {
                target.push(s);
                segments += 1;
            }
        }
    }

    (segments > 0).then_some(target)
}

async fn static_target(client_dir: &Path, uri_path: &str) -> Option<PathBuf> {
    let target = safe_join(client_dir, uri_path)?;
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_file() => Some(target),
        _ => None,
    }
}

pub(crate) fn cache_control_for(path: &str) -> &'static str {
    if path.starts_with("/assets/") || path.starts_with("/images/") {
        IMMUTABLE_CACHE
    } else {
        DEFAULT_CACHE
    }
}

async fn serve_static(request: Request, path: &str, target: PathBuf) -> Response {
    debug!("Serving static file {}", target.display());
    let response = match ServeFile::new(&target).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let mut response = response.map(Body::new);
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control_for(path)),
    );
    response
}

async fn render_page(state: &AppState, path: &str) -> Response {
    let data = match state.pages.resolve(path).await {
        Ok(data) => data,
        Err(e) => {
            error!("Route data error for {}: {:#}", path, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to resolve route").into_response();
        }
    };

    let ctx = state.call_context();
    match state.renderer.render(&ctx, &data.props).await {
        Ok(html) => {
            let status = StatusCode::from_u16(data.status).unwrap_or(StatusCode::OK);
            (
                status,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                html,
            )
                .into_response()
        }
        Err(e) => {
            error!("SSR rendering failed for {}: {}", path, e);
            let status = StatusCode::from_u16(e.http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, "SSR rendering failed").into_response()
        }
    }
}
