//! HTTP server implementation using Axum.

use crate::handler::{handle_health, handle_page};
use crate::page::PageSource;
use crate::renderer::PageRenderer;
use axum::{routing::get, Router};
use ssr_worker::CallContext;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers.
pub struct AppState {
    /// Renders page props to markup (the SSR worker in production)
    pub renderer: Arc<dyn PageRenderer>,
    /// Resolves request paths to page props
    pub pages: Arc<dyn PageSource>,
    /// Directory static files are served from
    pub client_dir: PathBuf,
    /// Deadline applied to each render call
    pub render_timeout: Option<Duration>,
}

impl AppState {
    /// Call context for one render.
    pub fn call_context(&self) -> CallContext {
        match self.render_timeout {
            Some(timeout) => CallContext::with_timeout(timeout),
            None => CallContext::background(),
        }
    }
}

/// Build the router: `/health` plus the page fallback.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .fallback(handle_page)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parse a listen address, accepting the `:port` shorthand for all interfaces.
pub fn parse_listen_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    full.parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address {:?}: {}", addr, e))
}

/// Bind and serve in the background until `shutdown` resolves.
///
/// Returns the bound address (useful when port 0 was requested) and the
/// server task, which completes once in-flight requests have drained.
pub async fn start_server<F>(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: F,
) -> anyhow::Result<(SocketAddr, JoinHandle<std::io::Result<()>>)>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    });

    Ok((actual_addr, server))
}
