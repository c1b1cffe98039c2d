//! SSR server - serves a built site and renders pages through a Node worker.
//!
//! Static assets come straight from `<dist>/client`; every other path is
//! resolved to page props and rendered by a long-lived renderer process
//! driven by `ssr-worker`.

mod env;
mod handler;
mod page;
mod renderer;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use ssr_worker::{RenderWorker, WorkerConfig, WorkerDefaults};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "ssr-server")]
#[command(about = "Serve a site with out-of-process server-side rendering")]
struct Args {
    /// Listen address (`:port` binds all interfaces)
    #[arg(long, default_value = ":4173")]
    addr: String,

    /// Project root directory
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Build output directory (relative to root)
    #[arg(long, default_value = "dist")]
    dist: PathBuf,

    /// Content base directory (defaults to dist)
    #[arg(long)]
    content_base: Option<PathBuf>,

    /// Node executable used for rendering
    #[arg(long, default_value = WorkerDefaults::NODE_BINARY)]
    node: PathBuf,

    /// Renderer worker script, resolved against root
    /// [default: <root>/ssr/render-worker.mjs, directly under the project root]
    #[arg(long)]
    worker_script: Option<PathBuf>,

    /// How long to wait for the renderer to signal ready
    #[arg(long, default_value = "5000")]
    startup_timeout_ms: u64,

    /// Deadline for a single render (0 = none)
    #[arg(long, default_value = "10000")]
    render_timeout_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG wins over --debug
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting SSR server");

    let root = std::path::absolute(&args.root)
        .with_context(|| format!("resolve root {}", args.root.display()))?;
    let layout = env::SiteLayout::new(
        root,
        &args.dist,
        args.content_base.as_deref(),
        args.worker_script.as_deref(),
    );
    info!("Project root: {}", layout.root.display());
    info!("Build output: {}", layout.dist.display());
    info!("Content base: {}", layout.content_base.display());

    let config = WorkerConfig::node(&args.node, &layout.worker_script, &layout.entry_file)?
        .with_working_dir(&layout.root)
        .with_envs(env::renderer_env(&layout))
        .with_startup_timeout(Duration::from_millis(args.startup_timeout_ms));
    let worker = Arc::new(
        RenderWorker::start(config)
            .await
            .context("start SSR worker")?,
    );

    let pages = page::ManifestPageSource::new(&layout.content_base);
    info!("Page manifest: {}", pages.manifest_path().display());

    let state = Arc::new(server::AppState {
        renderer: worker.clone(),
        pages: Arc::new(pages),
        client_dir: layout.client_dir.clone(),
        render_timeout: (args.render_timeout_ms > 0)
            .then(|| Duration::from_millis(args.render_timeout_ms)),
    });

    let addr = server::parse_listen_addr(&args.addr)?;
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let (bound, mut server_task) = match server::start_server(state, addr, async move {
        let _ = stop_rx.await;
    })
    .await
    {
        Ok(started) => started,
        Err(e) => {
            worker.close().await;
            return Err(e);
        }
    };

    // Intentional stdout so supervisors and tests can discover the port
    println!("SSR_ADDR={}", bound);

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received"),
        result = &mut server_task => {
            warn!("Server stopped unexpectedly: {:?}", result);
        }
    }

    let _ = stop_tx.send(());
    if !server_task.is_finished() {
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server_task).await {
            Ok(Ok(Ok(()))) => info!("HTTP server drained"),
            Ok(Ok(Err(e))) => warn!("HTTP server error during shutdown: {}", e),
            Ok(Err(e)) => warn!("HTTP server task failed: {}", e),
            Err(_) => {
                warn!("Shutdown grace period elapsed; dropping open connections");
                server_task.abort();
            }
        }
    }

    worker.close().await;
    info!("SSR worker closed, exiting");

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
