//! Out-of-process server-side rendering worker.
//!
//! This crate runs a long-lived renderer process (typically Node.js executing
//! a bundled server entry) and multiplexes many concurrent render calls over
//! its stdin/stdout as newline-delimited JSON.
//!
//! # Architecture
//!
//! - [`protocol`]: encoding requests and decoding renderer messages
//! - [`pending`]: the correlation table from request id to waiting caller
//! - [`process`]: spawning, the stdout read loop, stderr forwarding, exit
//!   detection
//! - [`RenderWorker`]: the façade callers render through
//!
//! A renderer that crashes, hangs or writes garbage never takes the host down:
//! garbage lines are skipped, each call is bounded by its [`CallContext`], and
//! process death resolves every waiting call with
//! [`WorkerError::WorkerStopped`].
//!
//! # Example
//!
//! ```no_run
//! use ssr_worker::{CallContext, RenderWorker, WorkerConfig};
//!
//! # async fn demo() -> ssr_worker::Result<()> {
//! let config = WorkerConfig::node("node", "ssr/render-worker.mjs", "dist/server/entry-server.mjs")?;
//! let worker = RenderWorker::start(config).await?;
//!
//! let html = worker
//!     .render(&CallContext::background(), &serde_json::json!({"route": {"kind": "list"}}))
//!     .await?;
//! assert!(!html.is_empty());
//!
//! worker.close().await;
//! # Ok(())
//! # }
//! ```

mod cancel;
mod config;
mod error;
pub mod pending;
pub mod process;
pub mod protocol;
mod stats;
mod worker;

pub use cancel::{CallContext, CancelReason, CancellationToken};
pub use config::{WorkerConfig, WorkerDefaults};
pub use error::{Result, WorkerError};
pub use process::ProcessState;
pub use protocol::{RenderFailure, RenderOutcome};
pub use stats::WorkerStats;
pub use worker::RenderWorker;
