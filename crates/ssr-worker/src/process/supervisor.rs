//! Background tasks that own the renderer process.
//!
//! - the read loop consumes stdout, opens the readiness gate and resolves
//!   pending calls
//! - the exit watcher waits for the child and performs forced termination
//! - the stderr forwarder copies diagnostics to the host's stderr
//!
//! Both the read loop reaching end-of-stream and the child exiting lead to
//! [`Supervisor::mark_closed`], which runs its drain exactly once.

use super::state::ProcessState;
use crate::pending::PendingCalls;
use crate::protocol::{self, Line, LineReader};
use crate::stats::WorkerCounters;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// State shared between the façade and the background tasks.
pub(crate) struct Supervisor {
    pub pending: PendingCalls,
    pub counters: WorkerCounters,
    state: watch::Sender<ProcessState>,
    closed_once: AtomicBool,
}

impl Supervisor {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(ProcessState::Starting);
        Arc::new(Self {
            pending: PendingCalls::new(),
            counters: WorkerCounters::default(),
            state,
            closed_once: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Move the lifecycle forward. Returns `false` if `next` is not ahead of
    /// the current state.
    pub fn advance(&self, next: ProcessState) -> bool {
        self.state.send_if_modified(|current| {
            if next > *current {
                debug!("Renderer state {} -> {}", current, next);
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Terminal transition: mark closed and drain every pending call.
    ///
    /// Idempotent; only the first caller drains.
    pub fn mark_closed(&self, cause: &str) {
        if self.closed_once.swap(true, Ordering::SeqCst) {
            return;
        }
        self.advance(ProcessState::Closed);
        let drained = self.pending.close_and_drain();
        info!("Renderer closed ({}); drained {} pending call(s)", cause, drained);
    }

    /// Wait until the lifecycle reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only ends on Closed.
        let _ = rx.wait_for(ProcessState::is_closed).await;
    }
}

/// Consume renderer stdout until end of stream.
///
/// Malformed or oversized lines are counted and skipped. The first `ready`
/// message fires `ready_tx`; messages carrying a request id resolve the
/// matching pending call; everything else is dropped.
pub(crate) async fn read_loop<R>(
    mut lines: LineReader<R>,
    supervisor: Arc<Supervisor>,
    ready_tx: oneshot::Sender<()>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut ready_tx = Some(ready_tx);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(Line::Complete(line))) => line,
            Ok(Some(Line::Oversized(len))) => {
                WorkerCounters::bump(&supervisor.counters.discarded_lines);
                warn!("Discarding oversized renderer output line ({} bytes)", len);
                continue;
            }
            Ok(None) => {
                debug!("Renderer stdout reached end of stream");
                break;
            }
            Err(e) => {
                warn!("Failed to read renderer stdout: {}", e);
                break;
            }
        };

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let Some(message) = protocol::decode_line(&line) else {
            WorkerCounters::bump(&supervisor.counters.discarded_lines);
            warn!(
                "Discarding malformed renderer output line ({} bytes): {}",
                line.len(),
                String::from_utf8_lossy(&line[..line.len().min(120)])
            );
            continue;
        };

        if message.is_ready() {
            if let Some(tx) = ready_tx.take() {
                supervisor.advance(ProcessState::Ready);
                info!("Renderer signaled ready");
                let _ = tx.send(());
                continue;
            }
        }

        let Some(id) = message.request_id().map(str::to_owned) else {
            debug!("Ignoring renderer message without request id");
            continue;
        };

        if !supervisor.pending.resolve(&id, message.into_outcome()) {
            WorkerCounters::bump(&supervisor.counters.unmatched_responses);
            debug!("Dropping response for {}: no caller is waiting", id);
        }
    }

    // Dropping an unfired gate tells a waiting `start` that readiness never came.
    drop(ready_tx);
    supervisor.mark_closed("renderer output closed");
}

/// Wait for the child to exit, killing it first if `kill_rx` fires or its
/// sender is dropped.
pub(crate) async fn watch_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    supervisor: Arc<Supervisor>,
) {
    let pid = child.id();
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            debug!("Terminating renderer (PID {:?})", pid);
            if let Err(e) = child.start_kill() {
                debug!("Renderer kill reported: {}", e);
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => info!("Renderer (PID {:?}) exited: {}", pid, status),
        Err(e) => warn!("Failed to wait for renderer (PID {:?}): {}", pid, e),
    }
    supervisor.mark_closed("renderer exited");
}

/// Copy renderer stderr to `host` byte for byte.
pub(crate) async fn forward_stderr<R, W>(mut stderr: R, mut host: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match tokio::io::copy(&mut stderr, &mut host).await {
        Ok(bytes) => debug!("Renderer stderr closed after {} bytes", bytes),
        Err(e) => debug!("Renderer stderr forwarding stopped: {}", e),
    }
}
