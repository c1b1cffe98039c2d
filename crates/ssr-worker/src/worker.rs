//! The render worker façade.

use crate::cancel::CallContext;
use crate::config::{WorkerConfig, WorkerDefaults};
use crate::error::{Result, WorkerError};
use crate::process::launcher;
use crate::process::supervisor::{self, Supervisor};
use crate::process::writer::LineWriter;
use crate::process::ProcessState;
use crate::protocol::{self, LineReader, RenderOutcome};
use crate::stats::{WorkerCounters, WorkerStats};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A long-lived renderer that many tasks can render through concurrently.
///
/// Requests are multiplexed over the renderer's stdin as JSON lines and
/// correlated with responses by request id. Each call ends with exactly one
/// outcome: the rendered HTML, the renderer's error, the caller's own
/// cancellation, or [`WorkerError::WorkerStopped`] once the renderer is gone.
///
/// # Example
///
/// ```no_run
/// use ssr_worker::{CallContext, RenderWorker, WorkerConfig};
/// use std::time::Duration;
///
/// # async fn demo() -> ssr_worker::Result<()> {
/// let config = WorkerConfig::node("node", "ssr/render-worker.mjs", "dist/server/entry-server.mjs")?
///     .with_env("NODE_ENV", "production");
/// let worker = RenderWorker::start(config).await?;
///
/// let ctx = CallContext::with_timeout(Duration::from_secs(2));
/// let html = worker.render(&ctx, &serde_json::json!({"route": {"kind": "list"}})).await?;
/// println!("{html}");
///
/// worker.close().await;
/// # Ok(())
/// # }
/// ```
pub struct RenderWorker {
    supervisor: Arc<Supervisor>,
    writer: LineWriter,
    next_id: AtomicU64,
    /// Fires forced termination in the exit watcher. `None` for attached
    /// workers and after the first close.
    kill: Mutex<Option<oneshot::Sender<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    has_process: bool,
    pid: Option<u32>,
}

impl RenderWorker {
    /// Spawn the renderer and wait for its readiness message.
    ///
    /// Fails with [`WorkerError::StartupTimeout`] if readiness does not arrive
    /// within `config.startup_timeout`, or [`WorkerError::WorkerStopped`] if
    /// the renderer exits first. The process is torn down in both cases.
    pub async fn start(config: WorkerConfig) -> Result<Self> {
        let spawned = launcher::spawn(&config)?;
        let pid = spawned.child.id();

        let supervisor = Supervisor::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        let lines = LineReader::new(
            BufReader::new(spawned.stdout),
            WorkerDefaults::INITIAL_LINE_CAPACITY,
            config.max_line_bytes,
        );
        let reader = tokio::spawn(supervisor::read_loop(lines, supervisor.clone(), ready_tx));
        tokio::spawn(supervisor::forward_stderr(spawned.stderr, tokio::io::stderr()));
        tokio::spawn(supervisor::watch_exit(spawned.child, kill_rx, supervisor.clone()));

        let worker = Self {
            supervisor,
            writer: LineWriter::spawn(spawned.stdin, WorkerDefaults::WRITE_QUEUE_DEPTH),
            next_id: AtomicU64::new(1),
            kill: Mutex::new(Some(kill_tx)),
            reader: Mutex::new(Some(reader)),
            has_process: true,
            pid,
        };

        worker.await_ready(ready_rx, config.startup_timeout).await
    }

    /// Speak the renderer protocol over existing streams instead of a child
    /// process.
    ///
    /// `output` is what the renderer writes (read by the worker) and `input`
    /// is what the renderer reads. The worker closes when `output` ends or
    /// [`close`](Self::close) is called.
    pub async fn attach<R, W>(output: R, input: W, startup_timeout: Duration) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let supervisor = Supervisor::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let lines = LineReader::new(
            BufReader::new(output),
            WorkerDefaults::INITIAL_LINE_CAPACITY,
            WorkerDefaults::MAX_LINE_BYTES,
        );
        let reader = tokio::spawn(supervisor::read_loop(lines, supervisor.clone(), ready_tx));

        let worker = Self {
            supervisor,
            writer: LineWriter::spawn(input, WorkerDefaults::WRITE_QUEUE_DEPTH),
            next_id: AtomicU64::new(1),
            kill: Mutex::new(None),
            reader: Mutex::new(Some(reader)),
            has_process: false,
            pid: None,
        };

        worker.await_ready(ready_rx, startup_timeout).await
    }

    async fn await_ready(self, ready_rx: oneshot::Receiver<()>, timeout: Duration) -> Result<Self> {
        // The renderer can exit while a descendant still holds its stdout, so
        // closure is watched alongside the readiness gate.
        let ready = tokio::select! {
            biased;
            gate = ready_rx => gate.map_err(|_| WorkerError::WorkerStopped),
            _ = self.supervisor.closed() => Err(WorkerError::WorkerStopped),
            _ = tokio::time::sleep(timeout) => Err(WorkerError::StartupTimeout(timeout)),
        };

        match ready {
            Ok(()) => {
                self.supervisor.advance(ProcessState::Running);
                info!("Render worker running (PID {:?})", self.pid);
                Ok(self)
            }
            Err(err) => {
                match &err {
                    WorkerError::StartupTimeout(_) => {
                        warn!("Renderer did not signal ready within {:?}", timeout)
                    }
                    _ => warn!("Renderer stopped before signaling ready"),
                }
                self.close().await;
                Err(err)
            }
        }
    }

    fn next_request_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", WorkerDefaults::REQUEST_ID_PREFIX, n)
    }

    /// Render `props` and wait for the outcome.
    ///
    /// Returns as soon as the renderer answers, `ctx` is canceled or its
    /// deadline passes, or the worker closes. Dropping the returned future
    /// abandons the call the same way a cancellation does.
    pub async fn render<P>(&self, ctx: &CallContext, props: &P) -> Result<String>
    where
        P: Serialize + ?Sized,
    {
        let counters = &self.supervisor.counters;

        if self.supervisor.is_closed() {
            WorkerCounters::bump(&counters.stopped);
            return Err(WorkerError::WorkerStopped);
        }
        if let Some(reason) = ctx.check() {
            WorkerCounters::bump(&counters.canceled);
            return Err(reason.into());
        }

        let id = self.next_request_id();
        let line = protocol::encode_request(&id, props)?;
        let (guard, response) = match self.supervisor.pending.register(&id) {
            Ok(registered) => registered,
            Err(err) => {
                if matches!(err, WorkerError::WorkerStopped) {
                    WorkerCounters::bump(&counters.stopped);
                }
                return Err(err);
            }
        };
        WorkerCounters::bump(&counters.requests);
        let started = Instant::now();

        let written = tokio::select! {
            biased;
            result = self.writer.write_line(line) => result.map_err(WorkerError::from),
            reason = ctx.done() => Err(reason.into()),
            _ = self.supervisor.closed() => Err(WorkerError::WorkerStopped),
        };
        if let Err(err) = written {
            match &err {
                WorkerError::TransportWrite { source } => {
                    WorkerCounters::bump(&counters.write_failures);
                    warn!("Failed to write {}: {}", id, source);
                }
                WorkerError::WorkerStopped => WorkerCounters::bump(&counters.stopped),
                _ => WorkerCounters::bump(&counters.canceled),
            }
            return Err(err);
        }

        let outcome = tokio::select! {
            biased;
            // Drain resolves every registered slot, so this also covers closure.
            outcome = response => outcome.unwrap_or(RenderOutcome::Stopped),
            reason = ctx.done() => {
                WorkerCounters::bump(&counters.canceled);
                debug!("{} abandoned by caller ({:?})", id, reason);
                return Err(reason.into());
            }
        };
        guard.disarm();

        match &outcome {
            RenderOutcome::Rendered(html) => {
                WorkerCounters::bump(&counters.rendered);
                debug!("{} rendered {} bytes in {:?}", id, html.len(), started.elapsed());
            }
            RenderOutcome::Failed(failure) => {
                WorkerCounters::bump(&counters.render_failures);
                debug!("{} failed in renderer: {}", id, failure.message);
            }
            RenderOutcome::Stopped => WorkerCounters::bump(&counters.stopped),
        }
        outcome.into_result()
    }

    /// Shut the renderer down and wait until every pending call is drained.
    ///
    /// Closes stdin first, then terminates the process. Idempotent.
    pub async fn close(&self) {
        // A renderer that stopped reading stdin can stall queued writes.
        if tokio::time::timeout(WorkerDefaults::CLOSE_INPUT_TIMEOUT, self.writer.shutdown())
            .await
            .is_err()
        {
            debug!("Renderer stdin did not close in time; terminating");
        }

        if self.has_process {
            let kill = self.kill.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(kill) = kill {
                // The watcher may already have seen the exit; that is fine.
                let _ = kill.send(());
            }
        } else {
            self.supervisor.mark_closed("closed by owner");
        }

        self.supervisor.closed().await;
        // A descendant of the renderer may still hold stdout open.
        self.abort_reader();
    }

    fn abort_reader(&self) {
        let reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }

    /// Wait until the worker reaches `closed`, whatever the cause.
    pub async fn closed(&self) {
        self.supervisor.closed().await;
    }

    pub fn state(&self) -> ProcessState {
        self.supervisor.state()
    }

    pub fn is_closed(&self) -> bool {
        self.supervisor.is_closed()
    }

    /// Renderer process id, if this worker owns a process.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Calls currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.supervisor.pending.len()
    }

    pub fn stats(&self) -> WorkerStats {
        self.supervisor.counters.snapshot()
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        // Dropping the kill sender also wakes the exit watcher, which kills
        // the child.
        self.supervisor.mark_closed("worker dropped");
        self.abort_reader();
    }
}

impl std::fmt::Debug for RenderWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderWorker")
            .field("state", &self.state())
            .field("pid", &self.pid)
            .field("pending", &self.pending_count())
            .finish()
    }
}
