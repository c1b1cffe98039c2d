//! Centralized configuration for the render worker.
//!
//! [`WorkerDefaults`] holds the tuning constants; [`WorkerConfig`] describes
//! one renderer process and how long to wait for it.

use crate::error::{Result, WorkerError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default limits and timings.
pub struct WorkerDefaults;

impl WorkerDefaults {
    pub const NODE_BINARY: &'static str = "node";
    pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
    pub const INITIAL_LINE_CAPACITY: usize = 64 * 1024;
    pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;
    pub const REQUEST_ID_PREFIX: &'static str = "req-";
    /// Lines queued for the stdin writer before senders wait.
    pub const WRITE_QUEUE_DEPTH: usize = 256;
    /// How long `close` waits for queued writes before terminating anyway.
    pub const CLOSE_INPUT_TIMEOUT: Duration = Duration::from_secs(1);
}

/// Configuration for launching a renderer process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory for the child (inherits the host's when `None`).
    pub working_dir: Option<PathBuf>,
    /// Variables layered over the host environment; these win on collision.
    pub env: HashMap<String, String>,
    /// How long to wait for the readiness message.
    pub startup_timeout: Duration,
    /// Longest stdout line accepted before it is discarded.
    pub max_line_bytes: usize,
}

impl WorkerConfig {
    /// Create a config for an arbitrary renderer executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            startup_timeout: WorkerDefaults::STARTUP_TIMEOUT,
            max_line_bytes: WorkerDefaults::MAX_LINE_BYTES,
        }
    }

    /// Create a config that runs `node <script> <entry>`.
    ///
    /// Both paths are made absolute so the child resolves them the same way
    /// regardless of its working directory. An empty `node_binary` falls back
    /// to `node` on the `PATH`.
    pub fn node(
        node_binary: impl AsRef<Path>,
        script: impl AsRef<Path>,
        entry: impl AsRef<Path>,
    ) -> Result<Self> {
        let node_binary = node_binary.as_ref();
        let script = script.as_ref();
        let entry = entry.as_ref();

        if script.as_os_str().is_empty() {
            return Err(WorkerError::config("missing worker script path"));
        }
        if entry.as_os_str().is_empty() {
            return Err(WorkerError::config("missing entry file path"));
        }

        let program = if node_binary.as_os_str().is_empty() {
            PathBuf::from(WorkerDefaults::NODE_BINARY)
        } else {
            node_binary.to_path_buf()
        };

        let script = absolute(script)?;
        let entry = absolute(entry)?;

        Ok(Self::new(program)
            .with_arg(script.to_string_lossy())
            .with_arg(entry.to_string_lossy()))
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Add an environment variable to the overlay.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Replace the environment overlay.
    pub fn with_envs(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Set the startup timeout.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set the maximum accepted stdout line length.
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| {
        WorkerError::config(format!("cannot resolve {}: {}", path.display(), e))
    })
}
