//! Renderer lifecycle state.

use serde::Serialize;

/// Lifecycle of a renderer process.
///
/// States only ever move forward; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Spawned, waiting for the readiness message.
    Starting,
    /// Readiness message observed.
    Ready,
    /// Handed to the owner and accepting render calls.
    Running,
    /// Exited, killed, or lost its output stream.
    Closed,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Starting => "starting",
            ProcessState::Ready => "ready",
            ProcessState::Running => "running",
            ProcessState::Closed => "closed",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ProcessState::Closed)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
