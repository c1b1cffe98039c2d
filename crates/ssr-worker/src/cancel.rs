//! Cancellation and deadlines for render calls.
//!
//! A [`CallContext`] is what a caller hands to
//! [`RenderWorker::render`](crate::RenderWorker::render): an optional
//! [`CancellationToken`] plus an optional deadline. Whichever fires first ends
//! the caller's wait; neither touches other in-flight calls or the renderer.

use crate::error::WorkerError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A cancellation token for cooperative cancellation of render calls.
///
/// This token can be cloned and shared across tasks. When `cancel()` is called
/// on any clone, all clones observe the cancellation. Cancellation is
/// permanent.
///
/// # Example
///
/// ```
/// use ssr_worker::CancellationToken;
///
/// let token = CancellationToken::new();
/// let token_clone = token.clone();
///
/// token_clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every task waiting in [`cancelled`](Self::cancelled).
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        // Registered before the flag check so a concurrent cancel() is not missed.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Why a call context ended the caller's wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Canceled,
    DeadlineExceeded,
}

impl From<CancelReason> for WorkerError {
    fn from(reason: CancelReason) -> Self {
        match reason {
            CancelReason::Canceled => WorkerError::Canceled,
            CancelReason::DeadlineExceeded => WorkerError::DeadlineExceeded,
        }
    }
}

/// Per-call cancellation scope.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that never cancels and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that ends after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_at(Instant::now() + timeout)
    }

    /// Attach a cancellation token.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Set an absolute deadline. An earlier existing deadline is kept.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Report why the context is already done, without waiting.
    pub fn check(&self) -> Option<CancelReason> {
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Some(CancelReason::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the token fires or the deadline passes.
    ///
    /// Pends forever for a background context.
    pub async fn done(&self) -> CancelReason {
        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => CancelReason::Canceled,
            _ = expired => CancelReason::DeadlineExceeded,
        }
    }
}
