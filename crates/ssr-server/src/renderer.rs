//! Renderer seam between the HTTP layer and the SSR worker.

use crate::page::PageProps;
use async_trait::async_trait;
use serde::Serialize;
use ssr_worker::{CallContext, ProcessState, RenderWorker, WorkerStats};

/// Health snapshot reported on `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct RendererHealth {
    pub state: ProcessState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub pending: usize,
    pub stats: WorkerStats,
}

impl RendererHealth {
    pub fn is_available(&self) -> bool {
        !self.state.is_closed()
    }
}

/// Turns page props into markup.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, ctx: &CallContext, props: &PageProps) -> ssr_worker::Result<String>;

    fn health(&self) -> RendererHealth;
}

#[async_trait]
impl PageRenderer for RenderWorker {
    async fn render(&self, ctx: &CallContext, props: &PageProps) -> ssr_worker::Result<String> {
        RenderWorker::render(self, ctx, props).await
    }

    fn health(&self) -> RendererHealth {
        RendererHealth {
            state: self.state(),
            pid: self.pid(),
            pending: self.pending_count(),
            stats: self.stats(),
        }
    }
}
