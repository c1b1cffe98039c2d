//! Renderer process supervision.
//!
//! Spawning, stdin serialization, the stdout read loop, stderr forwarding and
//! exit detection. Only [`ProcessState`] is public; everything else is driven
//! by [`RenderWorker`](crate::RenderWorker).

pub(crate) mod launcher;
mod state;
pub(crate) mod supervisor;
pub(crate) mod writer;

pub use state::ProcessState;
