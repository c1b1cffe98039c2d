//! Wire protocol spoken with the renderer.
//!
//! One JSON object per line, in both directions:
//!
//! ```text
//! host  -> child: {"type":"render","id":"req-1","props":{...}}
//! child -> host:  {"type":"ready"}
//! child -> host:  {"id":"req-1","html":"<main>...</main>"}
//! child -> host:  {"id":"req-1","error":{"message":"boom","stack":"..."}}
//! ```
//!
//! Decoding is deliberately lenient: anything that is not a JSON object of the
//! expected shape is reported as `None` and the caller skips it.

use crate::error::{Result, WorkerError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Outgoing render request.
#[derive(Debug, Serialize)]
pub struct RenderRequest<'a, P: ?Sized> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: &'a str,
    pub props: &'a P,
}

impl<'a, P: Serialize + ?Sized> RenderRequest<'a, P> {
    pub fn new(id: &'a str, props: &'a P) -> Self {
        Self {
            kind: "render",
            id,
            props,
        }
    }
}

/// Encode a render request as a single newline-terminated line.
pub fn encode_request<P: Serialize + ?Sized>(id: &str, props: &P) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(&RenderRequest::new(id, props)).map_err(|e| {
        WorkerError::EncodingFailure {
            message: format!("request {}: {}", id, e),
            source: Some(e),
        }
    })?;
    line.push(b'\n');
    Ok(line)
}

/// Error object reported by the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RenderFailure {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
}

/// Any message the renderer writes to stdout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerMessage {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub error: Option<RenderFailure>,
}

impl WorkerMessage {
    pub fn is_ready(&self) -> bool {
        self.kind.as_deref() == Some("ready")
    }

    /// The correlation id, if present and non-empty.
    pub fn request_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Convert into the outcome delivered to the waiting caller.
    ///
    /// An `error` field wins over `html`; a response carrying neither renders
    /// as the empty string.
    pub fn into_outcome(self) -> RenderOutcome {
        match self.error {
            Some(failure) => RenderOutcome::Failed(failure),
            None => RenderOutcome::Rendered(self.html.unwrap_or_default()),
        }
    }
}

/// Decode one stdout line. Returns `None` for anything unparseable.
pub fn decode_line(line: &[u8]) -> Option<WorkerMessage> {
    serde_json::from_slice(line).ok()
}

/// What a pending call eventually receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered(String),
    Failed(RenderFailure),
    /// Synthetic outcome delivered when the worker closes.
    Stopped,
}

impl RenderOutcome {
    pub fn into_result(self) -> Result<String> {
        match self {
            RenderOutcome::Rendered(html) => Ok(html),
            RenderOutcome::Failed(failure) => Err(WorkerError::Render {
                message: failure.message,
                stack: failure.stack,
            }),
            RenderOutcome::Stopped => Err(WorkerError::WorkerStopped),
        }
    }
}

/// One frame read from the renderer's stdout.
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    /// A complete line without its terminator.
    Complete(Vec<u8>),
    /// A line longer than the limit; its bytes were skipped.
    Oversized(usize),
}

/// Newline-delimited reader with a per-line size cap.
///
/// An oversized line is consumed up to its newline and reported as
/// [`Line::Oversized`], so one runaway message cannot desynchronize the
/// stream or exhaust memory.
pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
    max_line: usize,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(reader: R, initial_capacity: usize, max_line: usize) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(initial_capacity.min(max_line)),
            max_line,
        }
    }

    /// Read the next line. `Ok(None)` means end of stream.
    pub async fn next_line(&mut self) -> std::io::Result<Option<Line>> {
        self.buf.clear();
        let mut skipped = 0usize;

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                // EOF: flush a trailing unterminated line, if any.
                return Ok(if skipped > 0 {
                    Some(Line::Oversized(skipped))
                } else if self.buf.is_empty() {
                    None
                } else {
                    Some(Line::Complete(std::mem::take(&mut self.buf)))
                });
            }

            let (chunk, found_newline) = match available.iter().position(|b| *b == b'\n') {
                Some(pos) => (&available[..pos], true),
                None => (available, false),
            };
            let consumed = chunk.len() + usize::from(found_newline);

            if skipped > 0 || self.buf.len() + chunk.len() > self.max_line {
                skipped += self.buf.len() + chunk.len();
                self.buf.clear();
            } else {
                self.buf.extend_from_slice(chunk);
            }
            self.reader.consume(consumed);

            if found_newline {
                if skipped > 0 {
                    return Ok(Some(Line::Oversized(skipped)));
                }
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
                return Ok(Some(Line::Complete(std::mem::take(&mut self.buf))));
            }
        }
    }
}
