//! Serialized access to the renderer's stdin.
//!
//! A single task owns the write half and receives complete lines over a
//! channel. Callers that give up while waiting for their write never leave a
//! partial line on the stream, because the task always finishes the line it
//! started.

use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

enum WriteCommand {
    Line(Vec<u8>, oneshot::Sender<io::Result<()>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the stdin writer task.
pub(crate) struct LineWriter {
    tx: mpsc::Sender<WriteCommand>,
}

fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "renderer input stream is closed")
}

impl LineWriter {
    /// Spawn the writer task that owns `writer`.
    pub fn spawn<W>(writer: W, queue_depth: usize) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        tokio::spawn(run_writer(writer, rx));
        Self { tx }
    }

    /// Write one complete line (terminator included) and wait for the flush.
    pub async fn write_line(&self, line: Vec<u8>) -> io::Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriteCommand::Line(line, ack_tx))
            .await
            .map_err(|_| closed_pipe())?;
        ack_rx.await.map_err(|_| closed_pipe())?
    }

    /// Close the input stream. Later writes fail with `BrokenPipe`.
    ///
    /// Lines queued before the shutdown are still written first.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriteCommand::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run_writer<W>(writer: W, mut rx: mpsc::Receiver<WriteCommand>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut writer = Some(writer);

    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Line(line, ack) => {
                let result = match writer.as_mut() {
                    Some(w) => write_all_and_flush(w, &line).await,
                    None => Err(closed_pipe()),
                };
                let _ = ack.send(result);
            }
            WriteCommand::Shutdown(ack) => {
                if let Some(mut w) = writer.take() {
                    if let Err(e) = w.shutdown().await {
                        debug!("Renderer stdin shutdown reported: {}", e);
                    }
                    // Dropping the handle closes the pipe.
                    drop(w);
                }
                let _ = ack.send(());
            }
        }
    }
}

async fn write_all_and_flush<W: AsyncWrite + Unpin>(writer: &mut W, line: &[u8]) -> io::Result<()> {
    writer.write_all(line).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_concurrent_lines_are_not_interleaved() {
        let (client, server) = tokio::io::duplex(64);
        let writer = std::sync::Arc::new(LineWriter::spawn(client, 8));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                let line = format!("{}\n", i.to_string().repeat(40));
                writer.write_line(line.into_bytes()).await
            }));
        }

        let mut lines = BufReader::new(server).lines();
        let mut seen = Vec::new();
        for _ in 0..16 {
            let line = lines.next_line().await.unwrap().unwrap();
            let first = line.chars().next().unwrap();
            assert!(line.chars().all(|c| c.is_ascii_digit()));
            seen.push((first, line.len()));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(seen.len(), 16);
    }

    #[tokio::test]
    async fn test_write_after_shutdown_is_broken_pipe() {
        let (client, server) = tokio::io::duplex(64);
        let writer = LineWriter::spawn(client, 4);

        writer.write_line(b"hello\n".to_vec()).await.unwrap();
        writer.shutdown().await;
        writer.shutdown().await;

        let err = writer.write_line(b"late\n".to_vec()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        let mut lines = BufReader::new(server).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_to_dropped_reader_fails() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let writer = LineWriter::spawn(client, 4);

        assert!(writer.write_line(b"lost\n".to_vec()).await.is_err());
    }
}
