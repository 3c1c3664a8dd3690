//! Frame writer (spec §4.2): owns the socket's write half and a
//! two-priority queue — control frames overtake queued data frames, but
//! never preempt a write already in flight. The teacher's `write.rs`
//! hand-rolls masking per role and leaves partial-write bookkeeping to the
//! caller; here the actual socket write is delegated to
//! `AsyncWriteExt::write_all`, which already loops over partial writes, so
//! the queue only has to decide *what* goes next, not how much of it made
//! it onto the wire (Design Notes §9's steady-state write-loop guidance).

use std::collections::VecDeque;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;

use crate::error::Error;

/// Resolves once the writer has attempted the associated frame. Callers
/// that care whether it actually succeeded should inspect the writer's
/// own error propagation (the write loop tears the connection down on
/// failure); this handle only signals "no longer queued".
pub type CompletionHandle = oneshot::Receiver<()>;

struct Queued {
    bytes: Vec<u8>,
    is_data: bool,
    completion: Option<oneshot::Sender<()>>,
}

/// Outcome of a single successful queue drain, for the caller to fold
/// into connection statistics.
pub struct WriteOutcome {
    pub bytes: usize,
    pub is_data: bool,
}

pub struct Writer<W> {
    sink: W,
    control_queue: VecDeque<Queued>,
    data_queue: VecDeque<Queued>,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    pub fn new(sink: W) -> Self {
        Self { sink, control_queue: VecDeque::new(), data_queue: VecDeque::new() }
    }

    /// Queues a control frame (CLOSE/PING/PONG). Drained before any
    /// pending data frame.
    pub fn enqueue_control(&mut self, bytes: Vec<u8>) -> CompletionHandle {
        let (tx, rx) = oneshot::channel();
        self.control_queue.push_back(Queued { bytes, is_data: false, completion: Some(tx) });
        rx
    }

    /// Queues a data frame (TEXT/BINARY/CONTINUATION).
    pub fn enqueue_data(&mut self, bytes: Vec<u8>) -> CompletionHandle {
        let (tx, rx) = oneshot::channel();
        self.data_queue.push_back(Queued { bytes, is_data: true, completion: Some(tx) });
        rx
    }

    pub fn pending(&self) -> bool {
        !self.control_queue.is_empty() || !self.data_queue.is_empty()
    }

    /// Drains one queued frame, writing it fully before returning. Control
    /// frames are always preferred; within a priority class, frames are
    /// written in submission order.
    pub async fn pump_once(&mut self) -> Result<Option<WriteOutcome>, Error> {
        let frame = match self.control_queue.pop_front() {
            Some(frame) => frame,
            None => match self.data_queue.pop_front() {
                Some(frame) => frame,
                None => return Ok(None),
            },
        };

        let len = frame.bytes.len();
        let result = self.sink.write_all(&frame.bytes).await;
        if let Some(tx) = frame.completion {
            let _ = tx.send(());
        }
        result?;
        Ok(Some(WriteOutcome { bytes: len, is_data: frame.is_data }))
    }

    /// Drains the whole queue. Used on graceful shutdown to flush a final
    /// CLOSE frame ahead of tearing the socket down.
    pub async fn drain(&mut self) -> Result<(), Error> {
        while self.pump_once().await?.is_some() {}
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.sink.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn control_frame_overtakes_queued_data_frame() {
        let (client, mut server) = duplex(1024);
        let mut writer = Writer::new(client);

        writer.enqueue_data(vec![1, 2, 3]);
        writer.enqueue_control(vec![9, 9]);

        writer.pump_once().await.unwrap();

        let mut buf = [0u8; 2];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        assert_eq!(buf, [9, 9]);
    }

    #[tokio::test]
    async fn completion_handle_resolves_after_write() {
        let (client, mut server) = duplex(1024);
        let mut writer = Writer::new(client);
        let handle = writer.enqueue_data(vec![1, 2, 3]);
        writer.pump_once().await.unwrap();
        handle.await.unwrap();

        let mut buf = [0u8; 3];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[tokio::test]
    async fn drain_empties_both_queues() {
        let (client, mut server) = duplex(1024);
        let mut writer = Writer::new(client);
        writer.enqueue_data(vec![1]);
        writer.enqueue_control(vec![2]);
        writer.drain().await.unwrap();
        assert!(!writer.pending());

        let mut buf = [0u8; 2];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        assert_eq!(buf, [2, 1]);
    }
}
