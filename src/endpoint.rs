//! The endpoint state machine (spec §4.3): wires the parser, compiler,
//! writer, and ticker together around a connected socket and drives an
//! [`Application`]'s callbacks. Follows the teacher's `read.rs`/`write.rs`
//! split — a dedicated reader task owns the socket's read half, and a
//! single writer task owns the write half exclusively. Everything else
//! (the application handle, the ticker, the reader's own replies) only
//! ever reaches the socket by sending pre-compiled frame bytes through an
//! `mpsc` channel, so the writer's two-priority queue (`writer.rs`) is
//! the one place priority is actually decided — no `tokio::select!`
//! fairness assumptions required.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};

use crate::application::{Application, MessageBody, MessageKind};
use crate::clock::{Clock, SystemClock};
use crate::compiler::{compile_frame, random_mask_key};
use crate::config::EndpointConfig;
use crate::error::Error;
use crate::frame::{close_code, OpCode};
use crate::parser::{decode_close_payload, FrameParser, ParserEvent};
use crate::pipeline::{FrameDescriptor, Pipeline};
use crate::stats::{ConnectionStats, Stats};
use crate::ticker::{self, Liveness, TickOutcome};
use crate::writer::{CompletionHandle, Writer};

/// A pre-compiled frame waiting to be written, tagged with the priority
/// the writer should give it. `reply`, when present, is fulfilled with
/// the frame's own [`CompletionHandle`] as soon as the writer task has
/// enqueued it — the caller then awaits that handle to learn when the
/// bytes actually left the socket (spec §4.3: "returns the completion
/// handle of the final frame").
enum WriteRequest {
    Control(Vec<u8>, Option<oneshot::Sender<CompletionHandle>>),
    Data(Vec<u8>, Option<oneshot::Sender<CompletionHandle>>),
}

/// A lightweight, cloneable reference to a running endpoint, handed to
/// the [`Application`] so it can send messages or close the connection
/// from within its own callbacks without being the task that owns the
/// socket.
#[derive(Clone)]
pub struct EndpointHandle {
    shared: Arc<Shared>,
}

struct Shared {
    config: EndpointConfig,
    pipeline: Pipeline,
    stats: Arc<Mutex<Stats>>,
    closing_since: Arc<Mutex<Option<Instant>>>,
    unloaded: AtomicBool,
    write_tx: mpsc::UnboundedSender<WriteRequest>,
    /// Set by [`EndpointHandle::close`] when it initiates a close locally,
    /// so the reader loop can announce `on_close` with the application's
    /// own chosen code/reason instead of whatever the close handshake (or
    /// its timeout) eventually resolves to.
    local_close: Mutex<Option<(u16, String)>>,
    local_close_notify: Notify,
    local_close_announced: AtomicBool,
}

impl EndpointHandle {
    /// Sends a TEXT message, auto-fragmenting per spec §3/§4.3. Returns
    /// the completion handle of the final frame produced.
    pub async fn send_text(&self, text: String) -> Result<CompletionHandle, Error> {
        self.send(OpCode::Text, text.into_bytes()).await
    }

    /// Sends a BINARY message. Equivalent to `send_text` with `binary=true`
    /// in the reference's `send(data, binary)` signature.
    pub async fn send_binary(&self, data: Vec<u8>) -> Result<CompletionHandle, Error> {
        self.send(OpCode::Binary, data).await
    }

    async fn send(&self, opcode: OpCode, payload: Vec<u8>) -> Result<CompletionHandle, Error> {
        if self.shared.unloaded.load(Ordering::SeqCst) {
            return Err(Error::ClientDisconnected);
        }
        self.shared.stats.lock().await.messages_sent += 1;
        let frames = split_for_send(&payload, self.shared.config.auto_frame_size, opcode);
        let last = frames.len() - 1;
        let mut final_handle = None;
        for (i, (fin, op, chunk)) in frames.into_iter().enumerate() {
            let wire = build_frame(&self.shared.pipeline, &self.shared.config, fin, op, chunk);
            if i == last {
                let (reply_tx, reply_rx) = oneshot::channel();
                self.shared
                    .write_tx
                    .send(WriteRequest::Data(wire, Some(reply_tx)))
                    .map_err(|_| Error::ClientDisconnected)?;
                final_handle = Some(reply_rx.await.map_err(|_| Error::ClientDisconnected)?);
            } else {
                self.shared
                    .write_tx
                    .send(WriteRequest::Data(wire, None))
                    .map_err(|_| Error::ClientDisconnected)?;
            }
        }
        Ok(final_handle.expect("split_for_send always yields at least one frame"))
    }

    /// Sends an unsolicited PING, independent of the ticker's heartbeat.
    pub fn ping(&self) -> Result<(), Error> {
        if self.shared.unloaded.load(Ordering::SeqCst) {
            return Err(Error::ClientDisconnected);
        }
        let wire = build_frame(&self.shared.pipeline, &self.shared.config, true, OpCode::Ping, Vec::new());
        self.shared.write_tx.send(WriteRequest::Control(wire, None)).map_err(|_| Error::ClientDisconnected)
    }

    /// Initiates a graceful close: queues a CLOSE frame, starts the
    /// close-period timer, and awaits the CLOSE frame's own completion
    /// (spec §4.3). Idempotent — a second call is a no-op.
    pub async fn close(&self, code: u16, reason: &str) {
        let mut since = self.shared.closing_since.lock().await;
        if since.is_some() {
            return;
        }
        *since = Some(SystemClock.now());
        drop(since);
        *self.shared.local_close.lock().await = Some((code, reason.to_string()));
        self.shared.local_close_notify.notify_one();
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        let wire = build_frame(&self.shared.pipeline, &self.shared.config, true, OpCode::Close, payload);
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.shared.write_tx.send(WriteRequest::Control(wire, Some(reply_tx))).is_ok() {
            if let Ok(completion) = reply_rx.await {
                let _ = completion.await;
            }
        }
    }

    pub async fn get_info(&self) -> ConnectionStats {
        self.shared.stats.lock().await.clone()
    }

    pub fn is_unloaded(&self) -> bool {
        self.shared.unloaded.load(Ordering::SeqCst)
    }
}

/// Splits an outbound payload into `(fin, opcode, chunk)` frame pieces.
/// Messages within 1.5x `auto_frame_size` go out as a single frame; larger
/// ones are split into evenly-sized chunks (spec §3's auto-framing rule),
/// the first carrying the real opcode and the rest CONTINUATION.
fn split_for_send(payload: &[u8], auto_frame_size: usize, opcode: OpCode) -> Vec<(bool, OpCode, Vec<u8>)> {
    if payload.len() <= auto_frame_size * 3 / 2 {
        return vec![(true, opcode, payload.to_vec())];
    }
    let frame_count = payload.len().div_ceil(auto_frame_size);
    let chunk_size = payload.len().div_ceil(frame_count);
    let mut out = Vec::with_capacity(frame_count);
    for (i, chunk) in payload.chunks(chunk_size).enumerate() {
        let fin = i == frame_count - 1;
        let op = if i == 0 { opcode } else { OpCode::Continue };
        out.push((fin, op, chunk.to_vec()));
    }
    out
}

/// Builds the wire bytes for one outbound frame, running it through the
/// compiler's transform pipeline first.
fn build_frame(pipeline: &Pipeline, config: &EndpointConfig, fin: bool, opcode: OpCode, payload: Vec<u8>) -> Vec<u8> {
    let descriptor = pipeline.apply(FrameDescriptor { msg: payload, rsv1: false, fin, opcode });
    let mask = if config.role.mask_outbound() { Some(random_mask_key()) } else { None };
    compile_frame(&descriptor, mask)
}

/// Hands one request to the writer's underlying two-priority queue and
/// forwards its `CompletionHandle` back to whoever asked for it.
fn enqueue<W: AsyncWrite + Unpin>(writer: &mut Writer<W>, req: WriteRequest) {
    match req {
        WriteRequest::Control(bytes, reply) => {
            let handle = writer.enqueue_control(bytes);
            if let Some(reply) = reply {
                let _ = reply.send(handle);
            }
        }
        WriteRequest::Data(bytes, reply) => {
            let handle = writer.enqueue_data(bytes);
            if let Some(reply) = reply {
                let _ = reply.send(handle);
            }
        }
    }
}

/// Owns the socket's write half exclusively, draining `write_rx` into the
/// writer's control/data queues. Every batch of already-available requests
/// is pulled in with `try_recv` before pumping — and again between each
/// frame written — so a control frame queued behind a burst of data frames
/// still gets a chance to overtake them (spec §4.2) instead of the writer
/// only ever seeing one queued request at a time.
async fn writer_loop<W: AsyncWrite + Unpin>(
    write_half: W,
    mut write_rx: mpsc::UnboundedReceiver<WriteRequest>,
    stats: Arc<Mutex<Stats>>,
) {
    let mut writer = Writer::new(write_half);
    while let Some(req) = write_rx.recv().await {
        enqueue(&mut writer, req);
        while let Ok(req) = write_rx.try_recv() {
            enqueue(&mut writer, req);
        }

        while writer.pending() {
            match writer.pump_once().await {
                Ok(Some(outcome)) => {
                    let now = SystemClock.now();
                    let mut s = stats.lock().await;
                    s.frames_sent += 1;
                    s.bytes_sent += outcome.bytes as u64;
                    s.last_sent_at = Some(now);
                    if outcome.is_data {
                        s.last_data_sent_at = Some(now);
                    }
                }
                _ => break,
            }
            while let Ok(req) = write_rx.try_recv() {
                enqueue(&mut writer, req);
            }
        }
    }
}

/// Runs one connection end to end until the socket closes or a fatal
/// protocol error tears it down. Negotiated `headers` come from the
/// handshake layer (out of scope here, spec §1) and must be non-empty
/// (spec §3 construction invariant).
pub async fn run<S, A>(socket: S, config: EndpointConfig, headers: Vec<(String, String)>, mut app: A) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    A: Application,
{
    if headers.is_empty() {
        return Err(Error::EmptyHeaders);
    }

    let (read_half, write_half) = tokio::io::split(socket);
    let stats = Arc::new(Mutex::new(Stats::new(SystemClock.now())));
    let liveness = Arc::new(Liveness::default());
    let closing_since = Arc::new(Mutex::new(None));
    let pipeline = Pipeline::new();

    let (write_tx, write_rx) = mpsc::unbounded_channel::<WriteRequest>();

    let shared = Arc::new(Shared {
        config: config.clone(),
        pipeline,
        stats: stats.clone(),
        closing_since: closing_since.clone(),
        unloaded: AtomicBool::new(false),
        write_tx: write_tx.clone(),
        local_close: Mutex::new(None),
        local_close_notify: Notify::new(),
        local_close_announced: AtomicBool::new(false),
    });
    let handle = EndpointHandle { shared: shared.clone() };

    app.on_open(handle.clone()).await;

    let writer_task = tokio::spawn(writer_loop(write_half, write_rx, stats.clone()));

    let force_unload = Arc::new(Notify::new());

    let ticker_task = {
        let write_tx = write_tx.clone();
        let force_unload = force_unload.clone();
        ticker::spawn(config.clone(), stats.clone(), liveness.clone(), closing_since.clone(), move |outcome| {
            match outcome {
                TickOutcome::HeartbeatSent(bytes) => {
                    let _ = write_tx.send(WriteRequest::Control(bytes, None));
                    false
                }
                TickOutcome::Idle => false,
                TickOutcome::CloseTimedOut => {
                    force_unload.notify_one();
                    true
                }
                TickOutcome::PeerUnresponsive(bytes) => {
                    let _ = write_tx.send(WriteRequest::Control(bytes, None));
                    false
                }
            }
        })
    };

    let result = tokio::select! {
        r = read_loop(read_half, &shared, &liveness, &mut app) => r,
        _ = force_unload.notified() => {
            Ok((close_code::ABNORMAL_CLOSE, "peer did not complete the close handshake in time".to_string()))
        }
    };

    shared.unloaded.store(true, Ordering::SeqCst);
    ticker_task.abort();
    drop(write_tx);
    let _ = writer_task.await;

    {
        let mut s = stats.lock().await;
        s.closed_at = Some(SystemClock.now());
    }

    if !shared.local_close_announced.load(Ordering::SeqCst) {
        let (code, reason) = match &result {
            Ok((code, reason)) => (*code, reason.clone()),
            Err(e) => (e.close_code(), String::new()),
        };
        app.on_close(code, reason).await;
    }
    if let Err(e) = &result {
        app.on_error(e).await;
    }

    result.map(|_| ())
}

async fn read_loop<R, A>(
    mut read_half: R,
    shared: &Arc<Shared>,
    liveness: &Liveness,
    app: &mut A,
) -> Result<(u16, String), Error>
where
    R: AsyncRead + Unpin,
    A: Application,
{
    let mut parser = FrameParser::new(shared.config.clone());
    let mut buf = vec![0u8; 8192];
    let mut body_tx: Option<mpsc::Sender<Result<Vec<u8>, Error>>> = None;
    let mut local_close_announced = false;

    loop {
        let n = tokio::select! {
            result = read_half.read(&mut buf) => result?,
            _ = shared.local_close_notify.notified(), if !local_close_announced => {
                let local_close = shared.local_close.lock().await.clone();
                if let Some((code, reason)) = local_close {
                    app.on_close(code, reason).await;
                    local_close_announced = true;
                    shared.local_close_announced.store(true, Ordering::SeqCst);
                }
                continue;
            }
        };
        if n == 0 {
            return Ok((close_code::ABNORMAL_CLOSE, "peer closed the socket".to_string()));
        }

        {
            let mut s = shared.stats.lock().await;
            s.bytes_read += n as u64;
            s.last_read_at = Some(SystemClock.now());
        }

        let mut events = Vec::new();
        parser.feed(&buf[..n], &mut |e| events.push(e));

        for event in events {
            match event {
                ParserEvent::Data { payload, fin, opcode } => {
                    {
                        let mut s = shared.stats.lock().await;
                        s.frames_read += 1;
                        s.last_data_read_at = Some(SystemClock.now());
                    }
                    let kind = match opcode {
                        OpCode::Text => MessageKind::Text,
                        _ => MessageKind::Binary,
                    };
                    let tx = match body_tx.take() {
                        Some(tx) => tx,
                        None => {
                            let (tx, body) = MessageBody::new();
                            app.on_message(kind, body).await;
                            tx
                        }
                    };
                    let _ = tx.send(Ok(payload)).await;
                    if fin {
                        shared.stats.lock().await.messages_read += 1;
                    } else {
                        body_tx = Some(tx);
                    }
                }
                ParserEvent::Control { payload, opcode } => {
                    shared.stats.lock().await.frames_read += 1;
                    match opcode {
                        OpCode::Ping => {
                            let wire = build_frame(&shared.pipeline, &shared.config, true, OpCode::Pong, payload);
                            let _ = shared.write_tx.send(WriteRequest::Control(wire, None));
                        }
                        OpCode::Pong => {
                            if let Ok(bytes) = <[u8; 8]>::try_from(payload.as_slice()) {
                                log::trace!("pong acknowledges ping {}", u64::from_be_bytes(bytes));
                            }
                            liveness.note_pong();
                        }
                        OpCode::Close => {
                            let (code, reason) = decode_close_payload(&payload);
                            let mut since = shared.closing_since.lock().await;
                            if since.is_some() {
                                // Peer confirmed the close we already initiated.
                                return Ok((code.unwrap_or(close_code::NORMAL_CLOSE), reason));
                            }
                            if payload.len() < 2 {
                                // Malformed peer-initiated close: ignore it and
                                // keep reading rather than tearing the
                                // connection down over a frame with no code.
                                continue;
                            }
                            *since = Some(SystemClock.now());
                            drop(since);
                            let wire = build_frame(&shared.pipeline, &shared.config, true, OpCode::Close, payload);
                            let _ = shared.write_tx.send(WriteRequest::Control(wire, None));
                            return Ok((code.unwrap_or(close_code::NORMAL_CLOSE), reason));
                        }
                        _ => unreachable!("OpCode::from_byte only yields control variants for Close/Ping/Pong"),
                    }
                }
                ParserEvent::Error { message, close_code: code } => {
                    let close_payload = code.to_be_bytes().to_vec();
                    let wire = build_frame(&shared.pipeline, &shared.config, true, OpCode::Close, close_payload);
                    let _ = shared.write_tx.send(WriteRequest::Control(wire, None));
                    return Err(Error::Protocol { message, code });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exercises `writer_loop` directly through the channel rather than
    /// calling `Writer::enqueue_control`/`enqueue_data` in-process, so it
    /// actually proves a control frame queued behind a burst of data
    /// frames overtakes them on the wire.
    #[tokio::test]
    async fn control_frame_queued_behind_data_overtakes_it_on_the_wire() {
        let (mut client, server) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Mutex::new(Stats::new(SystemClock.now())));

        tx.send(WriteRequest::Data(vec![0xAA], None)).unwrap();
        tx.send(WriteRequest::Data(vec![0xBB], None)).unwrap();
        tx.send(WriteRequest::Control(vec![0xCC], None)).unwrap();
        drop(tx);

        writer_loop(server, rx, stats).await;

        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0xCC, 0xAA, 0xBB]);
    }
}
