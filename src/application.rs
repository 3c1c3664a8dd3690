//! The application-facing callback interface (spec §4.3 / §6). Modeled as
//! a native `async fn`-in-trait, the way `smpp`'s client trait avoids
//! pulling in the `async-trait` crate now that the language supports it
//! directly — generalized here to a generic `Endpoint<A: Application>`
//! rather than a trait object, since the endpoint only ever drives one
//! concrete application type per connection.

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::endpoint::EndpointHandle;
use crate::error::Error;

/// A lazily-produced message body: chunks arrive as the parser emits them
/// rather than all at once, so large messages don't have to be fully
/// buffered before the application sees the first byte.
pub struct MessageBody {
    inner: ReceiverStream<Result<Vec<u8>, Error>>,
}

impl MessageBody {
    pub(crate) fn new() -> (mpsc::Sender<Result<Vec<u8>, Error>>, Self) {
        let (tx, rx) = mpsc::channel(8);
        (tx, Self { inner: ReceiverStream::new(rx) })
    }
}

impl Stream for MessageBody {
    type Item = Result<Vec<u8>, Error>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Whether a data message is text or binary, carried alongside its body
/// so the application doesn't have to re-derive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// Callbacks the endpoint drives over a connection's lifetime (spec §4.3's
/// state machine transitions, surfaced to the embedder). Implementations
/// get an [`EndpointHandle`] to send replies, read live stats, or close
/// the connection — the same proxy the reader task itself writes through.
pub trait Application: Send + 'static {
    fn on_open(&mut self, endpoint: EndpointHandle) -> impl Future<Output = ()> + Send;

    fn on_message(
        &mut self,
        kind: MessageKind,
        body: MessageBody,
    ) -> impl Future<Output = ()> + Send;

    fn on_close(&mut self, code: u16, reason: String) -> impl Future<Output = ()> + Send;

    /// Called when the endpoint tears down abnormally (parser/writer
    /// error, I/O failure, timeout) rather than via a clean close
    /// handshake. Default does nothing.
    fn on_error(&mut self, _err: &Error) -> impl Future<Output = ()> + Send {
        async {}
    }
}
