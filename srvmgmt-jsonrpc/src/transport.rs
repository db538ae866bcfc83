//! In this crate, the concept of a "transport" abstracts away the details of how JSON-RPC messages
//! are sent and received.  The reference deployment of the management protocol runs over a
//! WebSocket that was upgraded from an authenticated HTTP handshake, but none of that is visible
//! at this level: a transport is very simply a source of and sink of whole text messages.
//!
//! Upgrading a raw socket into a transport (and deciding whether the peer is allowed to connect at
//! all) happens up-stack, see `srvmgmt_server::Acceptor`.
use std::borrow::Cow;
use std::pin::Pin;

use crate::types;
use crate::{JsonRpcError, Result};
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt, TryFutureExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{self, Framed};

/// A transport is a source and sink of JSON-RPC messages, that interfaces with some underlying
/// tranport layer provided by the caller.
///
/// At the transport layer messages are opaque text.  Whether they are valid JSON is decided by the
/// connection that consumes them.
pub trait Transport: Send + Sized + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Transport-specific identifier of the remote peer, useful for logging and debugging.
    fn remote_peer(&self) -> Cow<'static, str>;

    /// Send a message to the transport.  Should not complete until the message has been handed off
    /// to the transport layer and transmitted to the remote peer, whatever that means for the
    /// partciular transport.
    fn send_message(&mut self, message: String) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

    /// Receive a message from the transport.
    ///
    /// This future must be cancelation-safe, such that if the returned future is dropped before
    /// it completes, it will not result in incomplete messages being received or in missed
    /// messages.  The connection event loop polls it inside `tokio::select!`.
    ///
    /// This should return `Ok(None)` if the transport is closed and no more messages can be
    /// received.  An `Err` means the byte stream itself could not be decoded into messages and is
    /// fatal to the connection.
    fn receive_message(&mut self) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;
}

/// Internal dyn-compatible wrapper trate around [`Transport`] to erase the types and allow dynamic
/// dispatch
trait BoxedTransport: Send + 'static {
    fn boxed_send_message(
        &mut self,
        message: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
    fn boxed_receive_message(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + '_>>;
}

impl<T> BoxedTransport for T
where
    T: Transport + 'static,
{
    fn boxed_send_message(
        &mut self,
        message: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        <Self as Transport>::send_message(self, message)
            .map_err(|e| JsonRpcError::Transport { source: Box::new(e) })
            .boxed()
    }

    fn boxed_receive_message(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + '_>> {
        <Self as Transport>::receive_message(self)
            .map_err(|e| JsonRpcError::Transport { source: Box::new(e) })
            .boxed()
    }
}

/// Implement transport on stream/sink pairs, mainly for testing with in-memory channels.
impl<In, InErr, Out> Transport for (In, Out)
where
    In: Stream<Item = Result<String, InErr>> + Unpin + Send + 'static,
    InErr: std::error::Error + Send + Sync + 'static,
    Out: Sink<String> + Unpin + Send + 'static,
    Out::Error: std::error::Error + Send + Sync + 'static,
{
    type Error = JsonRpcError;

    fn remote_peer(&self) -> Cow<'static, str> {
        Cow::Borrowed("in-memory")
    }

    fn send_message(&mut self, message: String) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.1
            .send(message)
            .map_err(|e| JsonRpcError::Transport { source: Box::new(e) })
    }

    fn receive_message(&mut self) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send {
        self.0.next().map(|opt_result: Option<Result<_, InErr>>| {
            // Convert this from Option<Result<T>> to Result<Option<T>>
            let result = opt_result.transpose();

            result.map_err(|e| JsonRpcError::Transport { source: Box::new(e) })
        })
    }
}

/// Implementation of [`Transport`] that is generic over any type that implements
/// [`tokio::io::AsyncRead`] and [`tokio::io::AsyncWrite`].
///
/// Reads and writes messages assuming that each message is UTF-8 text separated by newline
/// characters.  A line that is not UTF-8 or exceeds the codec's maximum length is a receive error,
/// which terminates the connection.
impl<Io> Transport for Framed<Io, codec::LinesCodec>
where
    Io: Send + Unpin + AsyncRead + AsyncWrite + 'static,
{
    type Error = JsonRpcError;

    /// A framed stream doesn't know who is on the other end; wrap it in a [`Peer`] with
    /// [`Peer::with_remote_peer`] to name it.
    fn remote_peer(&self) -> Cow<'static, str> {
        Cow::Borrowed("stream")
    }

    fn send_message(&mut self, message: String) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
        self.send(message)
            .map_err(|e| JsonRpcError::Transport { source: Box::new(e) })
    }

    fn receive_message(&mut self) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_ {
        // NOTE: `recieve_message` must be cancel safe.  `StreamExt::next` doesn't take ownership
        // of the stream and `Framed` buffers partial frames internally.
        self.next()
            .map(|opt_result: Option<Result<_, codec::LinesCodecError>>| {
                let result = opt_result.transpose();

                result.map_err(|e| JsonRpcError::Transport { source: Box::new(e) })
            })
    }
}

/// Wrapper around a [`Transport`] implementation which erases some irrelevant type information and
/// standardizes the error type for failures to [`JsonRpcError`].
///
/// A `Peer` is owned by exactly one connection event loop, so unlike the transport-sharing designs
/// that hand out `&self` access, send and receive here take `&mut self`.
pub struct Peer {
    remote_peer: String,
    transport: Box<dyn BoxedTransport>,
}

impl Peer {
    /// Wrap a [`Transport`] implementation in a [`Peer`] object.
    pub fn new(transport: impl Transport) -> Self {
        Self {
            remote_peer: transport.remote_peer().to_string(),
            transport: Box::new(transport),
        }
    }

    /// Override the transport's own idea of who the remote peer is, typically with a socket
    /// address known to whoever accepted the connection.
    pub fn with_remote_peer(mut self, remote_peer: impl Into<String>) -> Self {
        self.remote_peer = remote_peer.into();
        self
    }

    /// Return the remote peer's identifier, which is transport-specific.
    pub fn remote_peer(&self) -> &str {
        &self.remote_peer
    }

    /// Serialize a message and send it to the remote peer.
    pub async fn send_message(&mut self, message: types::Message) -> Result<()> {
        let text = message.into_string()?;
        self.send_text(text).await
    }

    /// Send already-serialized message text to the remote peer.
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.transport.boxed_send_message(text).await
    }

    /// Receive the text of the next message from the remote peer.
    ///
    /// If the underlying transport reports that the connection is closed, returns `None`.
    pub async fn receive_text(&mut self) -> Result<Option<String>> {
        self.transport.boxed_receive_message().await
    }
}
