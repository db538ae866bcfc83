//! One management session with one peer.
//!
//! A [`Connection`] is the handle the rest of the process uses to talk to the peer: send
//! notifications and requests, sweep timed-out requests, close it.  The session itself is driven
//! by an event loop task that owns the transport.  That task reads one message at a time, handles
//! it completely (including any hand-off to the host's main thread) and writes the reply before
//! reading the next, so messages from one peer are never handled concurrently.
//!
//! Writes from handles go through an unbounded channel to the event loop, so sending never blocks
//! and can safely be done from the host's main thread.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use srvmgmt_core::HostApi;
use srvmgmt_jsonrpc::{Envelope, Id, Message, Notification, Peer, Request, Response};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::dispatch::dispatch;
use crate::pending::{PendingRequest, PendingRequests, PendingResponse};
use crate::registry::{ClientInfo, OutgoingNotification, OutgoingRequest, Registry};
use crate::{ConnectionError, DispatchError, RequestError};

/// Handle to a live session with a management client.
///
/// Cheap to share via `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    remote_peer: String,
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingRequests,
    next_transaction_id: AtomicU64,
    request_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Connection {
    /// Create the connection handle for `peer` and the event loop that services it.
    ///
    /// The event loop doesn't do anything until it is [run](ConnectionEventLoop::run), which is
    /// the caller's job.  Splitting the two lets the caller publish the handle before the loop
    /// can possibly finish.
    pub(crate) fn new<A: HostApi>(
        id: u64,
        peer: Peer,
        registry: Arc<Registry<A>>,
        api: Arc<A>,
        request_timeout: Duration,
        cancellation_token: CancellationToken,
    ) -> (Arc<Self>, ConnectionEventLoop<A>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let connection = Arc::new(Self {
            id,
            remote_peer: peer.remote_peer().to_string(),
            outbound: outbound_tx,
            pending: PendingRequests::default(),
            // Transaction ids start at 1 so that 0 is never mistaken for one of ours
            next_transaction_id: AtomicU64::new(1),
            request_timeout,
            cancellation_token,
        });

        let event_loop = ConnectionEventLoop {
            inbound: InboundHandler {
                connection: connection.clone(),
                registry,
                api,
            },
            peer,
            outbound: outbound_rx,
        };

        (connection, event_loop)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn client_info(&self) -> ClientInfo {
        ClientInfo::new(self.id)
    }

    pub fn remote_peer(&self) -> &str {
        &self.remote_peer
    }

    /// Send a notification to the peer.
    ///
    /// Returns as soon as the message is queued for sending.
    pub fn send_notification<P: Serialize>(
        &self,
        notification: &OutgoingNotification<P>,
        params: Option<&P>,
    ) -> Result<(), ConnectionError> {
        let method = notification.method();
        let params = method.encode_params(params)?;

        self.enqueue(Message::Notification(Notification::new(method.id().to_string(), params)))
    }

    /// Send a request to the peer, returning a future that resolves to its response.
    ///
    /// Returns as soon as the message is queued.  The request fails with
    /// [`RequestError::Timeout`] if no response arrives within the configured request timeout,
    /// which is enforced by [`Connection::tick`].
    pub fn send_request<P, R>(
        &self,
        request: &OutgoingRequest<P, R>,
        params: Option<&P>,
    ) -> Result<PendingResponse<R>, ConnectionError>
    where
        P: Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        let method = request.method();
        let params = method.encode_params(params)?;

        let transaction_id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.request_timeout;

        let (result_tx, result_rx) = oneshot::channel();
        let complete = {
            let method = method.clone();
            Box::new(move |result: Result<JsonValue, RequestError>| {
                let result = result.and_then(|value| method.decode_result::<R>(value).map_err(RequestError::from));
                // The caller may have stopped waiting
                let _ = result_tx.send(result);
            })
        };

        // The entry must exist before the request goes out, or a fast response would find nothing
        // to complete
        self.pending
            .insert(transaction_id, PendingRequest::new(method.clone(), deadline, complete));

        let message = Message::Request(Request::new(
            Id::from(transaction_id),
            method.id().to_string(),
            params,
        ));
        if let Err(e) = self.enqueue(message) {
            self.pending.remove(transaction_id);
            return Err(e);
        }

        tracing::trace!(connection_id = self.id, transaction_id, method = %method.id(), "Sent request");

        Ok(PendingResponse::new(transaction_id, result_rx))
    }

    /// Fail every outgoing request whose deadline has passed.
    ///
    /// The server calls this periodically; nothing else ever times requests out.
    pub fn tick(&self) {
        for (transaction_id, request) in self.pending.take_expired(Instant::now()) {
            let method = request.method().id().clone();
            tracing::debug!(connection_id = self.id, transaction_id, %method, "Outgoing request timed out");
            request.complete(Err(RequestError::Timeout { method }));
        }
    }

    /// Number of outgoing requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Stop the event loop and drop the transport.
    pub fn close(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Wait until the connection is closed, for whatever reason.
    pub async fn closed(&self) {
        self.cancellation_token.cancelled().await
    }

    fn enqueue(&self, message: Message) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.outbound.send(message).map_err(|_| ConnectionError::Closed)
    }

    /// Fail everything still pending; called once the event loop has stopped.
    fn fail_pending(&self) {
        let pending = self.pending.drain();
        if !pending.is_empty() {
            tracing::debug!(
                connection_id = self.id,
                num_pending_requests = pending.len(),
                "Failing pending outgoing requests because the connection closed"
            );
        }

        for (_, request) in pending {
            request.complete(Err(RequestError::ConnectionClosed));
        }
    }
}

/// The task that owns a connection's transport.
pub(crate) struct ConnectionEventLoop<A> {
    inbound: InboundHandler<A>,
    peer: Peer,
    outbound: mpsc::UnboundedReceiver<Message>,
}

impl<A: HostApi> ConnectionEventLoop<A> {
    /// Service the connection until the peer goes away, the transport fails, or the connection
    /// is closed.
    pub(crate) async fn run(self) {
        let connection = &self.inbound.connection;
        let span = tracing::debug_span!(
            "connection",
            connection_id = connection.id,
            remote_peer = %connection.remote_peer
        );

        self.event_loop().instrument(span).await
    }

    async fn event_loop(mut self) {
        tracing::debug!("Connection event loop is starting");

        let termination_reason = loop {
            tokio::select! {
                outbound_message = self.outbound.recv() => {
                    // The connection holds a sender, and this loop holds the connection, so the
                    // channel can't be closed while the loop runs
                    let Some(message) = outbound_message else {
                        break "outbound_channel_closed";
                    };
                    if self.send(message).await.is_err() {
                        break "send_failed";
                    }
                },
                received = self.peer.receive_text() => {
                    match received {
                        Ok(Some(text)) => {
                            if let Some(reply) = self.inbound.handle_text(&text).await {
                                if self.send(reply).await.is_err() {
                                    break "send_failed";
                                }
                            }
                        }
                        Ok(None) => {
                            tracing::debug!("Peer closed connection");
                            break "remote_peer_closed_connection";
                        }
                        Err(e) => {
                            tracing::warn!(err = %e, "Error receiving message from peer; closing connection");
                            break "receive_failed";
                        }
                    }
                },
                _ = self.inbound.connection.cancellation_token.cancelled() => {
                    break "cancelled";
                }
            }
        };

        // Mark the connection closed so handles stop queuing messages nobody will send, then fail
        // whatever was still waiting for a response
        let connection = &self.inbound.connection;
        connection.cancellation_token.cancel();
        self.outbound.close();
        connection.fail_pending();

        tracing::debug!(termination_reason, "Connection event loop is exiting");
    }

    async fn send(&mut self, message: Message) -> Result<(), srvmgmt_jsonrpc::JsonRpcError> {
        self.peer.send_message(message).await.inspect_err(|e| {
            tracing::error!(err = %e, "Failed to send message to peer; closing connection");
        })
    }
}

/// The part of the event loop that interprets inbound messages.
///
/// Kept apart from the transport so handling a message only needs shared access to it.
struct InboundHandler<A> {
    connection: Arc<Connection>,
    registry: Arc<Registry<A>>,
    api: Arc<A>,
}

impl<A: HostApi> InboundHandler<A> {
    /// Handle one frame of text from the peer, returning the reply to send, if any.
    async fn handle_text(&self, text: &str) -> Option<Message> {
        let value = match Message::parse(text) {
            Ok(value) => value,
            Err(source) => {
                tracing::warn!(err = %source, "Peer sent a message that is not valid JSON");
                let error = DispatchError::ParseError { source };
                return Some(Message::Response(Response::error_detail(Id::Null, error.error_details())));
            }
        };

        match value {
            JsonValue::Array(elements) => {
                tracing::trace!(batch_size = elements.len(), "Handling batch");

                let mut replies = Vec::with_capacity(elements.len());
                for element in elements {
                    if let Some(reply) = self.handle_single(element).await {
                        replies.push(Message::Response(reply));
                    }
                }

                // Even an empty batch, or one made up only of notifications, gets an array back
                Some(Message::Batch(replies))
            }
            value => self.handle_single(value).await.map(Message::Response),
        }
    }

    async fn handle_single(&self, value: JsonValue) -> Option<Response> {
        let JsonValue::Object(object) = value else {
            tracing::warn!("Peer sent a message that is not a JSON object");
            let error = DispatchError::InvalidRequest {
                reason: "Message must be a JSON object".into(),
            };
            return Some(Response::error_detail(Id::Null, error.error_details()));
        };

        match Envelope::classify(object) {
            Envelope::Call { id, method, params } => self.handle_call(id, method, params).await,
            Envelope::Response { transaction_id, result } => {
                self.handle_response(transaction_id, result);
                None
            }
            Envelope::UnmatchedResponse { id } => {
                tracing::debug!(%id, "Ignoring response with an id that matches no pending request");
                None
            }
            Envelope::Error { transaction_id, error } => {
                self.handle_error_response(transaction_id, error);
                None
            }
            Envelope::Invalid { id, reason } => {
                tracing::warn!(request_id = %id, reason, "Peer sent an invalid request");
                let error = DispatchError::InvalidRequest { reason: reason.into() };
                Some(Response::error_detail(id, error.error_details()))
            }
        }
    }

    async fn handle_call(&self, id: Option<Id>, method: String, params: Option<JsonValue>) -> Option<Response> {
        let span = tracing::debug_span!(
            "call",
            %method,
            request_id = id.as_ref().map(tracing::field::display)
        );

        async move {
            let outcome = dispatch(
                &self.registry,
                &self.api,
                self.connection.client_info(),
                &method,
                params.clone(),
            )
            .await;

            if let Err(e) = &outcome {
                match e {
                    DispatchError::InternalError { source } => {
                        tracing::error!(err = ?source, ?params, "Method failed with an internal error");
                    }
                    other => {
                        tracing::warn!(err = %other, ?params, "Method call failed");
                    }
                }
            }

            // Notifications are fire-and-forget: no reply either way
            let id = id?;
            Some(match outcome {
                Ok(result) => Response::success(id, result),
                Err(e) => Response::error_detail(id, e.error_details()),
            })
        }
        .instrument(span)
        .await
    }

    fn handle_response(&self, transaction_id: u64, result: JsonValue) {
        match self.connection.pending.remove(transaction_id) {
            Some(request) => {
                tracing::trace!(transaction_id, method = %request.method().id(), "Received response");
                request.complete(Ok(result));
            }
            None => {
                tracing::warn!(transaction_id, "Response does not match any pending request; ignoring");
            }
        }
    }

    fn handle_error_response(&self, transaction_id: Option<u64>, error: JsonValue) {
        let request = transaction_id.and_then(|transaction_id| self.connection.pending.remove(transaction_id));

        tracing::warn!(
            ?transaction_id,
            %error,
            matched = request.is_some(),
            "Peer sent an error response"
        );

        if let Some(request) = request {
            let method = request.method().id().clone();
            request.complete(Err(RequestError::Remote { method, error }));
        }
    }
}
