//! The set of live connections, and the tasks that accept and maintain them.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use srvmgmt_core::models::ServerState;
use srvmgmt_core::{HostApi, ManagementApi};
use srvmgmt_jsonrpc::{Peer, Transport};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::connection::Connection;
use crate::registry::{OutgoingNotification, Registry};
use crate::{Result, ServerConfig, ServerError};

/// Turns a freshly accepted socket into a message transport.
///
/// This is where a deployment authenticates the peer and performs whatever protocol upgrade it
/// needs (a WebSocket handshake, TLS).  Returning an error rejects the connection.
#[async_trait]
pub trait Acceptor: Send + Sync + 'static {
    type Transport: Transport;

    async fn accept(&self, socket: TcpStream, remote_addr: SocketAddr) -> anyhow::Result<Self::Transport>;
}

/// Accepts every connection as newline-delimited JSON, without authentication.
///
/// Meant for local tooling and tests.
#[derive(Debug, Clone)]
pub struct LinesAcceptor {
    max_message_length: usize,
}

impl LinesAcceptor {
    pub fn new(max_message_length: usize) -> Self {
        Self { max_message_length }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.max_message_length)
    }
}

#[async_trait]
impl Acceptor for LinesAcceptor {
    type Transport = Framed<TcpStream, LinesCodec>;

    async fn accept(&self, socket: TcpStream, _remote_addr: SocketAddr) -> anyhow::Result<Self::Transport> {
        socket.set_nodelay(true)?;
        Ok(Framed::new(socket, LinesCodec::new_with_max_length(self.max_message_length)))
    }
}

/// The management server.
///
/// Cheap to clone; clones share the same connection set.  Must be used from within a tokio
/// runtime.
pub struct Server<A: HostApi> {
    inner: Arc<ServerInner<A>>,
}

impl<A: HostApi> Clone for Server<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct ServerInner<A: HostApi> {
    registry: Arc<Registry<A>>,
    api: Arc<A>,
    config: ServerConfig,
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    next_connection_id: AtomicU64,
    background_started: AtomicBool,
    listening: Mutex<Option<SocketAddr>>,
    cancellation_token: CancellationToken,
}

impl<A: HostApi> Server<A> {
    pub fn new(registry: Arc<Registry<A>>, api: Arc<A>, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                registry,
                api,
                config,
                connections: Mutex::new(HashMap::new()),
                next_connection_id: AtomicU64::new(1),
                background_started: AtomicBool::new(false),
                listening: Mutex::new(None),
                cancellation_token: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<Registry<A>> {
        &self.inner.registry
    }

    /// Bind to `addr` and start accepting connections through `acceptor`.
    ///
    /// Returns the address actually bound, which is useful when binding port 0.
    pub async fn start(&self, addr: impl ToSocketAddrs + std::fmt::Debug, acceptor: impl Acceptor) -> Result<SocketAddr> {
        if self.is_stopped() {
            return Err(ServerError::Stopped);
        }

        let addr_string = format!("{addr:?}");
        let listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
            addr: addr_string.clone(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr_string,
            source,
        })?;

        {
            let mut listening = self.inner.listening.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(addr) = *listening {
                return Err(ServerError::AlreadyListening { addr });
            }
            *listening = Some(local_addr);
        }

        self.ensure_background_tasks();

        let span = tracing::info_span!("listener", %local_addr);
        tokio::spawn(self.clone().accept_loop(listener, Arc::new(acceptor)).instrument(span));

        tracing::info!(%local_addr, "Management server listening");
        Ok(local_addr)
    }

    /// Serve a peer whose transport is already established.
    pub fn serve_connection(&self, transport: impl Transport) -> Arc<Connection> {
        self.serve_peer(Peer::new(transport))
    }

    fn serve_peer(&self, peer: Peer) -> Arc<Connection> {
        self.ensure_background_tasks();

        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (connection, event_loop) = Connection::new(
            id,
            peer,
            self.inner.registry.clone(),
            self.inner.api.clone(),
            self.inner.config.request_timeout,
            self.inner.cancellation_token.child_token(),
        );

        if self.is_stopped() {
            // Too late; the loop will see the cancelled token and exit right away
            tracing::warn!(connection_id = id, "Connection arrived after the server was stopped");
        } else {
            self.on_connected(connection.clone());
        }

        let server = self.clone();
        tokio::spawn(async move {
            event_loop.run().await;
            server.on_disconnected(id);
        });

        connection
    }

    /// Run `action` on every live connection, holding the connection set locked throughout.
    ///
    /// `action` must not call back into the server's connection management.
    pub fn for_each_connection(&self, mut action: impl FnMut(&Arc<Connection>)) {
        let connections = self.connections();
        for connection in connections.values() {
            action(connection);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections().len()
    }

    pub fn connection(&self, id: u64) -> Option<Arc<Connection>> {
        self.connections().get(&id).cloned()
    }

    /// Send a notification to every live connection.
    ///
    /// Connections that can't take the notification are skipped and logged; the number of
    /// connections it was queued on is returned.
    pub fn broadcast_notification<P: Serialize>(&self, notification: &OutgoingNotification<P>, params: Option<&P>) -> usize {
        let mut sent = 0;
        self.for_each_connection(|connection| match connection.send_notification(notification, params) {
            Ok(()) => sent += 1,
            Err(e) => {
                tracing::warn!(
                    connection_id = connection.id(),
                    method = %notification.method().id(),
                    err = %e,
                    "Failed to send notification to connection"
                );
            }
        });
        sent
    }

    /// Sweep every connection for timed-out outgoing requests.
    ///
    /// Runs periodically on its own once the server has a connection; public so hosts can drive
    /// it from their own loop too.
    pub fn tick(&self) {
        self.for_each_connection(|connection| connection.tick());
    }

    /// Periodically broadcast `notification` with the current server status, if
    /// [`ServerConfig::status_heartbeat_interval`] is set.
    ///
    /// The status is read on the host's main thread.
    pub fn start_status_heartbeat(&self, notification: OutgoingNotification<ServerState>)
    where
        A: ManagementApi,
    {
        let Some(interval) = self.inner.config.status_heartbeat_interval else {
            tracing::debug!("No status heartbeat interval configured");
            return;
        };
        let interval = interval.max(ServerConfig::MIN_INTERVAL);

        let server = self.clone();
        let cancellation_token = self.inner.cancellation_token.child_token();
        tokio::spawn(
            async move {
                let mut timer = tokio::time::interval(interval);
                timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = cancellation_token.cancelled() => break,
                        _ = timer.tick() => {
                            let api = server.inner.api.clone();
                            match server.inner.api.main_thread().submit(move || api.server_state().status()).await {
                                Ok(status) => {
                                    server.broadcast_notification(&notification, Some(&status));
                                }
                                Err(e) => {
                                    tracing::error!(err = %e, "Unable to read server status for heartbeat");
                                }
                            }
                        }
                    }
                }
                tracing::debug!("Status heartbeat stopped");
            }
            .instrument(tracing::debug_span!("status_heartbeat")),
        );
    }

    /// Stop listening, stop every connection and forget them.
    ///
    /// Peers are not sent anything first; their transports are simply dropped.
    pub fn stop(&self) {
        tracing::info!("Stopping management server");

        self.inner.cancellation_token.cancel();
        let drained: Vec<_> = self.connections().drain().collect();
        tracing::debug!(num_connections = drained.len(), "Dropped live connections");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.cancellation_token.is_cancelled()
    }

    fn on_connected(&self, connection: Arc<Connection>) {
        tracing::debug!(
            connection_id = connection.id(),
            remote_peer = connection.remote_peer(),
            "Connection established"
        );
        self.connections().insert(connection.id(), connection);
    }

    fn on_disconnected(&self, id: u64) {
        if self.connections().remove(&id).is_some() {
            tracing::debug!(connection_id = id, "Connection closed");
        }
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<u64, Arc<Connection>>> {
        self.inner.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the periodic tick the first time anything needs it.
    fn ensure_background_tasks(&self) {
        if self.inner.background_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let server = self.clone();
        let cancellation_token = self.inner.cancellation_token.child_token();
        let tick_interval = self.inner.config.tick_interval.max(ServerConfig::MIN_INTERVAL);
        tokio::spawn(
            async move {
                let mut timer = tokio::time::interval(tick_interval);
                timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = cancellation_token.cancelled() => break,
                        _ = timer.tick() => server.tick(),
                    }
                }
                tracing::debug!("Tick task stopped");
            }
            .instrument(tracing::debug_span!("tick")),
        );
    }

    async fn accept_loop(self, listener: TcpListener, acceptor: Arc<impl Acceptor>) {
        let cancellation_token = self.inner.cancellation_token.clone();

        loop {
            let accepted = tokio::select! {
                _ = cancellation_token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (socket, remote_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Usually a transient resource problem (out of file descriptors); keep going
                    tracing::warn!(err = %e, "Error accepting connection");
                    continue;
                }
            };

            // The handshake may take a while, so it gets its own task
            let server = self.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                match acceptor.accept(socket, remote_addr).await {
                    Ok(transport) => {
                        server.serve_peer(Peer::new(transport).with_remote_peer(remote_addr.to_string()));
                    }
                    Err(e) => {
                        tracing::warn!(%remote_addr, err = ?e, "Connection rejected");
                    }
                }
            });
        }

        tracing::debug!("Listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::{MethodId, RequestError};
    use crate::testing::{FakeServer, fake_server, init_test_logging, setup_test_channel};
    use serde_json::{Value as JsonValue, json};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn test_server(config: ServerConfig) -> (Server<FakeServer>, OutgoingNotification<String>) {
        init_test_logging();

        let mut builder = Registry::<FakeServer>::builder();
        builder
            .method(MethodId::new("example", "echo").unwrap(), "Echo")
            .handler_with_params("value", "value", |_api, value: JsonValue, _client| Ok(value))
            .unwrap();
        let announce = builder
            .notification_with_params::<String>(
                MethodId::notification("example", "announce").unwrap(),
                "Announcement",
                "message",
            )
            .unwrap();

        (Server::new(builder.build().unwrap(), fake_server(), config), announce)
    }

    async fn receive(peer: &mut Peer) -> JsonValue {
        let text = tokio::time::timeout(Duration::from_secs(5), peer.receive_text())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_str(&text).unwrap()
    }

    async fn wait_for_connection_count(server: &Server<FakeServer>, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while server.connection_count() != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection count never reached the expected value");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let (server, announce) = test_server(ServerConfig::default());

        let mut clients = Vec::new();
        for _ in 0..3 {
            let (client, transport) = setup_test_channel();
            server.serve_connection(transport);
            clients.push(Peer::new(client));
        }
        assert_eq!(server.connection_count(), 3);

        let sent = server.broadcast_notification(&announce, Some(&"restarting".to_string()));
        assert_eq!(sent, 3);

        for client in &mut clients {
            assert_eq!(
                receive(client).await,
                json!({"jsonrpc": "2.0", "method": "example:notification/announce", "params": ["restarting"]})
            );
        }
    }

    #[tokio::test]
    async fn disconnected_peers_leave_the_set() {
        let (server, _) = test_server(ServerConfig::default());

        let (client, transport) = setup_test_channel();
        let connection = server.serve_connection(transport);
        assert!(server.connection(connection.id()).is_some());

        drop(client);
        connection.closed().await;
        wait_for_connection_count(&server, 0).await;
    }

    #[tokio::test]
    async fn stop_clears_and_closes_connections() {
        let (server, announce) = test_server(ServerConfig::default());

        let (_client, transport) = setup_test_channel();
        let connection = server.serve_connection(transport);

        server.stop();
        assert!(server.is_stopped());
        assert_eq!(server.connection_count(), 0);
        connection.closed().await;

        assert_eq!(server.broadcast_notification(&announce, Some(&"anyone?".to_string())), 0);
        assert!(matches!(
            server.start("127.0.0.1:0", LinesAcceptor::new(1024)).await,
            Err(ServerError::Stopped)
        ));
    }

    #[tokio::test]
    async fn tcp_lines_acceptor() {
        let (server, _) = test_server(ServerConfig::default());
        let addr = server
            .start("127.0.0.1:0", LinesAcceptor::from_config(server.config()))
            .await
            .unwrap();

        assert!(matches!(
            server.start("127.0.0.1:0", LinesAcceptor::new(1024)).await,
            Err(ServerError::AlreadyListening { .. })
        ));

        let socket = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"example:echo\",\"params\":[\"hi\"]}\n")
            .await
            .unwrap();
        let reply: JsonValue = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply, json!({"jsonrpc": "2.0", "id": 1, "result": "hi"}));

        wait_for_connection_count(&server, 1).await;
        let mut remote_peers = Vec::new();
        server.for_each_connection(|connection| remote_peers.push(connection.remote_peer().to_string()));
        assert_eq!(remote_peers, vec![write.local_addr().unwrap().to_string()]);

        server.stop();
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_lines_close_the_connection() {
        let (server, _) = test_server(ServerConfig::default());
        let addr = server.start("127.0.0.1:0", LinesAcceptor::new(64)).await.unwrap();

        let mut socket = TcpStream::connect(addr).await.unwrap();
        let long_line = format!("{{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"{}\"}}\n", "x".repeat(128));
        socket.write_all(long_line.as_bytes()).await.unwrap();

        // Either a clean EOF or a reset, depending on how much of the line the server had read
        let mut lines = BufReader::new(socket).lines();
        assert!(!matches!(lines.next_line().await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn zero_tick_interval_still_times_out_requests() {
        init_test_logging();
        let mut builder = Registry::<FakeServer>::builder();
        let confirm = builder
            .request_with_params::<String, bool>(
                MethodId::new("example", "confirm").unwrap(),
                "Ask the peer to confirm",
                "prompt",
                "confirmed",
            )
            .unwrap();
        let config = ServerConfig {
            request_timeout: Duration::from_millis(50),
            tick_interval: Duration::ZERO,
            ..ServerConfig::default()
        };
        let server = Server::new(builder.build().unwrap(), fake_server(), config);

        let (mut client, transport) = setup_test_channel();
        let connection = server.serve_connection(transport);
        let response = connection.send_request(&confirm, Some(&"Anyone there?".to_string())).unwrap();
        assert!(client.receive_message().await.unwrap().is_some());

        assert_matches!(
            tokio::time::timeout(Duration::from_secs(5), response).await,
            Ok(Err(RequestError::Timeout { .. }))
        );
        assert_eq!(connection.pending_requests(), 0);

        server.stop();
    }

    #[tokio::test]
    async fn status_heartbeat_broadcasts_periodically() {
        let config = ServerConfig {
            status_heartbeat_interval: Some(Duration::from_millis(20)),
            ..ServerConfig::default()
        };

        init_test_logging();
        let mut builder = Registry::<FakeServer>::builder();
        let notifications = crate::methods::register_builtin_methods(&mut builder).unwrap();
        let server = Server::new(builder.build().unwrap(), fake_server(), config);

        let (client, transport) = setup_test_channel();
        server.serve_connection(transport);
        let mut client = Peer::new(client);

        server.start_status_heartbeat(notifications.status.clone());

        for _ in 0..2 {
            let heartbeat = receive(&mut client).await;
            assert_eq!(heartbeat["method"], json!("game:notification/server/status"));
            assert_eq!(heartbeat["params"][0]["started"], json!(true));
        }

        server.stop();
    }
}
