//! Connection management.
//!
//! A [`Connection`] owns at most one live socket. Its lifecycle is a single
//! [`ConnectionState`] value held in a `watch` channel; every transition is a
//! compare-and-set on that value, which is also what keeps a second recovery
//! task from ever starting:
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Connected
//!       ^                         |                  |
//!       |                        err              I/O error
//!       +-------------------------+                  v
//!       +----- disconnect() / attempts exhausted -- Reconnecting --ok--> Connected
//! ```

use crate::dispatch::{DispatchQueue, Link, OutboundRequest};
use crate::error::ClientError;
use crate::reader::FrameReader;
use crate::router::{Router, SessionEvent, DEFAULT_EVENT_CAPACITY};
use crate::session::SessionCache;
use crate::stream::ClientStream;
use colink_protocol::{FrameCodec, WireCodec, MAX_FRAME_SIZE, MIN_FRAME_SIZE};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

/// Default pause between reconnection attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// Default time `disconnect()` waits for the reader before aborting it.
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// How the server certificate is verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Bundled Mozilla root certificates.
    #[default]
    WebPki,
    /// PEM-encoded CA bundle.
    CaFile(PathBuf),
    /// No verification at all (self-signed development servers only).
    AcceptAny,
}

/// TLS configuration for client connections.
#[derive(Debug, Clone)]
pub struct TlsClientConfig {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Server certificate trust policy.
    pub trust: TrustPolicy,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Server name for SNI (defaults to the configured host).
    pub server_name: Option<String>,
}

impl Default for TlsClientConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trust: TrustPolicy::WebPki,
            client_cert_path: None,
            client_key_path: None,
            server_name: None,
        }
    }
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.trust = TrustPolicy::CaFile(path.into());
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    pub fn with_accept_any(mut self) -> Self {
        self.trust = TrustPolicy::AcceptAny;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Reconnection schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Pause before each attempt.
    pub interval: Duration,
    /// Give up after this many failed attempts (0 = never).
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// TCP connect and TLS handshake timeout.
    pub connect_timeout: Duration,
    /// Timeout for correlated replies (None = wait indefinitely).
    pub request_timeout: Option<Duration>,
    /// Grace period for the reader task on disconnect.
    pub disconnect_grace: Duration,
    /// Largest frame the dispatcher writes.
    pub max_frame_size: usize,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
    /// Reconnection schedule.
    pub reconnect: ReconnectPolicy,
    /// TLS configuration (None = plain TCP).
    pub tls: Option<TlsClientConfig>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            max_frame_size: MAX_FRAME_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            reconnect: ReconnectPolicy::default(),
            tls: Some(TlsClientConfig::new()),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size.clamp(MIN_FRAME_SIZE + 1, MAX_FRAME_SIZE);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect.interval = interval;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect.max_attempts = attempts;
        self
    }

    pub fn with_tls(mut self, tls_config: TlsClientConfig) -> Self {
        self.tls = Some(tls_config);
        self
    }

    pub fn without_tls(mut self) -> Self {
        self.tls = None;
        self
    }
}

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

struct Inner {
    config: ConnectionConfig,
    codec: Arc<dyn FrameCodec>,
    state: watch::Sender<ConnectionState>,
    /// Identifies the live socket; bumped on every install.
    epoch: Arc<AtomicU64>,
    writer: Arc<Mutex<Option<WriteHalf<ClientStream>>>>,
    reader_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    queue: DispatchQueue,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
    router: Router,
    session: SessionCache,
}

/// A persistent connection to a collaboration server.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Creates a new connection (not yet connected) using the default codec.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_codec(config, Arc::new(WireCodec))
    }

    /// Creates a new connection with a custom frame codec.
    pub fn with_codec(config: ConnectionConfig, codec: Arc<dyn FrameCodec>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let router = Router::new(config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                codec,
                state,
                epoch: Arc::new(AtomicU64::new(0)),
                writer: Arc::new(Mutex::new(None)),
                reader_task: parking_lot::Mutex::new(None),
                queue: DispatchQueue::new(),
                dispatcher: parking_lot::Mutex::new(None),
                router,
                session: SessionCache::new(),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns a receiver observing every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Subscribes to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.router.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    pub fn session(&self) -> &SessionCache {
        &self.inner.session
    }

    /// Queues a request for transmission. Never blocks on the network.
    pub fn submit(&self, request: OutboundRequest) -> Result<(), ClientError> {
        self.inner.queue.submit(request)
    }

    /// Connects to the server.
    ///
    /// Does nothing unless the connection is `Disconnected`.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let started = inner
            .state
            .send_if_modified(|s| transition(s, ConnectionState::Disconnected, ConnectionState::Connecting));
        if !started {
            tracing::debug!("connect() ignored in state {:?}", self.state());
            return Ok(());
        }

        inner.start_dispatcher();

        let stream = match ClientStream::open(&inner.config).await {
            Ok(stream) => stream,
            Err(e) => {
                inner.state.send_if_modified(|s| {
                    transition(s, ConnectionState::Connecting, ConnectionState::Disconnected)
                });
                tracing::debug!("Connection failed: {}", e);
                return Err(e);
            }
        };

        let installed = inner
            .install(
                stream,
                ConnectionState::Connecting,
                false,
                SessionEvent::Connected,
            )
            .await;
        if !installed {
            return Err(ClientError::ConnectionClosed);
        }

        tracing::info!("Connected to {}:{}", inner.config.host, inner.config.port);
        Ok(())
    }

    /// Closes the connection and stops any recovery in progress. Idempotent.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let changed = inner.state.send_if_modified(|s| {
            if *s == ConnectionState::Disconnected {
                false
            } else {
                *s = ConnectionState::Disconnected;
                true
            }
        });
        if !changed {
            return;
        }

        tracing::debug!("Closing connection...");
        inner.close_writer().await;

        let task = inner.reader_task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(inner.config.disconnect_grace, &mut task)
                .await
                .is_err()
            {
                tracing::warn!(
                    "reader did not stop within {:?}; aborting",
                    inner.config.disconnect_grace
                );
                task.abort();
            }
        }

        tracing::debug!("Connection closed");
    }

    /// Disconnects and stops the dispatcher; queued requests are discarded
    /// and pending replies fail with [`ClientError::ConnectionClosed`].
    pub async fn shutdown(&self) {
        self.disconnect().await;
        if let Some(task) = self.inner.dispatcher.lock().take() {
            task.abort();
        }
        self.inner.router.clear_pending();
    }
}

fn transition(state: &mut ConnectionState, from: ConnectionState, to: ConnectionState) -> bool {
    if *state == from {
        *state = to;
        true
    } else {
        false
    }
}

/// Resolves once the state is anything but `state`, or the sender is gone.
async fn wait_while(rx: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
    let _ = rx.wait_for(|s| *s != state).await;
}

impl Inner {
    fn start_dispatcher(&self) {
        let mut slot = self.dispatcher.lock();
        if slot.is_some() {
            return;
        }
        *slot = self.queue.start(Link {
            writer: self.writer.clone(),
            state: self.state.subscribe(),
            epoch: self.epoch.clone(),
            codec: self.codec.clone(),
            max_frame_size: self.config.max_frame_size,
        });
    }

    /// Makes `stream` the live socket if the state is still `from`.
    ///
    /// When `replay` is set, the cached session login is queued for the new
    /// socket before the state flips to `Connected`, so it is written ahead
    /// of anything queued during the outage.
    async fn install(
        self: &Arc<Self>,
        stream: ClientStream,
        from: ConnectionState,
        replay: bool,
        event: SessionEvent,
    ) -> bool {
        let (read_half, write_half) = tokio::io::split(stream);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.writer.lock().await = Some(write_half);
        self.router.reset_fragments();

        if replay {
            if let Some(login) = self.session.replay_request() {
                tracing::debug!("queueing session replay for epoch {}", epoch);
                self.queue.submit_replay(epoch, login);
            }
        }

        let promoted = self
            .state
            .send_if_modified(|s| transition(s, from, ConnectionState::Connected));
        if !promoted {
            tracing::debug!("connection superseded before it was installed");
            self.close_writer().await;
            return false;
        }

        self.router.emit(event);
        let task = tokio::spawn(run_reader(self.clone(), read_half, epoch));
        *self.reader_task.lock() = Some(task);
        true
    }

    async fn close_writer(&self) {
        let grace = self.config.disconnect_grace;
        let writer = match tokio::time::timeout(grace, self.writer.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                tracing::warn!("writer still busy after {:?}; leaving it to be replaced", grace);
                return;
            }
        };
        if let Some(mut writer) = writer {
            match tokio::time::timeout(grace, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("error shutting down writer: {}", e),
                Err(_) => tracing::debug!("timed out shutting down writer"),
            }
        }
    }

    /// Moves a failed live connection into `Reconnecting` and starts recovery.
    async fn connection_lost(self: &Arc<Self>, epoch: u64, error: ClientError) {
        let current = &self.epoch;
        let lost = self.state.send_if_modified(|s| {
            if *s == ConnectionState::Connected && current.load(Ordering::SeqCst) == epoch {
                *s = ConnectionState::Reconnecting;
                true
            } else {
                false
            }
        });
        if !lost {
            tracing::debug!("ignoring failure of stale connection {}: {}", epoch, error);
            return;
        }

        tracing::warn!("Connection lost: {}", error);
        self.router.emit(SessionEvent::Disconnected);
        self.router.reset_fragments();
        self.close_writer().await;
        // This is the reader's own handle; dropping it just detaches.
        self.reader_task.lock().take();

        tokio::spawn(recover(self.clone()));
    }
}

/// Reads frames from one socket until it fails or stops being the live one.
fn run_reader(
    inner: Arc<Inner>,
    read_half: ReadHalf<ClientStream>,
    epoch: u64,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let mut frames = FrameReader::new(read_half);
        let mut state = inner.state.subscribe();
        tracing::debug!("reader started for connection {}", epoch);

        loop {
            let result = tokio::select! {
                result = frames.next_frame() => result,
                _ = wait_while(&mut state, ConnectionState::Connected) => {
                    tracing::debug!("reader for connection {} stopping", epoch);
                    return;
                }
            };

            match result {
                Ok(frame) => inner.router.route_frame(inner.codec.as_ref(), &frame),
                Err(e) => {
                    inner.connection_lost(epoch, e).await;
                    return;
                }
            }
        }
    }
}

/// Retries the connection on a fixed interval while `Reconnecting`.
fn recover(inner: Arc<Inner>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let policy = inner.config.reconnect.clone();
        let mut state = inner.state.subscribe();
        let mut attempts: u32 = 0;
        tracing::info!("Reconnecting every {:?}", policy.interval);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(policy.interval) => {}
                _ = wait_while(&mut state, ConnectionState::Reconnecting) => {
                    tracing::debug!("reconnection cancelled");
                    return;
                }
            }

            attempts += 1;
            match ClientStream::open(&inner.config).await {
                Ok(stream) => {
                    let installed = inner
                        .install(
                            stream,
                            ConnectionState::Reconnecting,
                            true,
                            SessionEvent::Reconnected,
                        )
                        .await;
                    if installed {
                        tracing::info!("Reconnected after {} attempt(s)", attempts);
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!("Reconnect attempt {} failed: {}", attempts, e);
                    if policy.is_exhausted(attempts) {
                        let gave_up = inner.state.send_if_modified(|s| {
                            transition(s, ConnectionState::Reconnecting, ConnectionState::Disconnected)
                        });
                        if gave_up {
                            tracing::error!("Giving up after {} reconnect attempts", attempts);
                            inner.router.emit(SessionEvent::ReconnectFailed { attempts });
                        }
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colink_protocol::{CommandTag, DecodedFrame, PayloadType};
    use serde_json::{json, Value};
    use tokio::net::{TcpListener, TcpStream};

    const STEP: Duration = Duration::from_secs(5);

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn config(port: u16) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", port)
            .without_tls()
            .with_reconnect_interval(Duration::from_millis(50))
            .with_disconnect_grace(Duration::from_millis(200))
    }

    async fn accept(listener: &TcpListener) -> FrameReader<TcpStream> {
        let (socket, _) = tokio::time::timeout(STEP, listener.accept())
            .await
            .expect("no connection")
            .unwrap();
        FrameReader::new(socket)
    }

    async fn read_frame(peer: &mut FrameReader<TcpStream>) -> DecodedFrame {
        let frame = tokio::time::timeout(STEP, peer.next_frame())
            .await
            .expect("no frame")
            .unwrap();
        WireCodec.decode(&frame).unwrap()
    }

    async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(STEP, rx.recv())
            .await
            .expect("no event")
            .unwrap()
    }

    fn text(tag: u32, body: &str) -> OutboundRequest {
        OutboundRequest::new(tag, PayloadType::Text, body.as_bytes().to_vec())
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("collab.example.com", 7443);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect.interval, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.max_frame_size, MAX_FRAME_SIZE);
        assert!(config.request_timeout.is_none());

        let tls = config.tls.unwrap();
        assert!(tls.enabled);
        assert_eq!(tls.trust, TrustPolicy::WebPki);
    }

    #[test]
    fn test_config_clamping() {
        let config = ConnectionConfig::new("h", 1).with_max_frame_size(3);
        assert_eq!(config.max_frame_size, MIN_FRAME_SIZE + 1);

        let config = ConnectionConfig::new("h", 1).with_max_frame_size(1 << 20);
        assert_eq!(config.max_frame_size, MAX_FRAME_SIZE);
    }

    #[test]
    fn test_reconnect_policy_exhaustion() {
        let unlimited = ReconnectPolicy::default();
        assert!(!unlimited.is_exhausted(u32::MAX));

        let limited = ReconnectPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 3,
        };
        assert!(!limited.is_exhausted(2));
        assert!(limited.is_exhausted(3));
    }

    #[test]
    fn test_new_connection_is_disconnected() {
        let conn = Connection::new(ConnectionConfig::new("127.0.0.1", 7443));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_and_send() {
        let (listener, port) = listener().await;
        let conn = Connection::new(config(port));
        let mut events = conn.subscribe();

        conn.connect().await.unwrap();
        let mut peer = accept(&listener).await;

        assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
        assert!(conn.is_connected());

        conn.submit(text(42, "hello")).unwrap();
        let frame = read_frame(&mut peer).await;
        assert_eq!(frame.command_tag, 42);
        assert_eq!(frame.payload.as_ref(), b"hello");

        conn.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let (listener, port) = listener().await;
        drop(listener);

        let conn = Connection::new(config(port));
        assert!(conn.connect().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (listener, port) = listener().await;
        let conn = Connection::new(config(port));
        conn.connect().await.unwrap();
        let _peer = accept(&listener).await;

        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_inbound_frames_are_routed() {
        let (listener, port) = listener().await;
        let conn = Connection::new(config(port));
        let mut events = conn.subscribe();
        conn.connect().await.unwrap();
        let peer = accept(&listener).await;
        assert_eq!(next_event(&mut events).await, SessionEvent::Connected);

        let mut socket = peer.into_inner();
        let body = json!({"projects": [{"project_id": "p1", "name": "alpha"}]}).to_string();
        let frame = WireCodec
            .encode(
                body.as_bytes(),
                false,
                PayloadType::Json,
                CommandTag::ProjectList.code(),
                MAX_FRAME_SIZE,
            )
            .unwrap();
        // Noise in front of the frame must not kill the session.
        socket.write_all(&[0, 0, 0, 0]).await.unwrap();
        socket.write_all(&frame).await.unwrap();

        match next_event(&mut events).await {
            SessionEvent::Message(colink_protocol::ServerMessage::ProjectList(list)) => {
                assert_eq!(list.projects[0].name, "alpha");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(conn.is_connected());
        conn.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnect_replays_login_before_queued_requests() {
        let (listener, port) = listener().await;
        let conn = Connection::new(config(port));
        let mut events = conn.subscribe();

        conn.connect().await.unwrap();
        let mut peer = accept(&listener).await;
        assert_eq!(next_event(&mut events).await, SessionEvent::Connected);

        let mut secret = b"pw".to_vec();
        let login = conn.session().store("ann", &mut secret).unwrap();
        conn.submit(login).unwrap();
        let first = read_frame(&mut peer).await;
        assert_eq!(first.command_tag, CommandTag::Login.code());

        // Server drops the connection.
        drop(peer);
        assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);

        // Queued while down; must go out after the replayed login.
        conn.submit(text(77, "after outage")).unwrap();

        let mut peer = accept(&listener).await;
        let replay = read_frame(&mut peer).await;
        assert_eq!(replay.command_tag, CommandTag::Login.code());
        let body: Value = serde_json::from_slice(&replay.payload).unwrap();
        assert_eq!(body["identifier"], "ann");
        assert_eq!(body["secret"], "pw");

        assert_eq!(next_event(&mut events).await, SessionEvent::Reconnected);
        assert_eq!(read_frame(&mut peer).await.command_tag, 77);

        conn.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnect_without_session_sends_no_login() {
        let (listener, port) = listener().await;
        let conn = Connection::new(config(port));
        let mut events = conn.subscribe();

        conn.connect().await.unwrap();
        drop(accept(&listener).await);
        assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
        assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);

        let mut peer = accept(&listener).await;
        assert_eq!(next_event(&mut events).await, SessionEvent::Reconnected);

        conn.submit(text(5, "first")).unwrap();
        assert_eq!(read_frame(&mut peer).await.command_tag, 5);
        conn.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let (listener, port) = listener().await;
        let conn = Connection::new(config(port).with_max_reconnect_attempts(2));
        let mut events = conn.subscribe();

        conn.connect().await.unwrap();
        let peer = accept(&listener).await;
        drop(listener);
        drop(peer);

        assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
        assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);
        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::ReconnectFailed { attempts: 2 }
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_recovery() {
        let (listener, port) = listener().await;
        let conn = Connection::new(config(port).with_reconnect_interval(Duration::from_secs(30)));
        let mut events = conn.subscribe();
        let mut state = conn.subscribe_state();

        conn.connect().await.unwrap();
        drop(accept(&listener).await);
        assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
        assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);
        assert_eq!(conn.state(), ConnectionState::Reconnecting);

        conn.disconnect().await;
        tokio::time::timeout(
            STEP,
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();

        // No reconnect attempt reaches the listener.
        let attempt = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(attempt.is_err());
    }

    #[tokio::test]
    async fn test_partial_fragment_does_not_survive_reconnect() {
        let (listener, port) = listener().await;
        let conn = Connection::new(config(port));
        let mut events = conn.subscribe();
        let tag = CommandTag::ProjectList.code();

        conn.connect().await.unwrap();
        let mut socket = accept(&listener).await.into_inner();
        assert_eq!(next_event(&mut events).await, SessionEvent::Connected);

        let partial = WireCodec
            .encode(b"{\"projects\":[", true, PayloadType::Json, tag, MAX_FRAME_SIZE)
            .unwrap();
        socket.write_all(&partial).await.unwrap();
        drop(socket);
        assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);

        let mut socket = accept(&listener).await.into_inner();
        assert_eq!(next_event(&mut events).await, SessionEvent::Reconnected);

        let complete = WireCodec
            .encode(b"{\"projects\":[]}", false, PayloadType::Json, tag, MAX_FRAME_SIZE)
            .unwrap();
        socket.write_all(&complete).await.unwrap();

        match next_event(&mut events).await {
            SessionEvent::Message(colink_protocol::ServerMessage::ProjectList(list)) => {
                assert!(list.projects.is_empty())
            }
            other => panic!("unexpected event: {:?}", other),
        }
        conn.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_with_stalled_peer_is_bounded() {
        let (listener, port) = listener().await;
        let conn = Connection::new(config(port));
        conn.connect().await.unwrap();
        // Accepted but never read.
        let _peer = accept(&listener).await;

        let body = "x".repeat(8000);
        for _ in 0..2000 {
            conn.submit(text(3, &body)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let closed = tokio::time::timeout(STEP, conn.disconnect()).await;
        assert!(closed.is_ok(), "disconnect hung on a stalled write");
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        conn.shutdown().await;
    }
}
