//! Bridge client: one logical connection, automatic reconnection with capped
//! exponential backoff, multi-subscriber state and message streams.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use pocketagent_proto::{ClientMessage, ServerMessage, decode_server_str, encode_client_string};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::ConnectionError;
use crate::state::ConnectionState;
use crate::transport::{Transport, TransportSink, TransportStream};

const MESSAGE_CHANNEL_CAPACITY: usize = 256;
const ERROR_CHANNEL_CAPACITY: usize = 64;
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub url: String,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_jitter: Duration,
    pub handshake_timeout: Duration,
}

impl BridgeConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_jitter: Duration::from_millis(250),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Handle to the single logical bridge connection. Cheap to clone; all clones
/// share the same connection and streams.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    state_tx: watch::Sender<ConnectionState>,
    message_tx: broadcast::Sender<ServerMessage>,
    error_tx: broadcast::Sender<ConnectionError>,
    outbound: Mutex<Option<mpsc::Sender<ClientMessage>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

enum ServeExit {
    /// `disconnect()` was called.
    Shutdown,
    /// Transport dropped unexpectedly; retry policy applies.
    Lost(Option<ConnectionError>),
    /// User action required; automatic retry halts.
    Fatal(ConnectionError),
}

impl BridgeClient {
    #[must_use]
    pub fn new(config: BridgeConfig, transport: Arc<dyn Transport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (message_tx, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let (error_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BridgeInner {
                config,
                transport,
                state_tx,
                message_tx,
                error_tx,
                outbound: Mutex::new(None),
                supervisor: Mutex::new(None),
                shutdown: Mutex::new(None),
            }),
        }
    }

    /// Start the connection supervisor. A no-op when one is already running;
    /// progress is observable on [`BridgeClient::state`].
    pub async fn connect(&self) {
        let mut supervisor = lock(&self.inner.supervisor);
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *lock(&self.inner.shutdown) = Some(shutdown_tx);
        self.inner.state_tx.send_replace(ConnectionState::Connecting);
        *supervisor = Some(tokio::spawn(run_supervisor(
            Arc::clone(&self.inner),
            shutdown_rx,
        )));
    }

    /// Tear the connection down and cancel any pending retry timer. Safe to
    /// call from any state; always lands in `Disconnected`.
    pub async fn disconnect(&self) {
        let shutdown = lock(&self.inner.shutdown).take();
        if let Some(tx) = shutdown {
            let _ = tx.send(true);
        }
        let supervisor = lock(&self.inner.supervisor).take();
        if let Some(task) = supervisor {
            let _ = task.await;
        }
        *lock(&self.inner.outbound) = None;
        self.inner
            .state_tx
            .send_replace(ConnectionState::Disconnected);
    }

    /// Queue one message on the serialized writer. Fails fast with
    /// [`ConnectionError::NotConnected`] unless currently connected; user
    /// decisions made offline belong in the offline action queue, not here.
    pub async fn send(&self, message: ClientMessage) -> Result<(), ConnectionError> {
        if !self.inner.state_tx.borrow().is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let sender = lock(&self.inner.outbound).clone();
        match sender {
            Some(sender) => sender
                .send(message)
                .await
                .map_err(|_| ConnectionError::NotConnected),
            None => Err(ConnectionError::NotConnected),
        }
    }

    /// Keepalive probe; the server answers on the message stream with `pong`.
    pub async fn ping(&self) -> Result<(), ConnectionError> {
        self.send(ClientMessage::Ping).await
    }

    #[must_use]
    pub fn current_state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state_tx.borrow().is_connected()
    }

    /// Multi-subscriber state stream.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Multi-subscriber stream of decoded server messages.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.inner.message_tx.subscribe()
    }

    /// Multi-subscriber stream of classified connection errors.
    #[must_use]
    pub fn errors(&self) -> broadcast::Receiver<ConnectionError> {
        self.inner.error_tx.subscribe()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_supervisor(inner: Arc<BridgeInner>, mut shutdown: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let connected = tokio::select! {
            _ = shutdown.changed() => break,
            result = inner.transport.connect(&inner.config.url) => result,
        };

        match connected {
            Ok((sink, stream)) => {
                match serve_connection(&inner, sink, stream, &mut shutdown).await {
                    ServeExit::Shutdown => break,
                    ServeExit::Fatal(err) => {
                        let _ = inner.error_tx.send(err);
                        break;
                    }
                    ServeExit::Lost(maybe_err) => {
                        if let Some(err) = maybe_err {
                            tracing::warn!(error = %err, "bridge connection lost");
                            let _ = inner.error_tx.send(err);
                        }
                        attempt = 1;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, attempt, "bridge connect failed");
                let halt = err.requires_user_action() || !err.is_retryable();
                let _ = inner.error_tx.send(err);
                if halt {
                    break;
                }
                attempt = attempt.saturating_add(1);
            }
        }

        *lock(&inner.outbound) = None;
        inner
            .state_tx
            .send_replace(ConnectionState::Reconnecting { attempt });

        let delay = backoff_delay(&inner.config, attempt);
        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    *lock(&inner.outbound) = None;
    inner
        .state_tx
        .send_replace(ConnectionState::Disconnected);
}

async fn serve_connection(
    inner: &Arc<BridgeInner>,
    mut sink: Box<dyn TransportSink>,
    mut stream: Box<dyn TransportStream>,
    shutdown: &mut watch::Receiver<bool>,
) -> ServeExit {
    // Handshake: the server's `connected` envelope carries the agent id.
    let handshake_deadline = tokio::time::sleep(inner.config.handshake_timeout);
    tokio::pin!(handshake_deadline);
    let agent_id = loop {
        let item = tokio::select! {
            _ = shutdown.changed() => {
                sink.close().await;
                return ServeExit::Shutdown;
            }
            () = &mut handshake_deadline => {
                sink.close().await;
                return ServeExit::Lost(Some(ConnectionError::AgentTimedOut));
            }
            item = stream.next_text() => item,
        };
        match item {
            None => {
                return ServeExit::Lost(Some(ConnectionError::ConnectionFailed {
                    detail: "closed during handshake".to_string(),
                }));
            }
            Some(Err(err)) => return ServeExit::Lost(Some(err)),
            Some(Ok(text)) => match decode_server_str(&text) {
                Ok(ServerMessage::Connected { agent_id }) => break agent_id,
                Ok(ServerMessage::Error {
                    code,
                    message,
                    recoverable,
                    retry_after_seconds,
                }) => {
                    let err = ConnectionError::classify_server_code(
                        &code,
                        &message,
                        recoverable,
                        retry_after_seconds,
                    );
                    sink.close().await;
                    if err.requires_user_action() || !err.is_retryable() {
                        return ServeExit::Fatal(err);
                    }
                    return ServeExit::Lost(Some(err));
                }
                Ok(other) => {
                    tracing::debug!(kind = ?other, "message before handshake completed");
                    let _ = inner.message_tx.send(other);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "undecodable frame during handshake");
                    let _ = inner.error_tx.send(ConnectionError::ProtocolError {
                        detail: err.to_string(),
                    });
                }
            },
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
    *lock(&inner.outbound) = Some(outbound_tx);
    inner
        .state_tx
        .send_replace(ConnectionState::Connected { agent_id });

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                sink.close().await;
                return ServeExit::Shutdown;
            }
            Some(message) = outbound_rx.recv() => {
                let text = match encode_client_string(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(error = %err, "outbound message encode failed");
                        continue;
                    }
                };
                if let Err(err) = sink.send_text(text).await {
                    return ServeExit::Lost(Some(err));
                }
            }
            item = stream.next_text() => match item {
                None => return ServeExit::Lost(None),
                Some(Err(err)) => return ServeExit::Lost(Some(err)),
                Some(Ok(text)) => match decode_server_str(&text) {
                    Ok(message) => {
                        if let Some(exit) = handle_error_envelope(inner, &message) {
                            let _ = inner.message_tx.send(message);
                            sink.close().await;
                            return exit;
                        }
                        let _ = inner.message_tx.send(message);
                    }
                    // Decode failures are surfaced, not fatal: the stream
                    // itself is still healthy.
                    Err(err) => {
                        tracing::warn!(error = %err, "undecodable server frame");
                        let _ = inner.error_tx.send(ConnectionError::ProtocolError {
                            detail: err.to_string(),
                        });
                    }
                },
            }
        }
    }
}

/// Classify an inbound `error` envelope; fatal ones end the connection.
fn handle_error_envelope(inner: &Arc<BridgeInner>, message: &ServerMessage) -> Option<ServeExit> {
    let ServerMessage::Error {
        code,
        message: detail,
        recoverable,
        retry_after_seconds,
    } = message
    else {
        return None;
    };
    let err =
        ConnectionError::classify_server_code(code, detail, *recoverable, *retry_after_seconds);
    if err.requires_user_action() {
        // The supervisor broadcasts the error when it handles the fatal exit.
        return Some(ServeExit::Fatal(err));
    }
    let _ = inner.error_tx.send(err);
    None
}

/// Exponential backoff with a cap and jitter: `base * 2^(attempt-1)`.
fn backoff_delay(config: &BridgeConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let scaled = config
        .reconnect_base_delay
        .saturating_mul(2u32.saturating_pow(exponent));
    let capped = scaled.min(config.reconnect_max_delay);
    let jitter_ms = config.reconnect_jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return capped;
    }
    capped + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportPair;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    fn test_config() -> BridgeConfig {
        let mut config = BridgeConfig::new("ws://bridge.test/socket");
        config.reconnect_base_delay = Duration::from_millis(10);
        config.reconnect_max_delay = Duration::from_millis(100);
        config.reconnect_jitter = Duration::ZERO;
        config.handshake_timeout = Duration::from_secs(5);
        config
    }

    enum Script {
        Fail(ConnectionError),
        Session(SessionScript),
    }

    struct SessionScript {
        inbound: mpsc::UnboundedReceiver<Result<String, ConnectionError>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    /// Handle a test keeps to drive one scripted connection.
    struct SessionHandle {
        inbound: mpsc::UnboundedSender<Result<String, ConnectionError>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    impl SessionHandle {
        fn push(&self, raw: &str) {
            let _ = self.inbound.send(Ok(raw.to_string()));
        }

        fn sent_messages(&self) -> Vec<String> {
            lock(&self.sent).clone()
        }
    }

    #[derive(Default)]
    struct MockTransport {
        scripts: StdMutex<VecDeque<Script>>,
        connect_count: StdMutex<u32>,
    }

    impl MockTransport {
        fn push_failure(&self, err: ConnectionError) {
            lock(&self.scripts).push_back(Script::Fail(err));
        }

        fn push_session(&self, handshake_agent: Option<&str>) -> SessionHandle {
            let (tx, rx) = mpsc::unbounded_channel();
            let sent = Arc::new(StdMutex::new(Vec::new()));
            if let Some(agent_id) = handshake_agent {
                let _ = tx.send(Ok(format!(
                    r#"{{"type":"connected","agentId":"{agent_id}"}}"#
                )));
            }
            lock(&self.scripts).push_back(Script::Session(SessionScript {
                inbound: rx,
                sent: Arc::clone(&sent),
            }));
            SessionHandle { inbound: tx, sent }
        }

        fn connects(&self) -> u32 {
            *lock(&self.connect_count)
        }
    }

    struct MockSink {
        sent: Arc<StdMutex<Vec<String>>>,
    }

    struct MockStream {
        inbound: mpsc::UnboundedReceiver<Result<String, ConnectionError>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, _url: &str) -> Result<TransportPair, ConnectionError> {
            *lock(&self.connect_count) += 1;
            let script = lock(&self.scripts).pop_front();
            match script {
                Some(Script::Fail(err)) => Err(err),
                Some(Script::Session(session)) => Ok((
                    Box::new(MockSink { sent: session.sent }),
                    Box::new(MockStream {
                        inbound: session.inbound,
                    }),
                )),
                None => Err(ConnectionError::NetworkUnavailable),
            }
        }
    }

    #[async_trait]
    impl TransportSink for MockSink {
        async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
            lock(&self.sent).push(text);
            Ok(())
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl TransportStream for MockStream {
        async fn next_text(&mut self) -> Option<Result<String, ConnectionError>> {
            self.inbound.recv().await
        }
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<ConnectionState>,
        predicate: impl Fn(&ConnectionState) -> bool,
    ) -> ConnectionState {
        match rx.wait_for(|state| predicate(state)).await {
            Ok(state) => state.clone(),
            Err(_) => ConnectionState::Disconnected,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_reaches_connected_with_agent_id() {
        let transport = Arc::new(MockTransport::default());
        let session = transport.push_session(Some("agent-7"));
        let client = BridgeClient::new(test_config(), transport);

        let mut state = client.state();
        client.connect().await;
        let connected = wait_for_state(&mut state, ConnectionState::is_connected).await;
        assert_eq!(
            connected,
            ConnectionState::Connected {
                agent_id: "agent-7".to_string()
            }
        );

        client.ping().await.unwrap();
        client
            .send(ClientMessage::Input {
                text: "hello".to_string(),
                images: None,
            })
            .await
            .unwrap();

        // The writer task drains the outbound channel; yield until it does.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        let sent = session.sent_messages();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains(r#""type":"ping""#));
        assert!(sent[1].contains(r#""type":"input""#));

        client.disconnect().await;
        assert_eq!(client.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_fails_fast_when_not_connected() {
        let transport = Arc::new(MockTransport::default());
        let client = BridgeClient::new(test_config(), transport);
        let err = client
            .send(ClientMessage::Ping)
            .await
            .expect_err("send must not silently queue");
        assert_eq!(err, ConnectionError::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_loss_reconnects_and_resets_attempt() {
        let transport = Arc::new(MockTransport::default());
        let first = transport.push_session(Some("agent-1"));
        transport.push_failure(ConnectionError::NetworkUnavailable);
        let second = transport.push_session(Some("agent-1"));
        let client = BridgeClient::new(test_config(), Arc::clone(&transport) as Arc<dyn Transport>);

        let mut state = client.state();
        client.connect().await;
        wait_for_state(&mut state, ConnectionState::is_connected).await;

        // Server vanishes.
        drop(first);
        let reconnecting = wait_for_state(&mut state, |s| {
            matches!(s, ConnectionState::Reconnecting { .. })
        })
        .await;
        assert_eq!(reconnecting, ConnectionState::Reconnecting { attempt: 1 });

        // First retry fails, counter climbs, second retry lands.
        let connected = wait_for_state(&mut state, ConnectionState::is_connected).await;
        assert_eq!(
            connected,
            ConnectionState::Connected {
                agent_id: "agent-1".to_string()
            }
        );
        assert_eq!(transport.connects(), 3);
        drop(second);

        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn user_action_error_halts_retry() {
        let transport = Arc::new(MockTransport::default());
        let session = transport.push_session(Some("agent-1"));
        transport.push_failure(ConnectionError::RateLimited {
            retry_after_seconds: Some(60),
        });
        let client = BridgeClient::new(test_config(), Arc::clone(&transport) as Arc<dyn Transport>);

        let mut state = client.state();
        let mut errors = client.errors();
        client.connect().await;
        wait_for_state(&mut state, ConnectionState::is_connected).await;

        drop(session);
        let landed =
            wait_for_state(&mut state, |s| *s == ConnectionState::Disconnected).await;
        assert_eq!(landed, ConnectionState::Disconnected);
        assert_eq!(transport.connects(), 2);

        let mut seen_rate_limit = false;
        while let Ok(err) = errors.try_recv() {
            if matches!(err, ConnectionError::RateLimited { .. }) {
                seen_rate_limit = true;
            }
        }
        assert!(seen_rate_limit, "rate limit error must surface");
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_server_envelope_halts_connection() {
        let transport = Arc::new(MockTransport::default());
        let session = transport.push_session(Some("agent-1"));
        let client = BridgeClient::new(test_config(), Arc::clone(&transport) as Arc<dyn Transport>);

        let mut state = client.state();
        let mut errors = client.errors();
        client.connect().await;
        wait_for_state(&mut state, ConnectionState::is_connected).await;

        session.push(
            r#"{"type":"error","code":"connection_replaced","message":"another device took over"}"#,
        );
        wait_for_state(&mut state, |s| *s == ConnectionState::Disconnected).await;
        assert_eq!(transport.connects(), 1);

        let mut replaced = 0;
        while let Ok(err) = errors.try_recv() {
            if err == ConnectionError::ConnectionReplaced {
                replaced += 1;
            }
        }
        assert_eq!(replaced, 1, "fatal error must surface exactly once");
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_retry() {
        let mut config = test_config();
        config.reconnect_base_delay = Duration::from_secs(3600);
        let transport = Arc::new(MockTransport::default());
        let session = transport.push_session(Some("agent-1"));
        let client = BridgeClient::new(config, Arc::clone(&transport) as Arc<dyn Transport>);

        let mut state = client.state();
        client.connect().await;
        wait_for_state(&mut state, ConnectionState::is_connected).await;

        drop(session);
        wait_for_state(&mut state, |s| {
            matches!(s, ConnectionState::Reconnecting { .. })
        })
        .await;

        // Must return promptly despite the hour-long backoff timer.
        client.disconnect().await;
        assert_eq!(client.current_state(), ConnectionState::Disconnected);
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_frame_surfaces_without_killing_connection() {
        let transport = Arc::new(MockTransport::default());
        let session = transport.push_session(Some("agent-1"));
        let client = BridgeClient::new(test_config(), transport);

        let mut state = client.state();
        let mut errors = client.errors();
        let mut messages = client.subscribe();
        client.connect().await;
        wait_for_state(&mut state, ConnectionState::is_connected).await;

        session.push(r#"{"type":"mystery"}"#);
        session.push(r#"{"type":"pong"}"#);

        let next = messages.recv().await.unwrap();
        assert_eq!(next, ServerMessage::Pong);
        assert!(client.is_connected());

        let err = errors.recv().await.unwrap();
        assert!(matches!(err, ConnectionError::ProtocolError { .. }));

        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn message_stream_is_multi_subscriber() {
        let transport = Arc::new(MockTransport::default());
        let session = transport.push_session(Some("agent-1"));
        let client = BridgeClient::new(test_config(), transport);

        let mut first = client.subscribe();
        let mut second = client.subscribe();
        let mut state = client.state();
        client.connect().await;
        wait_for_state(&mut state, ConnectionState::is_connected).await;

        session.push(r#"{"type":"model_changed","model":"opus"}"#);
        let expected = ServerMessage::ModelChanged {
            model: "opus".to_string(),
        };
        assert_eq!(first.recv().await.unwrap(), expected);
        assert_eq!(second.recv().await.unwrap(), expected);

        client.disconnect().await;
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut config = test_config();
        config.reconnect_base_delay = Duration::from_millis(100);
        config.reconnect_max_delay = Duration::from_secs(2);
        config.reconnect_jitter = Duration::ZERO;

        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(&config, 6), Duration::from_secs(2));
        assert_eq!(backoff_delay(&config, 30), Duration::from_secs(2));
    }

    #[test]
    fn backoff_jitter_stays_bounded() {
        let mut config = test_config();
        config.reconnect_base_delay = Duration::from_millis(100);
        config.reconnect_jitter = Duration::from_millis(50);
        for _ in 0..32 {
            let delay = backoff_delay(&config, 1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }
}
