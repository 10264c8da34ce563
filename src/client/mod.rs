//! Client-side chat engine
//!
//! Owns exactly one QUIC connection per active chat view and drives the
//! connect → authenticate → sync → active state machine. All
//! authoritative state lives on the server; this side holds a
//! read-mostly projection mutated only by accepted broadcasts.

pub mod reactions;
pub mod sync;
pub mod typing;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quinn::{ClientConfig as QuinnClientConfig, Connection, Endpoint, RecvStream, SendStream};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ALPN;
use crate::current_timestamp;
use crate::error::{ChatError, Result};
use crate::protocol::codec::{DecodedFrame, Encodable};
use crate::protocol::frame::{Frame, FrameCodec};
use crate::protocol::messages::*;

use sync::MessageList;
use typing::{TypingNotifier, TypingRoster, TypingSignal};

/// Chat client configuration
#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Client bind address (use 0.0.0.0:0 for auto)
    pub bind_addr: SocketAddr,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Keep-alive ping interval in seconds
    pub keep_alive_secs: u64,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4433".parse().unwrap(),
            bind_addr: "0.0.0.0:0".parse().unwrap(),
            connect_timeout_secs: 10,
            keep_alive_secs: 30,
        }
    }
}

/// Connection lifecycle of a chat view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; sends are dropped with a warning
    Disconnected,
    /// Transport connect in flight
    Connecting,
    /// Socket up, auth exchange in flight
    Authenticating,
    /// Authenticated, waiting for the backfill window
    SyncingHistory,
    /// Backfill adopted, live stream flowing
    Active,
}

/// Events surfaced to the embedding view
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The backfill was adopted; the list is chronological and complete
    HistorySynced {
        channel: ChannelKey,
        messages: Vec<ChatMessage>,
        members: Vec<MemberInfo>,
    },
    /// A live message became visible
    MessageReceived(ChatMessage),
    /// A message's reaction state was replaced by the server's broadcast
    ReactionsUpdated {
        message_id: MessageId,
        reactions: Vec<ReactionEntry>,
    },
    /// The typing indicator line changed
    TypingChanged { indicator: Option<String> },
    /// A member appeared in the channel
    MemberJoined(MemberInfo),
    /// A member's connection left the channel
    MemberLeft { user_id: UserId },
    /// A member was muted
    MemberMuted {
        target_user_id: UserId,
        muted_by: UserId,
        reason: Option<String>,
    },
    /// A member was unmuted
    MemberUnmuted { target_user_id: UserId },
    /// The server rejected an operation; the session stays usable
    ServerError(SystemError),
    /// The transport failed or closed; no automatic reconnect
    Disconnected(String),
}

/// Shared state handed to the spawned receive loops
struct ClientShared {
    channel: ChannelKey,
    state: Arc<RwLock<ConnectionState>>,
    generation: Arc<AtomicU64>,
    messages: Arc<RwLock<MessageList>>,
    typing: Arc<RwLock<TypingRoster>>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
}

/// QUIC chat client bound to one channel
///
/// The connection is a scope-released resource: `close` runs the full
/// teardown, and dropping the client releases the socket and cancels
/// every armed timer on any other exit path.
pub struct ChatClient {
    config: ChatClientConfig,
    channel: ChannelKey,
    user: UserInfo,
    state: Arc<RwLock<ConnectionState>>,
    /// Bumped on close; loops spawned under an older generation discard
    /// anything that resolves late instead of touching stale state
    generation: Arc<AtomicU64>,
    endpoint: Option<Endpoint>,
    connection: Option<Connection>,
    control_send: Option<Arc<Mutex<SendStream>>>,
    messages: Arc<RwLock<MessageList>>,
    typing: Arc<RwLock<TypingRoster>>,
    notifier: Option<TypingNotifier>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChatClient {
    /// Create a client for one chat view
    pub fn new(
        config: ChatClientConfig,
        channel: ChannelKey,
        user_id: UserId,
        username: impl Into<String>,
    ) -> Self {
        Self {
            config,
            channel,
            user: UserInfo {
                user_id,
                username: username.into(),
            },
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            generation: Arc::new(AtomicU64::new(0)),
            endpoint: None,
            connection: None,
            control_send: None,
            messages: Arc::new(RwLock::new(MessageList::new())),
            typing: Arc::new(RwLock::new(TypingRoster::new())),
            notifier: None,
            tasks: Vec::new(),
        }
    }

    /// Get the current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Get the channel this view is bound to
    pub fn channel(&self) -> ChannelKey {
        self.channel
    }

    /// Get the local user
    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    /// Snapshot of the visible message list, oldest first
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().await.messages().to_vec()
    }

    /// Current typing indicator line, after expiring stale flags
    pub async fn typing_indicator(&self) -> Option<String> {
        let mut typing = self.typing.write().await;
        typing.sweep();
        typing.indicator_line()
    }

    /// Connect, authenticate, and request the history backfill
    ///
    /// Returns the event receiver the view drains. The state machine is
    /// `SyncingHistory` on return; `HistorySynced` marks the transition
    /// to `Active`.
    pub async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<ClientEvent>> {
        {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Disconnected {
                return Err(ChatError::protocol("already connected"));
            }
            *state = ConnectionState::Connecting;
        }

        info!(
            "Connecting to {} for {}",
            self.config.server_addr, self.channel
        );

        match self.establish().await {
            Ok(event_rx) => Ok(event_rx),
            Err(e) => {
                // Any failure on the way up lands back in Disconnected
                *self.state.write().await = ConnectionState::Disconnected;
                if let Some(connection) = self.connection.take() {
                    connection.close(0u32.into(), b"connect failed");
                }
                if let Some(endpoint) = self.endpoint.take() {
                    endpoint.close(0u32.into(), b"connect failed");
                }
                self.control_send = None;
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<mpsc::UnboundedReceiver<ClientEvent>> {
        let client_config = configure_client()?;

        let mut endpoint = Endpoint::client(self.config.bind_addr)
            .map_err(|e| ChatError::transport(format!("Failed to create endpoint: {}", e)))?;
        endpoint.set_default_client_config(client_config);
        self.endpoint = Some(endpoint.clone());

        let connecting = endpoint
            .connect(self.config.server_addr, "localhost")
            .map_err(|e| ChatError::transport(format!("Failed to initiate connection: {}", e)))?;

        let connection = tokio::time::timeout(
            Duration::from_secs(self.config.connect_timeout_secs),
            connecting,
        )
        .await
        .map_err(|_| ChatError::timeout("Connection timeout"))?
        .map_err(|e| ChatError::transport(format!("Failed to connect: {}", e)))?;

        self.connection = Some(connection.clone());

        let (mut send, mut recv) = connection.open_bi().await?;
        *self.state.write().await = ConnectionState::Authenticating;

        // Auth exchange: the server answers success or failure without
        // closing the connection
        let auth = Auth {
            user_id: self.user.user_id,
            username: self.user.username.clone(),
        };
        write_frame(&mut send, &auth).await?;

        let mut codec = FrameCodec::new();
        let success = tokio::time::timeout(
            Duration::from_secs(self.config.connect_timeout_secs),
            await_auth(&mut recv, &mut codec),
        )
        .await
        .map_err(|_| ChatError::timeout("Authentication timeout"))??;

        debug!("Authenticated as {} (session {})", success.username, success.session_id);

        // Request the backfill window and subscribe to the live stream
        let sync = SyncHistory {
            channel: self.channel,
        };
        write_frame(&mut send, &sync).await?;
        *self.state.write().await = ConnectionState::SyncingHistory;

        let control_send = Arc::new(Mutex::new(send));
        self.control_send = Some(Arc::clone(&control_send));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        self.notifier = Some(TypingNotifier::new(signal_tx));

        let generation = self.generation.load(Ordering::SeqCst);
        let shared = Arc::new(ClientShared {
            channel: self.channel,
            state: Arc::clone(&self.state),
            generation: Arc::clone(&self.generation),
            messages: Arc::clone(&self.messages),
            typing: Arc::clone(&self.typing),
            event_tx,
        });

        self.tasks.push(tokio::spawn(run_control_loop(
            recv,
            codec,
            Arc::clone(&shared),
            generation,
        )));
        self.tasks.push(tokio::spawn(run_datagram_loop(
            connection.clone(),
            Arc::clone(&shared),
            generation,
        )));
        self.tasks.push(tokio::spawn(run_typing_forwarder(
            signal_rx,
            connection,
            self.channel,
            Arc::clone(&self.generation),
            generation,
        )));
        self.tasks.push(tokio::spawn(run_typing_sweeper(
            Arc::clone(&shared),
            generation,
        )));
        self.tasks.push(tokio::spawn(run_keepalive(
            control_send,
            Arc::clone(&shared),
            generation,
            Duration::from_secs(self.config.keep_alive_secs),
        )));

        Ok(event_rx)
    }

    /// Send a message to the channel
    ///
    /// Empty content is refused locally, avoiding the round trip; the
    /// message becomes visible only through the server's echo, which
    /// carries the authoritative id and timestamp.
    pub async fn send_message(&mut self, content: impl Into<String>) -> Result<()> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(ChatError::validation("message content is empty"));
        }

        match self.state().await {
            ConnectionState::Active => {}
            ConnectionState::Disconnected => {
                warn!("Dropping message send while disconnected");
                return Ok(());
            }
            state => {
                warn!("Dropping message send in state {:?}", state);
                return Ok(());
            }
        }

        // Sending a message ends the typing signal
        if let Some(notifier) = self.notifier.as_mut() {
            notifier.message_sent();
        }

        self.send_control(&NewMessage {
            channel: self.channel,
            content,
            reply_to: None,
        })
        .await
    }

    /// Send a reply to an existing message
    pub async fn send_reply(
        &mut self,
        content: impl Into<String>,
        reply_to: MessageId,
    ) -> Result<()> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(ChatError::validation("message content is empty"));
        }
        if self.state().await != ConnectionState::Active {
            warn!("Dropping reply send while not active");
            return Ok(());
        }

        if let Some(notifier) = self.notifier.as_mut() {
            notifier.message_sent();
        }

        self.send_control(&NewMessage {
            channel: self.channel,
            content,
            reply_to: Some(reply_to),
        })
        .await
    }

    /// Toggle the local user's reaction on a message
    ///
    /// The outcome is never predicted locally; the rendered state
    /// changes when the server broadcasts the recomputed map.
    pub async fn toggle_reaction(&self, message_id: MessageId, emoji: impl Into<String>) -> Result<()> {
        if self.state().await != ConnectionState::Active {
            warn!("Dropping reaction toggle while not active");
            return Ok(());
        }

        self.send_control(&ReactionToggle {
            channel: self.channel,
            message_id,
            emoji: emoji.into(),
        })
        .await
    }

    /// Report an input change; drives the typing debounce
    pub async fn input_changed(&mut self) {
        if self.state().await != ConnectionState::Active {
            return;
        }
        if let Some(notifier) = self.notifier.as_mut() {
            notifier.keystroke();
        }
    }

    /// Mute a member (requires admin role on the server)
    pub async fn mute(&self, target_user_id: UserId, reason: Option<String>) -> Result<()> {
        if self.state().await != ConnectionState::Active {
            warn!("Dropping mute request while not active");
            return Ok(());
        }

        self.send_control(&Mute {
            channel: self.channel,
            target_user_id,
            reason,
        })
        .await
    }

    /// Unmute a member (requires admin role on the server)
    pub async fn unmute(&self, target_user_id: UserId) -> Result<()> {
        if self.state().await != ConnectionState::Active {
            warn!("Dropping unmute request while not active");
            return Ok(());
        }

        self.send_control(&Unmute {
            channel: self.channel,
            target_user_id,
        })
        .await
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Tear the view down: cancel timers, close the socket, discard
    /// anything still in flight
    ///
    /// Must run on every exit path; `Drop` covers the paths that skip
    /// it.
    pub async fn close(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.notifier = None; // aborts the armed idle timer

        for task in self.tasks.drain(..) {
            task.abort();
        }

        if let Some(send) = self.control_send.take() {
            let goodbye = Goodbye {
                reason: "view closed".to_string(),
            };
            if let Ok(frame) = goodbye.encode_frame() {
                let mut guard = send.lock().await;
                let _ = guard.write_all(&frame.encode_to_bytes()).await;
                let _ = guard.finish();
            }
        }

        if let Some(connection) = self.connection.take() {
            connection.close(0u32.into(), b"view closed");
        }
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"client shutdown");
        }

        *self.state.write().await = ConnectionState::Disconnected;
        info!("Closed chat view for {}", self.channel);
    }

    async fn send_control<T: Encodable>(&self, msg: &T) -> Result<()> {
        let send = self
            .control_send
            .as_ref()
            .ok_or_else(|| ChatError::transport("Not connected to server"))?;

        let frame = msg
            .encode_frame()
            .map_err(|e| ChatError::serialization(format!("Failed to encode frame: {}", e)))?;

        let mut guard = send.lock().await;
        guard
            .write_all(&frame.encode_to_bytes())
            .await
            .map_err(|e| ChatError::transport(format!("Failed to write frame: {}", e)))?;
        Ok(())
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        // Release the socket and timers on exit paths that skip close()
        self.generation.fetch_add(1, Ordering::SeqCst);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(connection) = self.connection.take() {
            connection.close(0u32.into(), b"view dropped");
        }
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"view dropped");
        }
    }
}

/// Write a frame directly to a send stream (pre-Arc handshake phase)
async fn write_frame<T: Encodable>(send: &mut SendStream, msg: &T) -> Result<()> {
    let frame = msg
        .encode_frame()
        .map_err(|e| ChatError::serialization(format!("Failed to encode frame: {}", e)))?;
    send.write_all(&frame.encode_to_bytes())
        .await
        .map_err(|e| ChatError::transport(format!("Failed to write frame: {}", e)))?;
    Ok(())
}

/// Read control frames until the auth exchange resolves
async fn await_auth(recv: &mut RecvStream, codec: &mut FrameCodec) -> Result<AuthSuccess> {
    let mut buf = vec![0u8; 4096];
    loop {
        if let Some(frame) = codec
            .decode_next()
            .map_err(|e| ChatError::protocol(format!("Frame decode error: {}", e)))?
        {
            match DecodedFrame::decode(&frame)
                .map_err(|e| ChatError::protocol(format!("Invalid frame: {}", e)))?
            {
                DecodedFrame::AuthSuccess(success) => return Ok(success),
                DecodedFrame::AuthFailure(failure) => {
                    return Err(ChatError::authentication(failure.message));
                }
                DecodedFrame::SystemError(err) => {
                    return Err(ChatError::protocol(err.message));
                }
                other => {
                    debug!("Ignoring frame during auth: {:?}", other);
                }
            }
            continue;
        }

        match recv.read(&mut buf).await {
            Ok(Some(n)) => codec.feed(&buf[..n]),
            Ok(None) => {
                return Err(ChatError::transport("Connection closed during auth"));
            }
            Err(e) => {
                return Err(ChatError::transport(format!("Read error during auth: {}", e)));
            }
        }
    }
}

/// Main receive loop for ordered control-stream events
async fn run_control_loop(
    mut recv: RecvStream,
    mut codec: FrameCodec,
    shared: Arc<ClientShared>,
    generation: u64,
) {
    let mut buf = vec![0u8; 4096];

    let reason = 'conn: loop {
        // Drain decodable frames before reading more
        loop {
            let frame = match codec.decode_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => break 'conn format!("frame decode error: {}", e),
            };

            if shared.generation.load(Ordering::SeqCst) != generation {
                return; // stale session, discard silently
            }
            handle_control_frame(&shared, frame).await;
        }

        match recv.read(&mut buf).await {
            Ok(Some(n)) => codec.feed(&buf[..n]),
            Ok(None) => break "server closed the stream".to_string(),
            Err(e) => break format!("read error: {}", e),
        }
    };

    // A transport failure lands in Disconnected with no automatic
    // reconnect; the embedding view decides what happens next
    if shared.generation.load(Ordering::SeqCst) == generation {
        *shared.state.write().await = ConnectionState::Disconnected;
        let _ = shared
            .event_tx
            .send(ClientEvent::Disconnected(reason.clone()));
        warn!("Connection lost: {}", reason);
    }
}

/// Apply one ordered server event to the local projection
async fn handle_control_frame(shared: &ClientShared, frame: Frame) {
    let decoded = match DecodedFrame::decode(&frame) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Invalid frame from server: {}", e);
            return;
        }
    };

    match decoded {
        DecodedFrame::SyncResponse(response) => {
            if response.channel != shared.channel {
                return;
            }

            let snapshot = {
                let mut messages = shared.messages.write().await;
                messages.adopt_backfill(response.messages);
                messages.messages().to_vec()
            };
            *shared.state.write().await = ConnectionState::Active;

            let _ = shared.event_tx.send(ClientEvent::HistorySynced {
                channel: response.channel,
                messages: snapshot,
                members: response.members,
            });
        }

        DecodedFrame::MessageBroadcast(message) => {
            if message.channel != shared.channel {
                return;
            }

            let visible = shared.messages.write().await.apply_live(message.clone());
            // Buffered or duplicate deliveries surface later (or never);
            // only a newly visible message is announced
            if visible {
                let _ = shared.event_tx.send(ClientEvent::MessageReceived(message));
            }
        }

        DecodedFrame::ReactionUpdate(update) => {
            if update.channel != shared.channel {
                return;
            }

            let applied = shared
                .messages
                .write()
                .await
                .apply_reactions(update.message_id, update.reactions.clone());
            if applied {
                let _ = shared.event_tx.send(ClientEvent::ReactionsUpdated {
                    message_id: update.message_id,
                    reactions: update.reactions,
                });
            }
        }

        DecodedFrame::MemberJoined(joined) => {
            if joined.channel == shared.channel {
                let _ = shared.event_tx.send(ClientEvent::MemberJoined(joined.member));
            }
        }

        DecodedFrame::MemberLeft(left) => {
            if left.channel == shared.channel {
                let _ = shared.event_tx.send(ClientEvent::MemberLeft {
                    user_id: left.user_id,
                });
            }
        }

        DecodedFrame::MemberMuted(muted) => {
            if muted.channel == shared.channel {
                let _ = shared.event_tx.send(ClientEvent::MemberMuted {
                    target_user_id: muted.target_user_id,
                    muted_by: muted.muted_by,
                    reason: muted.reason,
                });
            }
        }

        DecodedFrame::MemberUnmuted(unmuted) => {
            if unmuted.channel == shared.channel {
                let _ = shared.event_tx.send(ClientEvent::MemberUnmuted {
                    target_user_id: unmuted.target_user_id,
                });
            }
        }

        DecodedFrame::SystemError(err) => {
            debug!("Server error {}: {}", err.code, err.message);
            let _ = shared.event_tx.send(ClientEvent::ServerError(err));
        }

        DecodedFrame::Pong(_) => {}

        other => {
            debug!("Ignoring unexpected frame: {:?}", other);
        }
    }
}

/// Receive loop for typing-presence datagrams
async fn run_datagram_loop(connection: Connection, shared: Arc<ClientShared>, generation: u64) {
    loop {
        let data = match connection.read_datagram().await {
            Ok(data) => data,
            Err(e) => {
                debug!("Datagram receive ended: {}", e);
                return;
            }
        };

        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let frame = match Frame::decode_complete(&data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Invalid datagram frame: {}", e);
                continue;
            }
        };

        let changed = match DecodedFrame::decode(&frame) {
            Ok(DecodedFrame::TypingStart(start)) if start.channel == shared.channel => {
                let username = start.username.unwrap_or_else(|| "someone".to_string());
                shared.typing.write().await.apply_start(username);
                true
            }
            Ok(DecodedFrame::TypingStop(stop)) if stop.channel == shared.channel => {
                let username = stop.username.unwrap_or_default();
                shared.typing.write().await.apply_stop(&username)
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Invalid datagram payload: {}", e);
                false
            }
        };

        if changed {
            let indicator = shared.typing.read().await.indicator_line();
            let _ = shared.event_tx.send(ClientEvent::TypingChanged { indicator });
        }
    }
}

/// Forward the notifier's signals as datagrams on the connection
async fn run_typing_forwarder(
    mut signal_rx: mpsc::UnboundedReceiver<TypingSignal>,
    connection: Connection,
    channel: ChannelKey,
    generation: Arc<AtomicU64>,
    spawned_at: u64,
) {
    while let Some(signal) = signal_rx.recv().await {
        if generation.load(Ordering::SeqCst) != spawned_at {
            return;
        }

        let frame = match signal {
            TypingSignal::Start => TypingStart {
                channel,
                username: None,
            }
            .encode_frame(),
            TypingSignal::Stop => TypingStop {
                channel,
                username: None,
            }
            .encode_frame(),
        };

        match frame {
            Ok(frame) => {
                if let Err(e) = connection.send_datagram(frame.encode_to_bytes()) {
                    debug!("Failed to send typing datagram: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode typing frame: {}", e),
        }
    }
}

/// Periodically expire stale typing flags (peers that vanished without
/// a stop signal)
async fn run_typing_sweeper(shared: Arc<ClientShared>, generation: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let changed = shared.typing.write().await.sweep();
        if changed {
            let indicator = shared.typing.read().await.indicator_line();
            let _ = shared.event_tx.send(ClientEvent::TypingChanged { indicator });
        }
    }
}

/// Keepalive pings while the view is active
async fn run_keepalive(
    control_send: Arc<Mutex<SendStream>>,
    shared: Arc<ClientShared>,
    generation: u64,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // the first tick fires immediately

    loop {
        ticker.tick().await;
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if *shared.state.read().await != ConnectionState::Active {
            continue;
        }

        let ping = Ping {
            timestamp: current_timestamp(),
        };
        let Ok(frame) = ping.encode_frame() else {
            continue;
        };
        let mut guard = control_send.lock().await;
        if guard.write_all(&frame.encode_to_bytes()).await.is_err() {
            return;
        }
    }
}

/// Configure the QUIC client
fn configure_client() -> Result<QuinnClientConfig> {
    // Create a custom certificate verifier that accepts self-signed certificates
    // WARNING: This is insecure and should only be used for development/testing
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth();

    // Set ALPN protocol to match server
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    Ok(QuinnClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| ChatError::config(format!("Failed to create QUIC config: {}", e)))?,
    )))
}

/// Custom certificate verifier that accepts any certificate (INSECURE - for development only)
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
