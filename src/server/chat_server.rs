//! QUIC chat server hub
//!
//! This module provides the main server that accepts connections,
//! processes session events, enforces the message-acceptance gates, and
//! fans accepted events out to every connection subscribed to a channel.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::Endpoint;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use crate::ALPN;
use crate::current_timestamp;
use crate::error::{ChatError, Result};
use crate::protocol::messages::*;
use crate::server::channel::ChannelRegistry;
use crate::server::directory::UserDirectory;
use crate::server::session::{SessionCommand, SessionEvent, SessionHandler};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Connection idle timeout
    pub idle_timeout: Duration,
    /// Messages returned in a sync backfill window
    pub backfill_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4433".parse().unwrap(),
            max_connections: 10000,
            idle_timeout: Duration::from_secs(300),
            backfill_limit: 50,
        }
    }
}

/// Active connection tracking
struct ActiveConnection {
    /// User ID (if authenticated)
    user_id: Option<UserId>,
    /// Username
    username: Option<String>,
    /// Command channel to send commands to this connection
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    /// Remote address
    remote_addr: SocketAddr,
    /// Connection time
    connected_at: u64,
}

/// QUIC chat server
pub struct ChatServer {
    /// Server configuration
    config: ServerConfig,
    /// QUIC endpoint
    endpoint: Option<Endpoint>,
    /// Channel registry
    registry: Arc<ChannelRegistry>,
    /// Identity store
    directory: Arc<UserDirectory>,
    /// Active connections by connection ID
    connections: Arc<RwLock<HashMap<String, ActiveConnection>>>,
    /// Channel subscribers, connection IDs per channel key
    subscribers: Arc<RwLock<HashMap<ChannelKey, HashSet<String>>>>,
}

impl ChatServer {
    /// Create a new chat server
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            endpoint: None,
            registry: Arc::new(ChannelRegistry::new()),
            directory: Arc::new(UserDirectory::new()),
            connections: Arc::new(RwLock::new(HashMap::new())),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Get the channel registry
    pub fn registry(&self) -> Arc<ChannelRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get the identity store
    pub fn directory(&self) -> Arc<UserDirectory> {
        Arc::clone(&self.directory)
    }

    /// Start the server
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting chat server on {}", self.config.bind_addr);

        // Generate self-signed certificate for development
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| ChatError::config(format!("Failed to generate certificate: {}", e)))?;

        let cert_der = CertificateDer::from(
            cert.serialize_der()
                .map_err(|e| ChatError::config(format!("Failed to serialize certificate: {}", e)))?,
        );
        let key_der =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));

        // Configure rustls
        let mut server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .map_err(|e| ChatError::config(format!("Failed to configure TLS: {}", e)))?;

        server_config.alpn_protocols = vec![ALPN.to_vec()];
        server_config.max_early_data_size = 0;

        // Configure QUIC
        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_concurrent_bidi_streams(16u32.into());
        transport_config.max_idle_timeout(Some(
            self.config
                .idle_timeout
                .try_into()
                .map_err(|_| ChatError::config("Idle timeout out of range"))?,
        ));
        transport_config.datagram_receive_buffer_size(Some(65536));

        let mut quic_server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_config)
                .map_err(|e| ChatError::config(format!("Failed to create QUIC config: {}", e)))?,
        ));
        quic_server_config.transport_config(Arc::new(transport_config));

        // Create endpoint
        let endpoint = Endpoint::server(quic_server_config, self.config.bind_addr)
            .map_err(|e| ChatError::transport(format!("Failed to create endpoint: {}", e)))?;

        info!("Server listening on {}", endpoint.local_addr()?);

        self.endpoint = Some(endpoint.clone());

        // Accept connections
        self.accept_connections(endpoint).await
    }

    /// Accept incoming connections
    async fn accept_connections(&self, endpoint: Endpoint) -> Result<()> {
        loop {
            match endpoint.accept().await {
                Some(incoming) => {
                    // Check connection limit
                    {
                        let conns = self.connections.read().await;
                        if conns.len() >= self.config.max_connections {
                            warn!("Connection limit reached, rejecting connection");
                            incoming.refuse();
                            continue;
                        }
                    }

                    // Spawn connection handler
                    let server = self.clone_ref();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_incoming(incoming).await {
                            error!("Connection handling failed: {}", e);
                        }
                    });
                }
                None => {
                    warn!("Endpoint stopped accepting connections");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Handle an incoming connection
    async fn handle_incoming(&self, incoming: quinn::Incoming) -> Result<()> {
        let connection = incoming.await?;
        let remote_addr = connection.remote_address();
        let conn_id = uuid::Uuid::new_v4().to_string();

        debug!("New connection {} from {}", conn_id, remote_addr);

        // Create channels for this connection
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        // Register connection (before auth, so we can track it)
        {
            let mut conns = self.connections.write().await;
            conns.insert(
                conn_id.clone(),
                ActiveConnection {
                    user_id: None,
                    username: None,
                    command_tx: command_tx.clone(),
                    remote_addr,
                    connected_at: current_timestamp(),
                },
            );
        }

        // Create session handler
        let handler = Arc::new(SessionHandler::new(
            connection,
            Arc::clone(&self.directory),
            event_tx,
            command_rx,
        ));

        // Spawn handler task
        let handler_clone = Arc::clone(&handler);
        let handler_task = tokio::spawn(async move { handler_clone.run().await });

        // Spawn event processor task
        let conn_id_clone = conn_id.clone();
        let server = self.clone_ref();
        let event_task = tokio::spawn(async move {
            server.process_events(conn_id_clone, event_rx).await;
        });

        // Wait for either task to complete
        tokio::select! {
            result = handler_task => {
                if let Err(e) = result {
                    error!("Handler task error: {}", e);
                }
            }
            _ = event_task => {}
        }

        // Clean up connection
        self.cleanup_connection(&conn_id).await;

        Ok(())
    }

    /// Process events from a connection
    async fn process_events(
        &self,
        conn_id: String,
        mut event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        while let Some(event) = event_rx.recv().await {
            if let Err(e) = self.handle_event(&conn_id, event).await {
                warn!("Event handling error for {}: {}", conn_id, e);
            }
        }
    }

    /// Handle a single event from a connection
    async fn handle_event(&self, conn_id: &str, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Authenticated { user_id, username } => {
                self.handle_authenticated(conn_id, user_id, username).await;
            }

            SessionEvent::SyncHistory { user_id, channel } => {
                self.handle_sync_history(conn_id, user_id, channel).await?;
            }

            SessionEvent::NewMessage {
                user_id,
                channel,
                content,
                reply_to,
            } => {
                self.handle_new_message(conn_id, user_id, channel, content, reply_to)
                    .await?;
            }

            SessionEvent::ReactionToggle {
                user_id,
                channel,
                message_id,
                emoji,
            } => {
                self.handle_reaction_toggle(conn_id, user_id, channel, message_id, emoji)
                    .await?;
            }

            SessionEvent::TypingStart { user_id, channel } => {
                self.handle_typing(conn_id, user_id, channel, true).await?;
            }

            SessionEvent::TypingStop { user_id, channel } => {
                self.handle_typing(conn_id, user_id, channel, false).await?;
            }

            SessionEvent::Mute {
                user_id,
                channel,
                target_user_id,
                reason,
            } => {
                self.handle_mute(conn_id, user_id, channel, target_user_id, reason)
                    .await?;
            }

            SessionEvent::Unmute {
                user_id,
                channel,
                target_user_id,
            } => {
                self.handle_unmute(conn_id, user_id, channel, target_user_id)
                    .await?;
            }

            SessionEvent::Disconnected { user_id, reason } => {
                debug!(
                    "Connection {} disconnected: {} (user: {:?})",
                    conn_id, reason, user_id
                );
            }
        }

        Ok(())
    }

    /// Record the authenticated identity on the connection
    async fn handle_authenticated(&self, conn_id: &str, user_id: UserId, username: String) {
        let mut conns = self.connections.write().await;
        if let Some(conn) = conns.get_mut(conn_id) {
            conn.user_id = Some(user_id);
            conn.username = Some(username);
            debug!(
                "Connection {} ({}) bound to user {}, connected at {}",
                conn_id, conn.remote_addr, user_id, conn.connected_at
            );
        }
    }

    /// Handle a history backfill request + live subscription
    async fn handle_sync_history(
        &self,
        conn_id: &str,
        user_id: UserId,
        channel_key: ChannelKey,
    ) -> Result<()> {
        let Some(channel) = self.registry.get(channel_key).await else {
            self.send_error(
                conn_id,
                &ChatError::not_found(format!("channel {}", channel_key)),
            )
            .await;
            return Ok(());
        };

        if let Err(e) = channel.authorize_sync(user_id, current_timestamp()) {
            self.send_error(conn_id, &e).await;
            return Ok(());
        }

        let username = self
            .connection_username(conn_id)
            .await
            .unwrap_or_else(|| format!("user_{}", user_id));

        // Enter the roster; first appearance is announced to the room
        let (member, newly_joined) = channel.join(user_id, username.clone()).await;
        if newly_joined {
            self.broadcast_to_channel(
                channel_key,
                SessionCommand::SendMemberJoined(MemberJoined {
                    channel: channel_key,
                    member,
                }),
                Some(conn_id),
            )
            .await;
        }

        // Register as a live subscriber before building the backfill so a
        // message accepted concurrently is broadcast rather than lost; the
        // client de-duplicates against the window by id.
        {
            let mut subs = self.subscribers.write().await;
            subs.entry(channel_key).or_default().insert(conn_id.to_string());
        }

        let messages = channel.recent_messages(self.config.backfill_limit).await;
        let members = channel.roster().await;

        self.send_to_connection(
            conn_id,
            SessionCommand::SendSyncResponse(SyncResponse {
                channel: channel_key,
                messages,
                members,
            }),
        )
        .await;

        info!("User {} synced {}", username, channel_key);
        Ok(())
    }

    /// Handle an authored message
    async fn handle_new_message(
        &self,
        conn_id: &str,
        user_id: UserId,
        channel_key: ChannelKey,
        content: String,
        reply_to: Option<MessageId>,
    ) -> Result<()> {
        let Some(channel) = self.registry.get(channel_key).await else {
            self.send_error(
                conn_id,
                &ChatError::not_found(format!("channel {}", channel_key)),
            )
            .await;
            return Ok(());
        };

        let username = self
            .connection_username(conn_id)
            .await
            .unwrap_or_else(|| format!("user_{}", user_id));
        let sender = UserInfo { user_id, username };

        match channel
            .accept_message(sender, content, reply_to, current_timestamp())
            .await
        {
            Ok(message) => {
                debug!(
                    "Message {} from {} in {}",
                    message.id, message.sender.username, channel_key
                );
                // Broadcast to every subscriber including the sender; the
                // echo is how the sender learns the assigned id/timestamp
                self.broadcast_to_channel(
                    channel_key,
                    SessionCommand::SendMessage(message),
                    None,
                )
                .await;
            }
            Err(e) => {
                self.send_error(conn_id, &e).await;
            }
        }

        Ok(())
    }

    /// Handle a reaction toggle
    async fn handle_reaction_toggle(
        &self,
        conn_id: &str,
        user_id: UserId,
        channel_key: ChannelKey,
        message_id: MessageId,
        emoji: String,
    ) -> Result<()> {
        let Some(channel) = self.registry.get(channel_key).await else {
            self.send_error(
                conn_id,
                &ChatError::not_found(format!("channel {}", channel_key)),
            )
            .await;
            return Ok(());
        };

        if !channel.is_member(user_id).await {
            self.send_error(
                conn_id,
                &ChatError::authorization(format!("not a member of {}", channel_key)),
            )
            .await;
            return Ok(());
        }

        match channel.toggle_reaction(message_id, &emoji, user_id).await {
            Ok(reactions) => {
                // Always the entire recomputed state, never a delta
                self.broadcast_to_channel(
                    channel_key,
                    SessionCommand::SendReactionUpdate(ReactionUpdate {
                        channel: channel_key,
                        message_id,
                        reactions,
                    }),
                    None,
                )
                .await;
            }
            Err(e) => {
                self.send_error(conn_id, &e).await;
            }
        }

        Ok(())
    }

    /// Handle typing presence, relayed to every other subscriber
    async fn handle_typing(
        &self,
        conn_id: &str,
        user_id: UserId,
        channel_key: ChannelKey,
        start: bool,
    ) -> Result<()> {
        let username = self
            .connection_username(conn_id)
            .await
            .unwrap_or_else(|| format!("user_{}", user_id));

        let cmd = if start {
            SessionCommand::SendTypingStart(TypingStart {
                channel: channel_key,
                username: Some(username),
            })
        } else {
            SessionCommand::SendTypingStop(TypingStop {
                channel: channel_key,
                username: Some(username),
            })
        };

        self.broadcast_to_channel(channel_key, cmd, Some(conn_id)).await;
        Ok(())
    }

    /// Handle a mute request
    async fn handle_mute(
        &self,
        conn_id: &str,
        user_id: UserId,
        channel_key: ChannelKey,
        target_user_id: UserId,
        reason: Option<String>,
    ) -> Result<()> {
        let Some(channel) = self.registry.get(channel_key).await else {
            self.send_error(
                conn_id,
                &ChatError::not_found(format!("channel {}", channel_key)),
            )
            .await;
            return Ok(());
        };

        if !channel.is_admin(user_id).await {
            self.send_error(
                conn_id,
                &ChatError::authorization(format!("admin role required in {}", channel_key)),
            )
            .await;
            return Ok(());
        }

        match channel.mute(target_user_id, user_id, reason).await {
            Ok(record) => {
                info!(
                    "User {} muted {} in {}",
                    user_id, target_user_id, channel_key
                );
                self.broadcast_to_channel(
                    channel_key,
                    SessionCommand::SendMemberMuted(MemberMuted {
                        channel: channel_key,
                        target_user_id,
                        muted_by: record.muted_by,
                        reason: record.reason,
                    }),
                    None,
                )
                .await;
            }
            Err(e) => {
                self.send_error(conn_id, &e).await;
            }
        }

        Ok(())
    }

    /// Handle an unmute request
    async fn handle_unmute(
        &self,
        conn_id: &str,
        user_id: UserId,
        channel_key: ChannelKey,
        target_user_id: UserId,
    ) -> Result<()> {
        let Some(channel) = self.registry.get(channel_key).await else {
            self.send_error(
                conn_id,
                &ChatError::not_found(format!("channel {}", channel_key)),
            )
            .await;
            return Ok(());
        };

        if !channel.is_admin(user_id).await {
            self.send_error(
                conn_id,
                &ChatError::authorization(format!("admin role required in {}", channel_key)),
            )
            .await;
            return Ok(());
        }

        match channel.unmute(target_user_id).await {
            Ok(()) => {
                info!(
                    "User {} unmuted {} in {}",
                    user_id, target_user_id, channel_key
                );
                self.broadcast_to_channel(
                    channel_key,
                    SessionCommand::SendMemberUnmuted(MemberUnmuted {
                        channel: channel_key,
                        target_user_id,
                        unmuted_by: user_id,
                    }),
                    None,
                )
                .await;
            }
            Err(e) => {
                self.send_error(conn_id, &e).await;
            }
        }

        Ok(())
    }

    /// Get the username recorded for a connection
    async fn connection_username(&self, conn_id: &str) -> Option<String> {
        let conns = self.connections.read().await;
        conns.get(conn_id).and_then(|c| c.username.clone())
    }

    /// Send a command to a specific connection
    async fn send_to_connection(&self, conn_id: &str, cmd: SessionCommand) {
        let conns = self.connections.read().await;
        if let Some(conn) = conns.get(conn_id) {
            let _ = conn.command_tx.send(cmd);
        }
    }

    /// Send an error to a specific connection
    async fn send_error(&self, conn_id: &str, error: &ChatError) {
        self.send_to_connection(conn_id, SessionCommand::SendError(SystemError::from(error)))
            .await;
    }

    /// Broadcast a command to every connection subscribed to a channel
    async fn broadcast_to_channel(
        &self,
        channel_key: ChannelKey,
        cmd: SessionCommand,
        exclude_conn: Option<&str>,
    ) {
        let subs = self.subscribers.read().await;
        let Some(conn_ids) = subs.get(&channel_key) else {
            return;
        };

        let conns = self.connections.read().await;
        for conn_id in conn_ids {
            if Some(conn_id.as_str()) == exclude_conn {
                continue;
            }
            if let Some(conn) = conns.get(conn_id) {
                let _ = conn.command_tx.send(cmd.clone());
            }
        }
    }

    /// Clean up a disconnected connection
    async fn cleanup_connection(&self, conn_id: &str) {
        // Get user ID before removing
        let user_id = {
            let mut conns = self.connections.write().await;
            conns.remove(conn_id).and_then(|c| c.user_id)
        };

        // Unsubscribe from all channels and announce the departure
        let left_channels: Vec<ChannelKey> = {
            let mut subs = self.subscribers.write().await;
            let mut left = Vec::new();
            subs.retain(|key, conn_ids| {
                if conn_ids.remove(conn_id) {
                    left.push(*key);
                }
                !conn_ids.is_empty()
            });
            left
        };

        if let Some(user_id) = user_id {
            for channel_key in left_channels {
                self.broadcast_to_channel(
                    channel_key,
                    SessionCommand::SendMemberLeft(MemberLeft {
                        channel: channel_key,
                        user_id,
                    }),
                    None,
                )
                .await;
            }
        }

        debug!("Cleaned up connection {}", conn_id);
    }

    /// Get server statistics
    pub async fn stats(&self) -> ServerStats {
        let conns = self.connections.read().await;
        let authenticated_count = conns.values().filter(|c| c.user_id.is_some()).count();

        ServerStats {
            total_connections: conns.len(),
            authenticated_connections: authenticated_count,
            total_channels: self.registry.channel_count().await,
            bind_address: self.config.bind_addr,
        }
    }

    /// Shutdown the server
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(endpoint) = self.endpoint.take() {
            let conns = self.connections.read().await;
            for conn in conns.values() {
                let _ = conn
                    .command_tx
                    .send(SessionCommand::Close("Server shutdown".to_string()));
            }

            endpoint.close(0u32.into(), b"Server shutdown");
            info!("Server shutdown complete");
        }
        Ok(())
    }

    /// Clone reference for spawning tasks
    fn clone_ref(&self) -> Arc<Self> {
        Arc::new(Self {
            config: self.config.clone(),
            endpoint: self.endpoint.clone(),
            registry: Arc::clone(&self.registry),
            directory: Arc::clone(&self.directory),
            connections: Arc::clone(&self.connections),
            subscribers: Arc::clone(&self.subscribers),
        })
    }
}

/// Server statistics
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub total_connections: usize,
    pub authenticated_connections: usize,
    pub total_channels: usize,
    pub bind_address: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::channel::{Channel, ChannelAccess};

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 4433);
        assert_eq!(config.max_connections, 10000);
        assert_eq!(config.backfill_limit, 50);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = ChatServer::with_defaults();
        assert!(server.endpoint.is_none());
        assert_eq!(server.stats().await.total_connections, 0);
    }

    #[tokio::test]
    async fn test_fanout_is_scoped_to_the_channel() {
        // Scenario A plumbing: a connection subscribed to chatroom 43
        // receives nothing when chatroom 42 gets a message.
        let server = ChatServer::with_defaults();

        let lobby = server
            .registry()
            .register(Channel::new(
                ChannelKey::chatroom(42),
                "Lobby".to_string(),
                ChannelAccess::Open,
                1,
            ))
            .await;
        lobby.join(1, "alice".to_string()).await;

        let (tx_42, mut rx_42) = mpsc::unbounded_channel();
        let (tx_43, mut rx_43) = mpsc::unbounded_channel();

        {
            let mut conns = server.connections.write().await;
            for (id, tx, user) in [("c42", tx_42, 1u64), ("c43", tx_43, 2u64)] {
                conns.insert(
                    id.to_string(),
                    ActiveConnection {
                        user_id: Some(user),
                        username: Some(format!("user_{}", user)),
                        command_tx: tx,
                        remote_addr: "127.0.0.1:9999".parse().unwrap(),
                        connected_at: 0,
                    },
                );
            }
            let mut subs = server.subscribers.write().await;
            subs.entry(ChannelKey::chatroom(42))
                .or_default()
                .insert("c42".to_string());
            subs.entry(ChannelKey::chatroom(43))
                .or_default()
                .insert("c43".to_string());
        }

        server
            .handle_new_message(
                "c42",
                1,
                ChannelKey::chatroom(42),
                "hello".to_string(),
                None,
            )
            .await
            .unwrap();

        // Sender's own connection receives the echo with the assigned id
        match rx_42.try_recv().unwrap() {
            SessionCommand::SendMessage(msg) => {
                assert_eq!(msg.id, 1);
                assert_eq!(msg.channel, ChannelKey::chatroom(42));
                assert_eq!(msg.content, "hello");
            }
            other => panic!("Unexpected command: {:?}", other),
        }

        // The chatroom 43 subscriber sees nothing
        assert!(rx_43.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_muted_sender_gets_error_and_no_broadcast() {
        // Scenario C: muted member's message is rejected and never fans out
        let server = ChatServer::with_defaults();

        let lobby = server
            .registry()
            .register(Channel::new(
                ChannelKey::chatroom(42),
                "Lobby".to_string(),
                ChannelAccess::Open,
                1,
            ))
            .await;
        lobby.join(1, "alice".to_string()).await;
        lobby.join(3, "carol".to_string()).await;
        lobby.mute(3, 1, Some("spam".to_string())).await.unwrap();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();

        {
            let mut conns = server.connections.write().await;
            for (id, tx, user, name) in
                [("a", tx_a, 1u64, "alice"), ("c", tx_c, 3u64, "carol")]
            {
                conns.insert(
                    id.to_string(),
                    ActiveConnection {
                        user_id: Some(user),
                        username: Some(name.to_string()),
                        command_tx: tx,
                        remote_addr: "127.0.0.1:9999".parse().unwrap(),
                        connected_at: 0,
                    },
                );
            }
            let mut subs = server.subscribers.write().await;
            let room = subs.entry(ChannelKey::chatroom(42)).or_default();
            room.insert("a".to_string());
            room.insert("c".to_string());
        }

        server
            .handle_new_message(
                "c",
                3,
                ChannelKey::chatroom(42),
                "buy now!!!".to_string(),
                None,
            )
            .await
            .unwrap();

        // The sender receives a system error carrying the authorization code
        match rx_c.try_recv().unwrap() {
            SessionCommand::SendError(err) => {
                assert_eq!(err.code, ChatError::authorization("").code());
            }
            other => panic!("Unexpected command: {:?}", other),
        }

        // No subscriber ever sees the message
        assert!(rx_a.try_recv().is_err());
        assert_eq!(lobby.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_typing_excludes_the_sender() {
        let server = ChatServer::with_defaults();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        {
            let mut conns = server.connections.write().await;
            for (id, tx, user, name) in [("a", tx_a, 1u64, "alice"), ("b", tx_b, 2u64, "bob")] {
                conns.insert(
                    id.to_string(),
                    ActiveConnection {
                        user_id: Some(user),
                        username: Some(name.to_string()),
                        command_tx: tx,
                        remote_addr: "127.0.0.1:9999".parse().unwrap(),
                        connected_at: 0,
                    },
                );
            }
            let mut subs = server.subscribers.write().await;
            let room = subs.entry(ChannelKey::chatroom(42)).or_default();
            room.insert("a".to_string());
            room.insert("b".to_string());
        }

        server
            .handle_typing("a", 1, ChannelKey::chatroom(42), true)
            .await
            .unwrap();

        // The peer sees the signal with the username filled by the server
        match rx_b.try_recv().unwrap() {
            SessionCommand::SendTypingStart(t) => {
                assert_eq!(t.username.as_deref(), Some("alice"));
            }
            other => panic!("Unexpected command: {:?}", other),
        }

        // The sender does not hear itself typing
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mute_requires_admin_role() {
        let server = ChatServer::with_defaults();

        let lobby = server
            .registry()
            .register(Channel::new(
                ChannelKey::chatroom(42),
                "Lobby".to_string(),
                ChannelAccess::Open,
                1,
            ))
            .await;
        lobby.join(1, "alice".to_string()).await;
        lobby.join(2, "bob".to_string()).await;

        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        {
            let mut conns = server.connections.write().await;
            conns.insert(
                "b".to_string(),
                ActiveConnection {
                    user_id: Some(2),
                    username: Some("bob".to_string()),
                    command_tx: tx_b,
                    remote_addr: "127.0.0.1:9999".parse().unwrap(),
                    connected_at: 0,
                },
            );
        }

        // Bob is a plain member and may not mute
        server
            .handle_mute("b", 2, ChannelKey::chatroom(42), 1, None)
            .await
            .unwrap();

        match rx_b.try_recv().unwrap() {
            SessionCommand::SendError(err) => {
                assert_eq!(err.code, ChatError::authorization("").code());
            }
            other => panic!("Unexpected command: {:?}", other),
        }
        assert!(!lobby.is_muted(1).await);
    }
}
