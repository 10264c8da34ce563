//! Per-connection protocol session for the chat server
//!
//! This module handles individual client connections: the authentication
//! handshake, routing of inbound frames to the hub, and delivery of
//! outbound events back onto the wire.

use std::sync::Arc;

use bytes::Bytes;
use quinn::{Connection, RecvStream, SendStream};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::protocol::codec::{Decodable, Encodable};
use crate::protocol::frame::{Frame, FrameCodec, FrameType};
use crate::protocol::messages::*;
use crate::server::directory::UserDirectory;

/// Events emitted by a session to the hub
#[derive(Debug)]
pub enum SessionEvent {
    /// Client successfully authenticated
    Authenticated { user_id: UserId, username: String },

    /// Client requested a history backfill + live subscription
    SyncHistory { user_id: UserId, channel: ChannelKey },

    /// Client authored a message
    NewMessage {
        user_id: UserId,
        channel: ChannelKey,
        content: String,
        reply_to: Option<MessageId>,
    },

    /// Client toggled a reaction
    ReactionToggle {
        user_id: UserId,
        channel: ChannelKey,
        message_id: MessageId,
        emoji: String,
    },

    /// Client started typing
    TypingStart { user_id: UserId, channel: ChannelKey },

    /// Client stopped typing
    TypingStop { user_id: UserId, channel: ChannelKey },

    /// Client asked to mute a member
    Mute {
        user_id: UserId,
        channel: ChannelKey,
        target_user_id: UserId,
        reason: Option<String>,
    },

    /// Client asked to unmute a member
    Unmute {
        user_id: UserId,
        channel: ChannelKey,
        target_user_id: UserId,
    },

    /// Client disconnected
    Disconnected {
        user_id: Option<UserId>,
        reason: String,
    },
}

/// Commands the hub sends to a session for delivery to its client
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Deliver the backfill window + roster
    SendSyncResponse(SyncResponse),

    /// Deliver an accepted message (including the sender's own echo)
    SendMessage(ChatMessage),

    /// Deliver the recomputed reaction state for a message
    SendReactionUpdate(ReactionUpdate),

    /// Deliver a typing-start signal
    SendTypingStart(TypingStart),

    /// Deliver a typing-stop signal
    SendTypingStop(TypingStop),

    /// Deliver a member-joined notification
    SendMemberJoined(MemberJoined),

    /// Deliver a member-left notification
    SendMemberLeft(MemberLeft),

    /// Deliver a member-muted notification
    SendMemberMuted(MemberMuted),

    /// Deliver a member-unmuted notification
    SendMemberUnmuted(MemberUnmuted),

    /// Deliver an error to this client
    SendError(SystemError),

    /// Close the connection
    Close(String),
}

/// State of the connection handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Waiting for Auth from client
    AwaitingAuth,
    /// Fully authenticated
    Authenticated,
}

/// Per-connection handler that manages the handshake and frame routing
pub struct SessionHandler {
    /// Underlying QUIC connection
    connection: Connection,

    /// Session ID
    session_id: String,

    /// Handshake state
    handshake_state: RwLock<HandshakeState>,

    /// User ID (set after authentication)
    user_id: RwLock<Option<UserId>>,

    /// Identity store used for the auth handshake
    directory: Arc<UserDirectory>,

    /// Channel for sending events to the hub
    event_tx: mpsc::UnboundedSender<SessionEvent>,

    /// Channel for receiving commands from the hub
    command_rx: RwLock<Option<mpsc::UnboundedReceiver<SessionCommand>>>,

    /// Control stream sender
    control_send: RwLock<Option<SendStream>>,
}

impl SessionHandler {
    /// Create a new session handler
    pub fn new(
        connection: Connection,
        directory: Arc<UserDirectory>,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
        command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Self {
        Self {
            connection,
            session_id: uuid::Uuid::new_v4().to_string(),
            handshake_state: RwLock::new(HandshakeState::AwaitingAuth),
            user_id: RwLock::new(None),
            directory,
            event_tx,
            command_rx: RwLock::new(Some(command_rx)),
            control_send: RwLock::new(None),
        }
    }

    /// Get the remote address
    pub fn remote_address(&self) -> std::net::SocketAddr {
        self.connection.remote_address()
    }

    /// Get user ID if authenticated
    pub async fn user_id(&self) -> Option<UserId> {
        *self.user_id.read().await
    }

    /// Check if authenticated
    pub async fn is_authenticated(&self) -> bool {
        *self.handshake_state.read().await == HandshakeState::Authenticated
    }

    /// Run the session
    /// This is the main entry point that should be spawned as a task
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr = self.remote_address();
        info!("New connection from {}", addr);

        let result = self.accept_and_run(Arc::clone(&self)).await;

        let user_id = self.user_id().await;
        let reason = match &result {
            Ok(()) => "normal".to_string(),
            Err(e) => e.to_string(),
        };

        let _ = self
            .event_tx
            .send(SessionEvent::Disconnected { user_id, reason });

        info!("Connection from {} closed", addr);
        result
    }

    /// Accept the control stream and run the frame loops
    async fn accept_and_run(self: &Arc<Self>, handler: Arc<Self>) -> Result<()> {
        // Accept the control bidirectional stream from the client
        let (send, recv) = self
            .connection
            .accept_bi()
            .await
            .map_err(|e| ChatError::transport(format!("Failed to accept control stream: {}", e)))?;

        {
            let mut control = self.control_send.write().await;
            *control = Some(send);
        }

        debug!("Control stream accepted from {}", self.remote_address());

        // Spawn control stream receiver
        let recv_handle = {
            let h = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = h.handle_control_stream(recv).await {
                    debug!("Control stream ended: {}", e);
                }
            })
        };

        // Spawn command handler
        let cmd_handle = {
            let h = Arc::clone(&handler);
            tokio::spawn(async move {
                h.handle_commands().await;
            })
        };

        // Spawn datagram receiver (typing presence)
        let dgram_handle = {
            let h = Arc::clone(&handler);
            tokio::spawn(async move {
                h.handle_datagrams().await;
            })
        };

        // Wait for any task to complete (usually means disconnect)
        tokio::select! {
            _ = recv_handle => {},
            _ = cmd_handle => {},
            _ = dgram_handle => {},
        }

        Ok(())
    }

    /// Handle incoming frames on the control stream
    async fn handle_control_stream(self: &Arc<Self>, mut recv: RecvStream) -> Result<()> {
        let mut codec = FrameCodec::new();
        let mut buf = vec![0u8; 4096];

        loop {
            match recv.read(&mut buf).await {
                Ok(Some(n)) => {
                    codec.feed(&buf[..n]);

                    // Process all available frames
                    loop {
                        match codec.decode_next() {
                            Ok(Some(frame)) => {
                                if let Err(e) = self.handle_control_frame(frame).await {
                                    warn!("Error handling control frame: {}", e);
                                    self.send_error(&e).await?;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                return Err(ChatError::protocol(format!(
                                    "Frame decode error: {}",
                                    e
                                )));
                            }
                        }
                    }
                }
                Ok(None) => {
                    debug!("Control stream finished");
                    break;
                }
                Err(e) => {
                    return Err(ChatError::transport(format!(
                        "Control stream read error: {}",
                        e
                    )));
                }
            }
        }

        Ok(())
    }

    /// Handle a single control frame
    async fn handle_control_frame(&self, frame: Frame) -> Result<()> {
        let state = *self.handshake_state.read().await;

        match (state, frame.frame_type) {
            // Handshake: Auth
            (HandshakeState::AwaitingAuth, FrameType::Auth) => {
                let auth = Auth::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid Auth: {}", e)))?;

                debug!("Received Auth for user {}", auth.user_id);

                match self.directory.validate(auth.user_id, &auth.username).await {
                    Ok(()) => {
                        *self.user_id.write().await = Some(auth.user_id);
                        *self.handshake_state.write().await = HandshakeState::Authenticated;

                        let success = AuthSuccess {
                            user_id: auth.user_id,
                            username: auth.username.clone(),
                            session_id: self.session_id.clone(),
                        };
                        self.send_control_frame(&success).await?;

                        let _ = self.event_tx.send(SessionEvent::Authenticated {
                            user_id: auth.user_id,
                            username: auth.username,
                        });

                        info!(
                            "User {} authenticated from {}",
                            auth.user_id,
                            self.remote_address()
                        );
                    }
                    Err(e) => {
                        // The session stays open so the client can retry
                        warn!("Authentication failed for {}: {}", auth.user_id, e);
                        let failure = AuthFailure {
                            code: e.code(),
                            message: e.message().to_string(),
                        };
                        self.send_control_frame(&failure).await?;
                    }
                }
            }

            // Channel commands require authentication
            (HandshakeState::AwaitingAuth, frame_type) if frame_type.is_channel_command() => {
                return Err(ChatError::authentication("not authenticated"));
            }

            (HandshakeState::Authenticated, FrameType::SyncHistory) => {
                let msg = SyncHistory::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid SyncHistory: {}", e)))?;

                let _ = self.event_tx.send(SessionEvent::SyncHistory {
                    user_id: self.authenticated_user().await?,
                    channel: msg.channel,
                });
            }

            (HandshakeState::Authenticated, FrameType::NewMessage) => {
                let msg = NewMessage::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid NewMessage: {}", e)))?;

                let _ = self.event_tx.send(SessionEvent::NewMessage {
                    user_id: self.authenticated_user().await?,
                    channel: msg.channel,
                    content: msg.content,
                    reply_to: msg.reply_to,
                });
            }

            (HandshakeState::Authenticated, FrameType::ReactionToggle) => {
                let msg = ReactionToggle::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid ReactionToggle: {}", e)))?;

                let _ = self.event_tx.send(SessionEvent::ReactionToggle {
                    user_id: self.authenticated_user().await?,
                    channel: msg.channel,
                    message_id: msg.message_id,
                    emoji: msg.emoji,
                });
            }

            (HandshakeState::Authenticated, FrameType::Mute) => {
                let msg = Mute::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid Mute: {}", e)))?;

                let _ = self.event_tx.send(SessionEvent::Mute {
                    user_id: self.authenticated_user().await?,
                    channel: msg.channel,
                    target_user_id: msg.target_user_id,
                    reason: msg.reason,
                });
            }

            (HandshakeState::Authenticated, FrameType::Unmute) => {
                let msg = Unmute::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid Unmute: {}", e)))?;

                let _ = self.event_tx.send(SessionEvent::Unmute {
                    user_id: self.authenticated_user().await?,
                    channel: msg.channel,
                    target_user_id: msg.target_user_id,
                });
            }

            // Keepalive
            (HandshakeState::Authenticated, FrameType::Ping) => {
                let ping = Ping::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid Ping: {}", e)))?;

                let pong = Pong {
                    timestamp: ping.timestamp,
                };
                self.send_control_frame(&pong).await?;
            }

            // Goodbye
            (_, FrameType::Goodbye) => {
                let goodbye = Goodbye::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid Goodbye: {}", e)))?;

                info!("Client sent Goodbye: {}", goodbye.reason);
                self.connection.close(0u32.into(), goodbye.reason.as_bytes());
            }

            // Invalid state/frame combination
            (state, frame_type) => {
                warn!("Unexpected frame {:?} in state {:?}", frame_type, state);
                return Err(ChatError::protocol(format!(
                    "Unexpected frame {:?}",
                    frame_type
                )));
            }
        }

        Ok(())
    }

    /// Handle incoming datagrams (typing presence)
    async fn handle_datagrams(self: &Arc<Self>) {
        loop {
            match self.connection.read_datagram().await {
                Ok(data) => {
                    if let Err(e) = self.handle_datagram(data).await {
                        warn!("Datagram handling error: {}", e);
                    }
                }
                Err(e) => {
                    debug!("Datagram receive ended: {}", e);
                    break;
                }
            }
        }
    }

    /// Handle a single datagram
    async fn handle_datagram(&self, data: Bytes) -> Result<()> {
        if !self.is_authenticated().await {
            return Ok(()); // Silently ignore datagrams before auth
        }

        let user_id = self.authenticated_user().await?;
        let frame = Frame::decode_complete(&data)
            .map_err(|e| ChatError::protocol(format!("Invalid datagram frame: {}", e)))?;

        match frame.frame_type {
            FrameType::TypingStart => {
                let msg = TypingStart::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid TypingStart: {}", e)))?;

                let _ = self.event_tx.send(SessionEvent::TypingStart {
                    user_id,
                    channel: msg.channel,
                });
            }

            FrameType::TypingStop => {
                let msg = TypingStop::decode_frame(&frame)
                    .map_err(|e| ChatError::protocol(format!("Invalid TypingStop: {}", e)))?;

                let _ = self.event_tx.send(SessionEvent::TypingStop {
                    user_id,
                    channel: msg.channel,
                });
            }

            _ => {
                warn!("Unexpected datagram frame type: {:?}", frame.frame_type);
            }
        }

        Ok(())
    }

    /// Handle commands from the hub
    async fn handle_commands(self: &Arc<Self>) {
        let rx = self.command_rx.write().await.take();
        let Some(mut rx) = rx else {
            return;
        };

        while let Some(cmd) = rx.recv().await {
            if let Err(e) = self.handle_command(cmd).await {
                warn!("Command handling error: {}", e);
            }
        }
    }

    /// Handle a single command
    async fn handle_command(&self, cmd: SessionCommand) -> Result<()> {
        match cmd {
            SessionCommand::SendSyncResponse(msg) => {
                self.send_control_frame(&msg).await?;
            }
            SessionCommand::SendMessage(msg) => {
                self.send_control_frame(&msg).await?;
            }
            SessionCommand::SendReactionUpdate(msg) => {
                self.send_control_frame(&msg).await?;
            }
            SessionCommand::SendTypingStart(msg) => {
                self.send_datagram(&msg).await?;
            }
            SessionCommand::SendTypingStop(msg) => {
                self.send_datagram(&msg).await?;
            }
            SessionCommand::SendMemberJoined(msg) => {
                self.send_control_frame(&msg).await?;
            }
            SessionCommand::SendMemberLeft(msg) => {
                self.send_control_frame(&msg).await?;
            }
            SessionCommand::SendMemberMuted(msg) => {
                self.send_control_frame(&msg).await?;
            }
            SessionCommand::SendMemberUnmuted(msg) => {
                self.send_control_frame(&msg).await?;
            }
            SessionCommand::SendError(msg) => {
                self.send_control_frame(&msg).await?;
            }
            SessionCommand::Close(reason) => {
                self.connection.close(0u32.into(), reason.as_bytes());
            }
        }

        Ok(())
    }

    /// Get the authenticated user id, or an authentication error
    async fn authenticated_user(&self) -> Result<UserId> {
        (*self.user_id.read().await)
            .ok_or_else(|| ChatError::authentication("not authenticated"))
    }

    /// Send a frame on the control stream
    async fn send_control_frame<T: Encodable>(&self, msg: &T) -> Result<()> {
        let frame = msg
            .encode_frame()
            .map_err(|e| ChatError::serialization(format!("Failed to encode frame: {}", e)))?;

        let mut control = self.control_send.write().await;
        if let Some(send) = control.as_mut() {
            let data = frame.encode_to_bytes();
            send.write_all(&data).await.map_err(|e| {
                ChatError::transport(format!("Failed to write to control stream: {}", e))
            })?;
        } else {
            return Err(ChatError::transport("Control stream not open"));
        }

        Ok(())
    }

    /// Send a datagram
    async fn send_datagram<T: Encodable>(&self, msg: &T) -> Result<()> {
        let frame = msg
            .encode_frame()
            .map_err(|e| ChatError::serialization(format!("Failed to encode frame: {}", e)))?;

        let data = frame.encode_to_bytes();
        self.connection
            .send_datagram(data)
            .map_err(|e| ChatError::transport(format!("Failed to send datagram: {}", e)))?;

        Ok(())
    }

    /// Send an error frame; the session stays usable for retry
    async fn send_error(&self, error: &ChatError) -> Result<()> {
        let err = SystemError::from(error);
        self.send_control_frame(&err).await
    }
}
