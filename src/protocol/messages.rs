//! Protocol message types for the chat engine
//!
//! All message payloads that can be serialized/deserialized within frames.
//! Uses serde for JSON serialization.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier types
pub type UserId = u64;
pub type MessageId = u64;
pub type ChatroomId = u64;

/// Discriminator for the conversation namespaces sharing one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    /// Persistent group chatroom (public or invite-linked private)
    Chatroom,
    /// Time-bounded chat attached to an event
    Event,
    /// Time-bounded chat attached to a meetup
    Meetup,
    /// Two-party conversation
    DirectMessage,
}

/// The tagged key a channel is routed by
///
/// An event 5 and a meetup 5 are distinct channels; routing on the pair
/// makes cross-delivery between them impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub chat_type: ChatType,
    pub chatroom_id: ChatroomId,
}

impl ChannelKey {
    pub fn new(chat_type: ChatType, chatroom_id: ChatroomId) -> Self {
        Self {
            chat_type,
            chatroom_id,
        }
    }

    pub fn chatroom(id: ChatroomId) -> Self {
        Self::new(ChatType::Chatroom, id)
    }

    pub fn event(id: ChatroomId) -> Self {
        Self::new(ChatType::Event, id)
    }

    pub fn meetup(id: ChatroomId) -> Self {
        Self::new(ChatType::Meetup, id)
    }

    pub fn direct_message(id: ChatroomId) -> Self {
        Self::new(ChatType::DirectMessage, id)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.chat_type {
            ChatType::Chatroom => "chatroom",
            ChatType::Event => "event",
            ChatType::Meetup => "meetup",
            ChatType::DirectMessage => "dm",
        };
        write!(f, "{}/{}", tag, self.chatroom_id)
    }
}

/// User information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: UserId,
    pub username: String,
}

/// Member role within a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular member
    Member,
    /// Channel admin (can mute/unmute members)
    Admin,
}

impl Role {
    pub fn can_moderate(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Roster entry carried in sync responses and member broadcasts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
    pub is_muted: bool,
    pub joined_at: u64,
}

/// Message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Regular user-authored message
    Text,
    /// Server-authored notice
    System,
}

/// One emoji and the set of users who reacted with it
///
/// Entries keep first-occurrence order, which is also the deterministic
/// rendering order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEntry {
    pub emoji: String,
    pub user_ids: Vec<UserId>,
}

/// A chat message as broadcast by the server
///
/// The id is server-assigned and strictly increasing within its channel;
/// everything except `reactions` is immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message ID, unique and ordered within the channel's stream
    pub id: MessageId,
    /// Channel this message belongs to
    pub channel: ChannelKey,
    /// Sender information
    pub sender: UserInfo,
    /// Message content
    pub content: String,
    /// Message kind
    pub kind: MessageKind,
    /// Message this one replies to (same channel), if any
    pub reply_to: Option<MessageId>,
    /// Per-emoji reaction sets, in first-occurrence order
    pub reactions: Vec<ReactionEntry>,
    /// Timestamp (Unix ms), server-assigned
    pub created_at: u64,
}

// =============================================================================
// Control Messages
// =============================================================================

/// Authentication request, first frame on every connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth {
    pub user_id: UserId,
    pub username: String,
}

/// Successful authentication response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSuccess {
    pub user_id: UserId,
    pub username: String,
    /// Session ID assigned to this connection
    pub session_id: String,
}

/// Authentication failure response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFailure {
    pub code: u32,
    pub message: String,
}

/// Ping message for keepalive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    /// Timestamp when ping was sent (for RTT measurement)
    pub timestamp: u64,
}

/// Pong response to Ping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {
    /// Echo back the timestamp from Ping
    pub timestamp: u64,
}

/// Graceful disconnect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goodbye {
    pub reason: String,
}

// =============================================================================
// Channel Commands - Client -> Server
// =============================================================================

/// Request the backfill window for a channel and subscribe to its
/// live stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHistory {
    pub channel: ChannelKey,
}

/// Author a new message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub channel: ChannelKey,
    pub content: String,
    /// Optional reply target, must exist in the same channel
    pub reply_to: Option<MessageId>,
}

/// Toggle the caller's membership in a message's reaction set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionToggle {
    pub channel: ChannelKey,
    pub message_id: MessageId,
    pub emoji: String,
}

/// Mute a member (admin only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mute {
    pub channel: ChannelKey,
    pub target_user_id: UserId,
    pub reason: Option<String>,
}

/// Unmute a member (admin only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unmute {
    pub channel: ChannelKey,
    pub target_user_id: UserId,
}

// =============================================================================
// Channel Events - Server -> Client
// =============================================================================

/// Backfill window plus roster, answering `SyncHistory`
///
/// Messages are the most recent N in reverse-chronological order; the
/// client reverses them into ascending order on adoption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub channel: ChannelKey,
    pub messages: Vec<ChatMessage>,
    pub members: Vec<MemberInfo>,
}

/// Authoritative reaction state for one message, answering a toggle
///
/// Always the entire recomputed list, never a delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionUpdate {
    pub channel: ChannelKey,
    pub message_id: MessageId,
    pub reactions: Vec<ReactionEntry>,
}

/// A member appeared in the channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberJoined {
    pub channel: ChannelKey,
    pub member: MemberInfo,
}

/// A member's connection left the channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberLeft {
    pub channel: ChannelKey,
    pub user_id: UserId,
}

/// A member was muted by an admin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberMuted {
    pub channel: ChannelKey,
    pub target_user_id: UserId,
    pub muted_by: UserId,
    pub reason: Option<String>,
}

/// A member was unmuted by an admin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberUnmuted {
    pub channel: ChannelKey,
    pub target_user_id: UserId,
    pub unmuted_by: UserId,
}

// =============================================================================
// Datagram Messages - Typing Presence
// =============================================================================

/// User started composing a message
///
/// Never persisted. The username is filled by the server on rebroadcast;
/// clients send it as None.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingStart {
    pub channel: ChannelKey,
    pub username: Option<String>,
}

/// User stopped composing a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingStop {
    pub channel: ChannelKey,
    pub username: Option<String>,
}

// =============================================================================
// Error Message
// =============================================================================

/// Error response surfaced to the sender; the session stays open
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemError {
    /// Error code (matches `ChatError::code`)
    pub code: u32,
    /// Human-readable error message
    pub message: String,
    /// Related entity (message id, channel, etc.)
    pub context: Option<String>,
}

impl SystemError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl From<&crate::error::ChatError> for SystemError {
    fn from(err: &crate::error::ChatError) -> Self {
        SystemError::new(err.code(), err.message())
    }
}
