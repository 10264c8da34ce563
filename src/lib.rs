//! Real-time chat synchronization engine for community meetup platforms
//!
//! This library provides the live-delivery core shared by persistent
//! group chatrooms, time-bounded event/meetup chats, and direct
//! messages: one QUIC connection per active chat view, an authenticated
//! handshake, history backfill merged with the live stream, typing
//! presence, server-authoritative reactions, and admin moderation
//! enforced at message acceptance.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{ChatClient, ChatClientConfig, ClientEvent, ConnectionState};
pub use error::{ChatError, Result};
pub use protocol::messages::{ChannelKey, ChatMessage, ChatType, MessageId, UserId};
pub use server::{ChatServer, ServerConfig};

use std::time::{SystemTime, UNIX_EPOCH};

/// ALPN protocol identifier shared by server and client
pub const ALPN: &[u8] = b"huddle";

/// Get current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
