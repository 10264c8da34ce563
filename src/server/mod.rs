//! Server-side chat engine
//!
//! The hub accepts QUIC connections, each wrapped in a session handler
//! that drives the auth handshake and frame routing; channel state
//! (message stream, roster, mutes) is the single source of truth every
//! client projection converges to.

pub mod channel;
pub mod chat_server;
pub mod directory;
pub mod session;

pub use channel::{Channel, ChannelAccess, ChannelRegistry, Member, MuteRecord};
pub use chat_server::{ChatServer, ServerConfig, ServerStats};
pub use directory::UserDirectory;
pub use session::{SessionCommand, SessionEvent, SessionHandler};
