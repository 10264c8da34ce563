//! Error handling for the chat engine

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat engine error types
#[derive(Debug, Clone)]
pub enum ChatError {
    /// Missing or invalid identity at the handshake
    Authentication(String),
    /// Muted sender, non-member, or expired channel
    Authorization(String),
    /// Empty message content, malformed payload
    Validation(String),
    /// Socket closed or failed mid-operation
    Transport(String),
    /// Referenced channel, message, or member missing
    NotFound(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Protocol violations (unexpected frame, bad state)
    Protocol(String),
    /// Server internal error
    Internal(String),
    /// Configuration error
    Config(String),
    /// Timeout error
    Timeout(String),
    /// Resource limit exceeded
    ResourceLimit(String),
}

impl ChatError {
    /// Get the wire error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            ChatError::Authentication(_) => 1000,
            ChatError::Authorization(_) => 1001,
            ChatError::Validation(_) => 1002,
            ChatError::Transport(_) => 1003,
            ChatError::NotFound(_) => 1004,
            ChatError::Serialization(_) => 1005,
            ChatError::Protocol(_) => 1006,
            ChatError::Internal(_) => 1007,
            ChatError::Config(_) => 1008,
            ChatError::Timeout(_) => 1009,
            ChatError::ResourceLimit(_) => 1010,
        }
    }

    /// Get the human-readable error message
    pub fn message(&self) -> &str {
        match self {
            ChatError::Authentication(msg) => msg,
            ChatError::Authorization(msg) => msg,
            ChatError::Validation(msg) => msg,
            ChatError::Transport(msg) => msg,
            ChatError::NotFound(msg) => msg,
            ChatError::Serialization(msg) => msg,
            ChatError::Protocol(msg) => msg,
            ChatError::Internal(msg) => msg,
            ChatError::Config(msg) => msg,
            ChatError::Timeout(msg) => msg,
            ChatError::ResourceLimit(msg) => msg,
        }
    }

    /// Create an authentication error
    pub fn authentication<T: Into<String>>(msg: T) -> Self {
        ChatError::Authentication(msg.into())
    }

    /// Create an authorization error
    pub fn authorization<T: Into<String>>(msg: T) -> Self {
        ChatError::Authorization(msg.into())
    }

    /// Create a validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        ChatError::Validation(msg.into())
    }

    /// Create a transport error
    pub fn transport<T: Into<String>>(msg: T) -> Self {
        ChatError::Transport(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        ChatError::NotFound(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        ChatError::Serialization(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        ChatError::Protocol(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ChatError::Internal(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        ChatError::Timeout(msg.into())
    }

    /// Create a resource limit error
    pub fn resource_limit<T: Into<String>>(msg: T) -> Self {
        ChatError::ResourceLimit(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Authentication(msg) => write!(f, "Authentication error: {}", msg),
            ChatError::Authorization(msg) => write!(f, "Authorization error: {}", msg),
            ChatError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ChatError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ChatError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ChatError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ChatError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ChatError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ChatError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ChatError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ChatError::ResourceLimit(msg) => write!(f, "Resource limit exceeded: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Transport(format!("IO error: {}", err))
    }
}

impl From<quinn::ConnectError> for ChatError {
    fn from(err: quinn::ConnectError) -> Self {
        ChatError::Transport(format!("QUIC connect error: {}", err))
    }
}

impl From<quinn::ConnectionError> for ChatError {
    fn from(err: quinn::ConnectionError) -> Self {
        ChatError::Transport(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ReadError> for ChatError {
    fn from(err: quinn::ReadError) -> Self {
        ChatError::Transport(format!("QUIC read error: {}", err))
    }
}

impl From<quinn::WriteError> for ChatError {
    fn from(err: quinn::WriteError) -> Self {
        ChatError::Transport(format!("QUIC write error: {}", err))
    }
}

impl From<quinn::ClosedStream> for ChatError {
    fn from(err: quinn::ClosedStream) -> Self {
        ChatError::Transport(format!("Stream closed: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ChatError::authentication("x").code(), 1000);
        assert_eq!(ChatError::authorization("x").code(), 1001);
        assert_eq!(ChatError::validation("x").code(), 1002);
        assert_eq!(ChatError::transport("x").code(), 1003);
        assert_eq!(ChatError::not_found("x").code(), 1004);
    }

    #[test]
    fn test_display_includes_message() {
        let err = ChatError::authorization("you are muted in this chatroom");
        assert_eq!(
            err.to_string(),
            "Authorization error: you are muted in this chatroom"
        );
        assert_eq!(err.message(), "you are muted in this chatroom");
    }
}
