//! Codec for encoding/decoding protocol messages to/from frames
//!
//! This module provides the bridge between typed messages and binary frames.

use super::frame::{Frame, FrameType};
use super::messages::*;
use bytes::Bytes;
use std::io::{self, Error as IoError, ErrorKind};

/// Trait for messages that can be encoded to frames
pub trait Encodable {
    /// Get the frame type for this message
    fn frame_type(&self) -> FrameType;

    /// Encode the message payload to bytes
    fn encode_payload(&self) -> io::Result<Bytes>;

    /// Encode the complete frame
    fn encode_frame(&self) -> io::Result<Frame> {
        Ok(Frame::new(self.frame_type(), self.encode_payload()?))
    }
}

/// Trait for messages that can be decoded from frames
pub trait Decodable: Sized {
    /// Expected frame type for this message
    fn expected_frame_type() -> FrameType;

    /// Decode the message from a payload
    fn decode_payload(payload: &[u8]) -> io::Result<Self>;

    /// Decode from a complete frame, validating the frame type
    fn decode_frame(frame: &Frame) -> io::Result<Self> {
        if frame.frame_type != Self::expected_frame_type() {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "Expected frame type {:?}, got {:?}",
                    Self::expected_frame_type(),
                    frame.frame_type
                ),
            ));
        }
        Self::decode_payload(&frame.payload)
    }
}

/// Helper macro to implement Encodable and Decodable for a message type
macro_rules! impl_codec {
    ($type:ty, $frame_type:expr) => {
        impl Encodable for $type {
            fn frame_type(&self) -> FrameType {
                $frame_type
            }

            fn encode_payload(&self) -> io::Result<Bytes> {
                serde_json::to_vec(self)
                    .map(Bytes::from)
                    .map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }

        impl Decodable for $type {
            fn expected_frame_type() -> FrameType {
                $frame_type
            }

            fn decode_payload(payload: &[u8]) -> io::Result<Self> {
                serde_json::from_slice(payload).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }
    };
}

// Control messages
impl_codec!(Auth, FrameType::Auth);
impl_codec!(AuthSuccess, FrameType::AuthSuccess);
impl_codec!(AuthFailure, FrameType::AuthFailure);
impl_codec!(Ping, FrameType::Ping);
impl_codec!(Pong, FrameType::Pong);
impl_codec!(Goodbye, FrameType::Goodbye);

// Channel commands
impl_codec!(SyncHistory, FrameType::SyncHistory);
impl_codec!(NewMessage, FrameType::NewMessage);
impl_codec!(ReactionToggle, FrameType::ReactionToggle);
impl_codec!(Mute, FrameType::Mute);
impl_codec!(Unmute, FrameType::Unmute);

// Channel events
impl_codec!(SyncResponse, FrameType::SyncResponse);
impl_codec!(ChatMessage, FrameType::MessageBroadcast);
impl_codec!(ReactionUpdate, FrameType::ReactionUpdate);
impl_codec!(MemberJoined, FrameType::MemberJoined);
impl_codec!(MemberLeft, FrameType::MemberLeft);
impl_codec!(MemberMuted, FrameType::MemberMuted);
impl_codec!(MemberUnmuted, FrameType::MemberUnmuted);

// Datagram messages
impl_codec!(TypingStart, FrameType::TypingStart);
impl_codec!(TypingStop, FrameType::TypingStop);

// Error message
impl_codec!(SystemError, FrameType::SystemError);

/// Decode any frame into a typed message enum
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    // Control
    Auth(Auth),
    AuthSuccess(AuthSuccess),
    AuthFailure(AuthFailure),
    Ping(Ping),
    Pong(Pong),
    Goodbye(Goodbye),

    // Channel commands
    SyncHistory(SyncHistory),
    NewMessage(NewMessage),
    ReactionToggle(ReactionToggle),
    Mute(Mute),
    Unmute(Unmute),

    // Channel events
    SyncResponse(SyncResponse),
    MessageBroadcast(ChatMessage),
    ReactionUpdate(ReactionUpdate),
    MemberJoined(MemberJoined),
    MemberLeft(MemberLeft),
    MemberMuted(MemberMuted),
    MemberUnmuted(MemberUnmuted),

    // Datagram
    TypingStart(TypingStart),
    TypingStop(TypingStop),

    // Error
    SystemError(SystemError),
}

impl DecodedFrame {
    /// Decode a frame into a typed message
    pub fn decode(frame: &Frame) -> io::Result<Self> {
        let payload = &frame.payload;

        match frame.frame_type {
            FrameType::Auth => Ok(Self::Auth(serde_json::from_slice(payload)?)),
            FrameType::AuthSuccess => Ok(Self::AuthSuccess(serde_json::from_slice(payload)?)),
            FrameType::AuthFailure => Ok(Self::AuthFailure(serde_json::from_slice(payload)?)),
            FrameType::Ping => Ok(Self::Ping(serde_json::from_slice(payload)?)),
            FrameType::Pong => Ok(Self::Pong(serde_json::from_slice(payload)?)),
            FrameType::Goodbye => Ok(Self::Goodbye(serde_json::from_slice(payload)?)),

            FrameType::SyncHistory => Ok(Self::SyncHistory(serde_json::from_slice(payload)?)),
            FrameType::NewMessage => Ok(Self::NewMessage(serde_json::from_slice(payload)?)),
            FrameType::ReactionToggle => Ok(Self::ReactionToggle(serde_json::from_slice(payload)?)),
            FrameType::Mute => Ok(Self::Mute(serde_json::from_slice(payload)?)),
            FrameType::Unmute => Ok(Self::Unmute(serde_json::from_slice(payload)?)),

            FrameType::SyncResponse => Ok(Self::SyncResponse(serde_json::from_slice(payload)?)),
            FrameType::MessageBroadcast => {
                Ok(Self::MessageBroadcast(serde_json::from_slice(payload)?))
            }
            FrameType::ReactionUpdate => Ok(Self::ReactionUpdate(serde_json::from_slice(payload)?)),
            FrameType::MemberJoined => Ok(Self::MemberJoined(serde_json::from_slice(payload)?)),
            FrameType::MemberLeft => Ok(Self::MemberLeft(serde_json::from_slice(payload)?)),
            FrameType::MemberMuted => Ok(Self::MemberMuted(serde_json::from_slice(payload)?)),
            FrameType::MemberUnmuted => Ok(Self::MemberUnmuted(serde_json::from_slice(payload)?)),

            FrameType::TypingStart => Ok(Self::TypingStart(serde_json::from_slice(payload)?)),
            FrameType::TypingStop => Ok(Self::TypingStop(serde_json::from_slice(payload)?)),

            FrameType::SystemError => Ok(Self::SystemError(serde_json::from_slice(payload)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_auth() {
        let auth = Auth {
            user_id: 7,
            username: "alice".to_string(),
        };

        let frame = auth.encode_frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::Auth);

        let decoded = Auth::decode_frame(&frame).unwrap();
        assert_eq!(decoded.user_id, 7);
        assert_eq!(decoded.username, "alice");
    }

    #[test]
    fn test_decode_frame_type_mismatch() {
        let ping = Ping { timestamp: 1 };
        let frame = ping.encode_frame().unwrap();

        let result = Pong::decode_frame(&frame);
        assert!(result.is_err());
    }

    #[test]
    fn test_decoded_frame_dispatch() {
        let toggle = ReactionToggle {
            channel: ChannelKey::chatroom(42),
            message_id: 101,
            emoji: "❤️".to_string(),
        };
        let frame = toggle.encode_frame().unwrap();

        match DecodedFrame::decode(&frame).unwrap() {
            DecodedFrame::ReactionToggle(msg) => {
                assert_eq!(msg.message_id, 101);
                assert_eq!(msg.emoji, "❤️");
            }
            other => panic!("Unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decoded_frame_rejects_garbage_payload() {
        let frame = Frame::new(FrameType::SyncResponse, "not json");
        assert!(DecodedFrame::decode(&frame).is_err());
    }
}
