//! Wire protocol: frames, message payloads, and codecs
//!
//! One persistent QUIC connection per active chat view carries every
//! ordered event on a single bidirectional control stream; typing
//! presence rides datagrams on the same connection.

pub mod codec;
pub mod frame;
pub mod messages;

pub use codec::{Decodable, DecodedFrame, Encodable};
pub use frame::{Frame, FrameCodec, FrameType, MAX_FRAME_SIZE};
