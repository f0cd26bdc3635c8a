//! Wire protocol shared by the hub and the edge devices.
//!
//! This crate provides:
//! - Channel identifiers for device categories
//! - The decoded `Message` type
//! - JSON encode/decode for a single frame
//! - An incremental `FrameDecoder` for back-to-back JSON objects on a stream

mod channel;
mod codec;
mod error;
mod frame;
mod message;

pub use channel::Channel;
pub use codec::{decode, encode};
pub use error::DecodeError;
pub use frame::{FrameDecoder, DEFAULT_MAX_FRAME_LEN};
pub use message::{Message, CAMERA_ID_FIELD, MEMBER_ID_FIELD};
