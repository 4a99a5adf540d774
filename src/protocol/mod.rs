//! RESP2 protocol implementation
//!
//! This module implements the subset of the Redis serialization protocol a
//! cache client needs: commands are arrays of bulk strings, replies may be any
//! RESP2 type.

pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use decode::decode_frame;
pub use encode::{encode_command, encode_frame};
pub use message::{Command, Frame};
