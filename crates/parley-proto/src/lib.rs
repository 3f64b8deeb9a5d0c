//! parley-proto: wire protocol and transport for parley chat sessions
//!
//! This crate provides the session/message data model, the `data:` frame
//! decoder used by streaming replies, and the [`Backend`] trait with its
//! HTTP implementation.

pub mod backend;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod stream;
pub mod types;

pub use backend::{Backend, HttpBackend};
pub use decoder::FrameDecoder;
pub use error::{Error, Result};
pub use frame::Frame;
pub use stream::{ByteStream, FrameStream, decode_frames};
pub use types::*;
