//! Byte and frame stream types

use async_stream::stream;
use futures::StreamExt;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::{decoder::FrameDecoder, error::Result, frame::Frame};

/// Raw response body chunks, in arrival order
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Decoded frames, in arrival order
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Decode a response body into frames.
///
/// Malformed frames are dropped by the decoder; a transport error is
/// yielded once and ends the stream. A trailing unterminated line is
/// decoded when the body ends.
pub fn decode_frames(mut bytes: ByteStream) -> FrameStream {
    Box::pin(stream! {
        let mut decoder = FrameDecoder::new();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for frame in decoder.push(&chunk) {
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        for frame in decoder.finish() {
            yield Ok(frame);
        }
    })
}
