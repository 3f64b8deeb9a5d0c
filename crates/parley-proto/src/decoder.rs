//! Incremental decoder for `data: <json>` framed response bodies

use crate::frame::{Frame, expand};

const DATA_PREFIX: &[u8] = b"data:";

/// Turns arbitrarily split byte chunks into complete frames.
///
/// Buffering is byte-based, so a multi-byte character split across two
/// chunks is only decoded once its line is complete. The only state is the
/// trailing partial line; use a fresh decoder (or [`FrameDecoder::reset`])
/// per stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and collect every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            decode_line(&self.buffer[start..end], &mut frames);
            start = end + 1;
        }
        self.buffer.drain(..start);

        frames
    }

    /// Flush a trailing line that the stream ended without terminating
    pub fn finish(&mut self) -> Vec<Frame> {
        let rest = std::mem::take(&mut self.buffer);
        let mut frames = Vec::new();
        decode_line(&rest, &mut frames);
        frames
    }

    /// Number of buffered bytes waiting for a newline
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any buffered partial line
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

fn decode_line(line: &[u8], frames: &mut Vec<Frame>) {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    // Blank separators, comments and other SSE fields carry no payload
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return;
    };
    let payload = payload.strip_prefix(b" ").unwrap_or(payload);

    match std::str::from_utf8(payload) {
        Ok(text) => frames.extend(expand(text)),
        Err(e) => tracing::trace!("Dropping frame with invalid UTF-8: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageId;

    fn answer(content: &str) -> Frame {
        Frame::Answer {
            content: content.into(),
            done: false,
        }
    }

    const BODY: &str = concat!(
        "data: {\"type\": \"thinking\", \"step\": {\"content\": \"step1\"}}\n\n",
        "data: {\"content\": \"Grüße \u{1F600}\"}\n\n",
        "data: {\"content\": \" there\"}\r\n\r\n",
        "data: {\"type\": \"done\", \"message_id\": \"srv-9\"}\n\n",
    );

    fn expected() -> Vec<Frame> {
        vec![
            Frame::Thinking {
                content: "step1".into(),
            },
            answer("Grüße \u{1F600}"),
            answer(" there"),
            Frame::Done {
                message_id: Some(MessageId::server("srv-9")),
            },
        ]
    }

    fn decode_in_chunks(body: &[u8], boundaries: &[usize]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        let mut last = 0;
        for &b in boundaries {
            frames.extend(decoder.push(&body[last..b]));
            last = b;
        }
        frames.extend(decoder.push(&body[last..]));
        frames.extend(decoder.finish());
        frames
    }

    #[test]
    fn test_whole_body() {
        assert_eq!(decode_in_chunks(BODY.as_bytes(), &[]), expected());
    }

    #[test]
    fn test_every_single_split_point() {
        let body = BODY.as_bytes();
        for split in 0..=body.len() {
            assert_eq!(
                decode_in_chunks(body, &[split]),
                expected(),
                "split at byte {split}"
            );
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let body = BODY.as_bytes();
        let boundaries: Vec<usize> = (1..body.len()).collect();
        assert_eq!(decode_in_chunks(body, &boundaries), expected());
    }

    #[test]
    fn test_partial_line_is_buffered() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"content\": \"H").is_empty());
        assert!(decoder.pending() > 0);
        assert_eq!(decoder.push(b"i\"}\n"), vec![answer("Hi")]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_unterminated_last_line_flushed_on_finish() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"done\": true}").is_empty());
        assert_eq!(decoder.finish(), vec![Frame::Done { message_id: None }]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_malformed_frame_does_not_stop_decoding() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: {broken\ndata: {\"content\": \"ok\"}\n");
        assert_eq!(frames, vec![answer("ok")]);
    }

    #[test]
    fn test_non_data_lines_are_skipped() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b": keep-alive\nevent: message\nid: 4\n\ndata:{\"content\": \"x\"}\n");
        assert_eq!(frames, vec![answer("x")]);
    }

    #[test]
    fn test_invalid_utf8_line_is_dropped() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: \xff\xfe\ndata: {\"content\": \"y\"}\n");
        assert_eq!(frames, vec![answer("y")]);
    }

    #[test]
    fn test_done_fragment_with_id_expands() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: {\"content\": \"end\", \"done\": true, \"message_id\": 5}\n");
        assert_eq!(
            frames,
            vec![
                Frame::Answer {
                    content: "end".into(),
                    done: true
                },
                Frame::MessageId {
                    id: MessageId::server("5")
                },
            ]
        );
    }

    #[test]
    fn test_reset_drops_partial() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: {\"content\"");
        decoder.reset();
        assert!(decoder.finish().is_empty());
    }
}
