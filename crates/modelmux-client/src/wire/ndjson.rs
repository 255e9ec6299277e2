use super::{decode_frames, FrameDecoder, LineBuffer};
use futures_util::stream::Stream;
use modelmux_core::{LlmError, LlmResult};
use serde_json::Value;

/// Decoder for newline-delimited JSON: one JSON value per physical line.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    lines: LineBuffer,
}

impl NdjsonDecoder {
    /// Creates a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }
}

fn parse_line(line: &[u8]) -> Option<LlmResult<Value>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_slice(line).map_err(|e| {
        LlmError::Parse(format!(
            "invalid NDJSON line {:?}: {e}",
            String::from_utf8_lossy(line)
        ))
    }))
}

impl FrameDecoder for NdjsonDecoder {
    type Frame = Value;

    fn decode(&mut self, chunk: &[u8]) -> Vec<LlmResult<Value>> {
        self.lines.push(chunk);
        let mut frames = Vec::new();
        while let Some(line) = self.lines.next_line() {
            if let Some(frame) = parse_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn finish(&mut self) -> Option<LlmResult<Value>> {
        parse_line(&self.lines.take_rest())
    }
}

/// Lazily decodes a chunked body into JSON objects.
pub fn ndjson_frames<S, B>(bytes: S) -> impl Stream<Item = LlmResult<Value>>
where
    S: Stream<Item = LlmResult<B>>,
    B: AsRef<[u8]>,
{
    decode_frames(bytes, NdjsonDecoder::new())
}
