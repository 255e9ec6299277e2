use super::{decode_frames, FrameDecoder, LineBuffer};
use futures_util::stream::Stream;
use modelmux_core::LlmResult;

const DATA_PREFIX: &str = "data:";

/// Decoder for `data:`-prefixed event frames.
///
/// Only `data:` lines carry payload; comments, `event:`/`id:` fields and
/// blank separators are dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    lines: LineBuffer,
}

impl SseDecoder {
    /// Creates a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    line.trim()
        .strip_prefix(DATA_PREFIX)
        .map(|data| data.trim().to_string())
}

impl FrameDecoder for SseDecoder {
    type Frame = String;

    fn decode(&mut self, chunk: &[u8]) -> Vec<LlmResult<String>> {
        self.lines.push(chunk);
        let mut frames = Vec::new();
        while let Some(line) = self.lines.next_line() {
            if let Some(data) = data_payload(&line) {
                frames.push(Ok(data));
            }
        }
        frames
    }

    fn finish(&mut self) -> Option<LlmResult<String>> {
        data_payload(&self.lines.take_rest()).map(Ok)
    }
}

/// Lazily decodes a chunked body into `data:` payloads.
pub fn sse_frames<S, B>(bytes: S) -> impl Stream<Item = LlmResult<String>>
where
    S: Stream<Item = LlmResult<B>>,
    B: AsRef<[u8]>,
{
    decode_frames(bytes, SseDecoder::new())
}
