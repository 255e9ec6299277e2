//! Incremental decoders for the streaming wire formats.
//!
//! Both decoders are plain state machines fed with arbitrarily sized chunks;
//! [`ndjson_frames`] and [`sse_frames`] wrap them as lazy streams over a
//! chunked HTTP body. Every stream owns a fresh decoder.

/// Newline-delimited JSON.
pub mod ndjson;
/// Server-sent events.
pub mod sse;

pub use ndjson::{ndjson_frames, NdjsonDecoder};
pub use sse::{sse_frames, SseDecoder};

use futures_util::stream::{self, Stream, StreamExt};
use modelmux_core::LlmResult;
use std::collections::VecDeque;
use std::pin::Pin;

/// A push-style decoder turning byte chunks into frames.
pub trait FrameDecoder {
    /// One decoded unit of the wire protocol.
    type Frame;

    /// Feeds one chunk and returns every frame it completed, in order.
    fn decode(&mut self, chunk: &[u8]) -> Vec<LlmResult<Self::Frame>>;

    /// Flushes the trailing partial line once the body has ended.
    fn finish(&mut self) -> Option<LlmResult<Self::Frame>>;
}

struct FrameState<S, D: FrameDecoder> {
    bytes: Pin<Box<S>>,
    decoder: D,
    pending: VecDeque<LlmResult<D::Frame>>,
    done: bool,
}

/// Drives `decoder` over a chunked byte stream, lazily.
///
/// The stream ends after the first error, whether it came from the body or
/// from the decoder. Dropping the returned stream drops the body with it.
pub fn decode_frames<S, B, D>(bytes: S, decoder: D) -> impl Stream<Item = LlmResult<D::Frame>>
where
    S: Stream<Item = LlmResult<B>>,
    B: AsRef<[u8]>,
    D: FrameDecoder,
{
    let state = FrameState {
        bytes: Box::pin(bytes),
        decoder,
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if item.is_err() {
                    st.done = true;
                    st.pending.clear();
                }
                return Some((item, st));
            }
            if st.done {
                return None;
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    let frames = st.decoder.decode(chunk.as_ref());
                    st.pending.extend(frames);
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.done = true;
                    if let Some(item) = st.decoder.finish() {
                        st.pending.push_back(item);
                    }
                }
            }
        }
    })
}

/// Growable byte buffer that hands out complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Removes and returns the next complete line, without its `\n`.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        Some(line)
    }

    /// Removes and returns whatever is left after the last newline.
    pub fn take_rest(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}
