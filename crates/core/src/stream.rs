//! Decoder for chat-completion event streams.
//!
//! The provider sends `data: <json>` lines and finishes with `data: [DONE]`. Callers get a
//! lazy stream of text fragments and never see line splitting or the sentinel.

use crate::error::ModelError;
use bytes::Bytes;
use futures::stream::{self, FusedStream};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, PartialEq)]
enum Frame {
    Fragment(String),
    Done,
    Skip,
}

/// Incremental line splitter. Bytes are buffered so multi-byte characters split across
/// chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Feeds a chunk and appends any completed fragments to `out`.
    /// Returns true once the end sentinel has been seen.
    pub fn push(&mut self, chunk: &[u8], out: &mut VecDeque<String>) -> bool {
        if self.done {
            return true;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.handle_line(&line, out) {
                self.buffer.clear();
                return true;
            }
        }
        false
    }

    /// Flushes a trailing line that arrived without a newline.
    pub fn finish(&mut self, out: &mut VecDeque<String>) {
        if self.done || self.buffer.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.buffer);
        self.handle_line(&line, out);
    }

    fn handle_line(&mut self, line: &[u8], out: &mut VecDeque<String>) -> bool {
        let line = String::from_utf8_lossy(line);
        match decode_line(&line) {
            Frame::Fragment(text) => out.push_back(text),
            Frame::Done => self.done = true,
            Frame::Skip => {}
        }
        self.done
    }
}

fn decode_line(line: &str) -> Frame {
    let line = line.trim_end_matches(['\n', '\r']);
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Skip;
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Frame::Done;
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Skipping malformed stream frame: {e}");
            return Frame::Skip;
        }
    };
    match value["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => Frame::Fragment(text.to_string()),
        _ => Frame::Skip,
    }
}

struct DecodeState<S> {
    body: Option<Pin<Box<S>>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
}

/// Turns a raw byte stream into a finite stream of text fragments.
///
/// The body is dropped as soon as the sentinel arrives, the transport ends or fails, or the
/// returned stream is dropped, whichever comes first. It is never polled again afterwards,
/// and polling the returned stream past its end keeps yielding `None`.
pub fn fragments<S, E>(body: S) -> impl FusedStream<Item = Result<String, ModelError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    let state = DecodeState {
        body: Some(Box::pin(body)),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.pending.pop_front() {
                return Some((Ok(fragment), state));
            }
            let body = state.body.as_mut()?;
            match body.next().await {
                Some(Ok(chunk)) => {
                    if state.decoder.push(&chunk, &mut state.pending) {
                        state.body = None;
                    }
                }
                Some(Err(e)) => {
                    state.body = None;
                    return Some((Err(ModelError::Transport(e.to_string())), state));
                }
                None => {
                    state.decoder.finish(&mut state.pending);
                    state.body = None;
                }
            }
        }
    })
    .fuse()
}

/// Push-style wrapper over [`fragments`]: calls `on_fragment` for each piece in arrival
/// order and returns the concatenated reply.
///
/// A failure after some text arrived is reported as [`ModelError::Interrupted`] carrying
/// everything delivered so far.
pub async fn decode_stream<S, E>(
    body: S,
    on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> Result<String, ModelError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    let mut full_response = String::new();
    let mut pieces = std::pin::pin!(fragments(body));

    while let Some(item) = pieces.next().await {
        match item {
            Ok(fragment) => {
                on_fragment(&fragment);
                full_response.push_str(&fragment);
            }
            Err(e) if full_response.is_empty() => return Err(e),
            Err(e) => {
                return Err(ModelError::Interrupted {
                    partial: full_response,
                    message: e.to_string(),
                });
            }
        }
    }
    Ok(full_response)
}
