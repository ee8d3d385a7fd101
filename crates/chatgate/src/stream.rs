//! Decoding of server-sent-event style completion streams into text tokens

use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use serde_json::Value;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::errors::ProviderError;

/// Payload marking the end of a completion stream
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data: ";
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// A lazy, single-pass sequence of text fragments
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    /// Nothing to emit for this line
    Skip,
    Token(String),
    Done,
}

/// Interpret one line of an event stream.
///
/// Only `data: ` lines carry payload. Fragments that are not valid JSON are reported as
/// [`ProviderError::MalformedStreamFragment`] so the caller can log and skip them.
pub fn decode_line(line: &str) -> Result<StreamLine, ProviderError> {
    let line = line.trim_end();
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(StreamLine::Skip);
    };

    if payload.trim() == DONE_SENTINEL {
        return Ok(StreamLine::Done);
    }

    let value: Value = serde_json::from_str(payload)
        .map_err(|e| ProviderError::MalformedStreamFragment(format!("{}: {}", e, payload)))?;

    match value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(token) if !token.is_empty() => Ok(StreamLine::Token(token.to_string())),
        _ => Ok(StreamLine::Skip),
    }
}

/// Turn a response body into tokens, yielding each one as soon as its line is complete.
///
/// The stream ends on the sentinel or when the body closes, whichever comes first.
pub fn decode_stream<S, E>(body: S) -> TokenStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let reader = StreamReader::new(body.map_err(std::io::Error::other));
    let mut lines = Box::pin(FramedRead::new(
        reader,
        LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
    ));

    Box::pin(async_stream::stream! {
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    yield Err(ProviderError::Transport(e.to_string()));
                    break;
                }
            };

            match decode_line(&line) {
                Ok(StreamLine::Token(token)) => yield Ok(token),
                Ok(StreamLine::Done) => {
                    debug!("stream end marker received");
                    break;
                }
                Ok(StreamLine::Skip) => {}
                Err(e) => warn!("skipping stream fragment: {}", e),
            }
        }
    })
}
