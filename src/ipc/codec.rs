//! NDJSON codec for canvas envelopes.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length and decodes each complete line into a typed [`Envelope`].
//!
//! Malformed input never ends the stream: a line that is too long, is not
//! UTF-8, is not JSON, or lacks a string `type` field is surfaced as
//! [`Decoded::Malformed`] and decoding continues with the next line. Only
//! errors from the underlying transport are returned as `Err`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use canvas_spawn::ipc::codec::EnvelopeCodec;
//! use canvas_spawn::ipc::message::CanvasMessage;
//!
//! let reader = FramedRead::new(recv_half, EnvelopeCodec::<CanvasMessage>::new());
//! ```

use std::io::ErrorKind;
use std::marker::PhantomData;

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::ipc::message::Envelope;
use crate::{AppError, Result};

/// Maximum line length accepted by the decoder: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One decoded frame.
#[derive(Debug)]
pub enum Decoded<M> {
    /// A well-formed envelope.
    Message(M),
    /// A line that could not be decoded; the stream continues.
    Malformed(AppError),
}

/// Line-framed JSON codec decoding inbound envelopes of type `M`.
///
/// Encoding accepts any [`Envelope`], so one codec serves a full-duplex
/// stream whose two directions carry different envelope types.
#[derive(Debug)]
pub struct EnvelopeCodec<M> {
    lines: LinesCodec,
    _inbound: PhantomData<fn() -> M>,
}

impl<M> EnvelopeCodec<M> {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max),
            _inbound: PhantomData,
        }
    }
}

impl<M> Default for EnvelopeCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Envelope> EnvelopeCodec<M> {
    fn next_frame(
        &mut self,
        src: &mut BytesMut,
        at_eof: bool,
    ) -> std::result::Result<Option<Decoded<M>>, AppError> {
        loop {
            let line = if at_eof {
                self.lines.decode_eof(src)
            } else {
                self.lines.decode(src)
            };

            match line {
                Ok(Some(line)) => match parse_line::<M>(&line) {
                    Ok(Some(message)) => return Ok(Some(Decoded::Message(message))),
                    Ok(None) => {}
                    Err(err) => return Ok(Some(Decoded::Malformed(err))),
                },
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    return Ok(Some(Decoded::Malformed(AppError::Codec(format!(
                        "line too long: exceeded {} bytes",
                        self.lines.max_length()
                    )))));
                }
                Err(LinesCodecError::Io(err)) if err.kind() == ErrorKind::InvalidData => {
                    return Ok(Some(Decoded::Malformed(AppError::Codec(format!(
                        "invalid utf-8: {err}"
                    )))));
                }
                Err(LinesCodecError::Io(err)) => return Err(AppError::Io(err.to_string())),
            }
        }
    }
}

impl<M: Envelope> Decoder for EnvelopeCodec<M> {
    type Item = Decoded<M>;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.next_frame(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.next_frame(src, true)
    }
}

impl<M, O: Envelope> Encoder<O> for EnvelopeCodec<M> {
    type Error = AppError;

    fn encode(&mut self, item: O, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(to_line(&item).as_bytes());
        Ok(())
    }
}

/// Serialise an envelope as one `\n`-terminated JSON line.
#[must_use]
pub fn to_line<E: Envelope>(envelope: &E) -> String {
    let mut line = serde_json::to_string(envelope).unwrap_or_else(|err| {
        debug!(%err, tag = envelope.tag(), "envelope serialisation failed");
        r#"{"type":"unknown"}"#.to_owned()
    });
    line.push('\n');
    line
}

/// Parse a single line into an envelope.
///
/// # Return value
///
/// - `Ok(Some(envelope))` for a well-formed envelope, including
///   unrecognised tags which decode to the `Unknown` variant.
/// - `Ok(None)` for an empty or whitespace-only line.
///
/// # Errors
///
/// Returns [`AppError::Codec`] if the line is not a JSON object, has no
/// string `type` field, or a known tag is missing a required field.
pub fn parse_line<M: Envelope>(line: &str) -> Result<Option<M>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|err| AppError::Codec(format!("malformed json: {err}")))?;

    let Some(tag) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Err(AppError::Codec("missing string field `type`".into()));
    };

    let envelope: M = serde_json::from_value(value)
        .map_err(|err| AppError::Codec(format!("invalid `{tag}` envelope: {err}")))?;

    if envelope.is_unknown() {
        debug!(tag, "unrecognised envelope type");
    }

    Ok(Some(envelope))
}

/// Drain every complete envelope from `buf`.
///
/// Partial trailing bytes stay in `buf` until more data arrives.
/// `on_error` is invoked once per line that fails to decode; decoding then
/// resumes with the following line.
pub fn decode_buffer<M, F>(codec: &mut EnvelopeCodec<M>, buf: &mut BytesMut, mut on_error: F) -> Vec<M>
where
    M: Envelope,
    F: FnMut(AppError),
{
    let mut decoded = Vec::new();
    loop {
        match codec.decode(buf) {
            Ok(Some(Decoded::Message(message))) => decoded.push(message),
            Ok(Some(Decoded::Malformed(err))) => on_error(err),
            Err(err) => {
                on_error(err);
                break;
            }
            Ok(None) => break,
        }
    }
    decoded
}
