//! Line codec for the control channel.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length and
//! maps each line to a [`Command`]. The server writes through
//! [`CommandCodec::encode_line`]; the decoder side serves the mock client
//! and tests, which must cope with partial reads.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::command::Command;
use crate::{AppError, Result};

/// Maximum accepted inbound line length: 64 KiB.
pub const MAX_LINE_BYTES: usize = 65_536;

/// Newline-framed codec for [`Command`] lines.
#[derive(Debug)]
pub struct CommandCodec(LinesCodec);

impl CommandCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }

    /// Encode a command into a complete wire frame (line plus `\n`).
    ///
    /// # Errors
    ///
    /// Propagates `AppError::ProtocolViolation` from [`Command::encode`].
    pub fn encode_line(command: &Command) -> Result<Vec<u8>> {
        let mut line = command.encode()?.into_bytes();
        line.push(b'\n');
        Ok(line)
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CommandCodec {
    type Item = Command;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.0.decode(src).map_err(map_codec_error)? {
            Some(line) => Command::parse(&line).map(Some),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.0.decode_eof(src).map_err(map_codec_error)? {
            Some(line) if !line.is_empty() => Command::parse(&line).map(Some),
            _ => Ok(None),
        }
    }
}

impl Encoder<Command> for CommandCodec {
    type Error = AppError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<()> {
        let frame = Self::encode_line(&item)?;
        dst.reserve(frame.len());
        dst.put_slice(&frame);
        Ok(())
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => AppError::ProtocolViolation(format!(
            "line too long: exceeded {MAX_LINE_BYTES} bytes"
        )),
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
