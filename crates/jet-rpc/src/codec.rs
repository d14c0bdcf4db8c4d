//! Length-prefixed text frame codec.
//!
//! The peer engine deals in whole text frames. Over a byte stream each frame
//! is delimited with a 4-byte big-endian length prefix:
//! ```text
//! +----------------+------------------+
//! |  4 bytes       |  N bytes         |
//! |  (length BE)   |  (UTF-8 JSON)    |
//! +----------------+------------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum frame size (16 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes
const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec for length-prefixed UTF-8 text frames
#[derive(Debug)]
pub struct TextFrameCodec {
    max_frame_size: usize,
    current_length: Option<usize>,
}

impl TextFrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u32::MAX as usize),
            current_length: None,
        }
    }
}

impl Default for TextFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TextFrameCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.current_length.is_none() {
            if src.len() < LENGTH_PREFIX_SIZE {
                return Ok(None);
            }

            let len = src.get_u32() as usize;

            if len > self.max_frame_size {
                return Err(CodecError::FrameTooLarge {
                    size: len,
                    max: self.max_frame_size,
                });
            }

            self.current_length = Some(len);
        }

        let Some(length) = self.current_length else {
            return Ok(None);
        };

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let payload = src.split_to(length);
        self.current_length = None;

        let text = std::str::from_utf8(&payload)?;
        Ok(Some(text.to_owned()))
    }
}

impl Encoder<String> for TextFrameCodec {
    type Error = CodecError;

    // Frame size is checked against max_frame_size, which is clamped to u32
    #[allow(clippy::cast_possible_truncation)]
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item.as_bytes();

        if bytes.len() > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: bytes.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + bytes.len());
        dst.put_u32(bytes.len() as u32);
        dst.put_slice(bytes);

        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}
