//! Length-prefixed message framing codec.
//!
//! Messages are framed as:
//! - 4 bytes: big-endian message length
//! - N bytes: UTF-8 JSON body
//!
//! The codec only moves frames. Interpreting the body is left to
//! [`ChainMessage::decode`](super::ChainMessage::decode), so a malformed body
//! never tears down the stream.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_MESSAGE_SIZE;

/// Header size: 4 bytes length.
const HEADER_SIZE: usize = 4;

/// Errors raised while framing.
#[derive(Debug, Error)]
pub enum FrameError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame exceeds the size limit.
    #[error("Frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// Codec for length-prefixed message framing.
#[derive(Debug)]
pub struct FrameCodec {
    /// Expected length of the current frame (if header has been read).
    current_length: Option<usize>,
    max_frame: usize,
}

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        Self::with_max_frame(MAX_MESSAGE_SIZE)
    }

    /// Create a codec with a custom frame size limit.
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            current_length: None,
            max_frame,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        let length = match self.current_length {
            Some(length) => length,
            None => {
                if src.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let length = src.get_u32() as usize;
                if length > self.max_frame {
                    return Err(FrameError::TooLarge {
                        size: length,
                        max: self.max_frame,
                    });
                }

                self.current_length = Some(length);
                length
            }
        };

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        self.current_length = None;
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        let length = body.len();
        if length > self.max_frame {
            return Err(FrameError::TooLarge {
                size: length,
                max: self.max_frame,
            });
        }

        dst.reserve(HEADER_SIZE + length);
        dst.put_u32(length as u32);
        dst.put_slice(&body);

        Ok(())
    }
}
