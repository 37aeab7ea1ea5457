#![deny(unsafe_code)]

//! Text frame codec for the rstomp protocol
//!
//! ## Core Features:
//! - **Incremental Decoding**: bytes accumulate until the null terminator
//!   completes a frame; partial input never fails, it just waits
//! - **Exact Round-Trip**: encoding a decoded frame reproduces the input
//!   bytes, header order and body included
//! - **Tokio Integration**: compatibility with the Tokio runtime via
//!   `tokio_util::codec`
//! - **Size Limits**: optional cap on frame length (0 means unlimited)
//!
//! ## Architecture Components:
//! - `Codec`: terminator-scanning decoder / grammar-driven encoder
//! - `Frame`: one protocol message (command, ordered headers, body)
//! - Error handling with dedicated `EncodeError`/`DecodeError` types

/// Error types for encoding/decoding operations
pub mod error;

mod frame;

pub use frame::{Command, Frame};

use bytes::BytesMut;

use crate::error::{DecodeError, EncodeError};

/// Frame codec over a null-terminated text wire format
///
/// ```text
/// <COMMAND>\n
/// (<key>:<value>\n)*
/// \n
/// <body>
/// \0
/// ```
///
/// One instance serves a whole connection: the buffer resets after every
/// complete frame and the scan position is remembered between polls so
/// chunked arrival costs no rescans.
#[derive(Debug, Clone)]
pub struct Codec {
    scanned: usize,
    max_size: u32,
}

impl Codec {
    /// Create `Codec` instance
    pub fn new(max_frame_size: u32) -> Self {
        Codec { scanned: 0, max_size: max_frame_size }
    }

    /// Set max inbound frame size.
    ///
    /// If max size is set to `0`, size is unlimited.
    /// By default max size is set to `0`
    pub fn set_max_size(&mut self, size: u32) {
        self.max_size = size;
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(0)
    }
}

impl tokio_util::codec::Decoder for Codec {
    type Item = Frame;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, DecodeError> {
        let Some(at) = src[self.scanned..].iter().position(|b| *b == 0) else {
            if self.max_size != 0 && src.len() as u32 > self.max_size {
                return Err(DecodeError::MaxSizeExceeded);
            }
            self.scanned = src.len();
            src.reserve(1);
            return Ok(None);
        };
        let end = self.scanned + at;
        if self.max_size != 0 && end as u32 > self.max_size {
            return Err(DecodeError::MaxSizeExceeded);
        }
        let raw = src.split_to(end + 1);
        self.scanned = 0;
        let text = std::str::from_utf8(&raw[..end])?;
        Frame::parse(text).map(Some)
    }
}

impl tokio_util::codec::Encoder<Frame> for Codec {
    type Error = EncodeError;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), EncodeError> {
        item.write(dst);
        Ok(())
    }
}
