use rstomp_codec::error::{DecodeError, EncodeError};

#[derive(Debug, thiserror::Error)]
pub enum StompError {
    /// Frame decoding error
    #[error("Decoding error: {0:?}")]
    Decode(#[from] DecodeError),
    /// Frame encoding error
    #[error("Encoding error: {0:?}")]
    Encode(#[from] EncodeError),
    /// Read timeout
    #[error("Read timeout")]
    ReadTimeout,
    /// Write timeout
    #[error("Write timeout")]
    WriteTimeout,
    /// Flush timeout
    #[error("Flush timeout")]
    FlushTimeout,
    /// Close timeout
    #[error("Close timeout")]
    CloseTimeout,
}
