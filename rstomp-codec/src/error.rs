use std::io;

/// Errors which can occur while decoding bytes into frames.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),
    #[error("missing header/body separator")]
    MissingSeparator,
    #[error("max frame size exceeded")]
    MaxSizeExceeded,
    #[error("utf8 error")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("io error, {:?}", _0)]
    Io(io::Error),
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> DecodeError {
        DecodeError::Io(e)
    }
}

/// Errors which can occur while encoding frames to bytes.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("io error, {:?}", _0)]
    Io(io::Error),
}

impl From<io::Error> for EncodeError {
    fn from(e: io::Error) -> EncodeError {
        EncodeError::Io(e)
    }
}
