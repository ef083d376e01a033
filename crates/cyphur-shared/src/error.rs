use thiserror::Error;

/// Errors produced while encoding or decoding wire frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame encode error: {0}")]
    Encode(#[source] bincode::Error),

    #[error("Frame decode error: {0}")]
    Decode(#[source] bincode::Error),

    #[error("Unsupported protocol version {0}")]
    Version(u8),

    #[error("Empty frame")]
    Empty,
}
