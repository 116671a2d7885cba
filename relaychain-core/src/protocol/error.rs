use std::io;
use thiserror::Error;

/// Framing and request-shape errors; any of these ends the session
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Transport error: {0}")]
    Io(#[from] io::Error),

    /// Declared length exceeds the limit for the field being read
    #[error("{field} frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// Peer went away partway through a frame or a multi-frame request
    #[error("Connection closed while reading {field}")]
    Truncated { field: &'static str },

    #[error("Empty {0} field")]
    EmptyField(&'static str),

    #[error("Invalid username: {0}")]
    InvalidUsername(String),
}

impl ProtocolError {
    /// True when the peer is gone and no reply can be delivered
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Truncated { .. } => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
