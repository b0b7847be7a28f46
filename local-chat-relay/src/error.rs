use std::io;

use thiserror::Error;

use crate::message::FRAME_SIZE;

/// Failures while moving frames across a stream.
///
/// `ShortRead`, `ShortWrite` and `Io` are transport faults and end the
/// connection. `UnknownKind` is a protocol fault: the frame arrived whole
/// and the stream is still aligned, so the caller may keep reading.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("short read: got {got} of {FRAME_SIZE} bytes")]
    ShortRead { got: usize },

    #[error("short write: wrote {written} of {FRAME_SIZE} bytes")]
    ShortWrite { written: usize },

    #[error("unknown frame kind {0}")]
    UnknownKind(u32),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl WireError {
    /// True when the connection can no longer be used.
    pub fn is_transport(&self) -> bool {
        !matches!(self, WireError::UnknownKind(_))
    }
}

#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("invalid session key '{0}': expected 6 letters or digits")]
    InvalidKey(String),

    #[error("no session found for key '{0}'")]
    UnknownSession(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
