//! File transfer state machine: offer -> accept/reject -> chunking ->
//! reassembly. The largest subsystem in the protocol; split the same way
//! the reference WebRTC transfer code splits sender/receiver/state.

mod avatar;
mod incoming;
mod outgoing;
mod state;

pub use avatar::{validate as validate_avatar, AvatarError};
pub use incoming::{sanitize_filename, unique_download_path, IncomingTransfer};
pub use outgoing::{total_chunks_for, OutgoingTransfer, CHUNK_SIZE};
pub use state::FileTransferState;

use std::fmt;

#[derive(Debug)]
pub enum FileTransferError {
    Io(String),
    ChunkDecode(String),
    SizeMismatch { expected: u64, actual: u64 },
    UnknownTransfer(String),
    NotPending(String),
}

impl fmt::Display for FileTransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileTransferError::Io(e) => write!(f, "file I/O error: {}", e),
            FileTransferError::ChunkDecode(e) => write!(f, "chunk decode error: {}", e),
            FileTransferError::SizeMismatch { expected, actual } => write!(
                f,
                "size mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            FileTransferError::UnknownTransfer(id) => write!(f, "unknown file transfer: {}", id),
            FileTransferError::NotPending(id) => write!(f, "transfer {} is not pending", id),
        }
    }
}

impl std::error::Error for FileTransferError {}

impl From<std::io::Error> for FileTransferError {
    fn from(e: std::io::Error) -> Self {
        FileTransferError::Io(e.to_string())
    }
}
