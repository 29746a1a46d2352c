//! Crate-wide error type.
//!
//! Each component defines its own narrow error enum (see `codec`, `token`,
//! `transport`, `filetransfer`); this module only wraps them so `Controller`
//! methods can return a single type to callers.

use std::fmt;

#[derive(Debug)]
pub enum LsnpError {
    Transport(crate::transport::TransportError),
    FileTransfer(crate::filetransfer::FileTransferError),
    UnknownPeer(String),
    AmbiguousHandle(String),
    RetryExhausted,
    Rejected(String),
    InvalidInput(String),
}

impl fmt::Display for LsnpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LsnpError::Transport(e) => write!(f, "transport error: {}", e),
            LsnpError::FileTransfer(e) => write!(f, "file transfer error: {}", e),
            LsnpError::UnknownPeer(h) => write!(f, "unknown peer: {}", h),
            LsnpError::AmbiguousHandle(h) => write!(f, "ambiguous handle: {}", h),
            LsnpError::RetryExhausted => write!(f, "no ACK received after all retries"),
            LsnpError::Rejected(reason) => write!(f, "rejected: {}", reason),
            LsnpError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
        }
    }
}

impl std::error::Error for LsnpError {}

impl From<crate::transport::TransportError> for LsnpError {
    fn from(e: crate::transport::TransportError) -> Self {
        LsnpError::Transport(e)
    }
}

impl From<crate::filetransfer::FileTransferError> for LsnpError {
    fn from(e: crate::filetransfer::FileTransferError) -> Self {
        LsnpError::FileTransfer(e)
    }
}

pub type Result<T> = std::result::Result<T, LsnpError>;
