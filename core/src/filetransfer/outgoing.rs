//! Outgoing file transfer (sender side).

use super::state::FileTransferState;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

pub const CHUNK_SIZE: u64 = 1024;

#[derive(Debug)]
pub struct OutgoingTransfer {
    pub file_id: String,
    pub remote_user: String,
    pub path: PathBuf,
    pub mime_type: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub state: FileTransferState,
    pub bytes_sent: u64,
    pub created_at: u64,
}

pub fn total_chunks_for(size: u64) -> u32 {
    ((size + CHUNK_SIZE - 1) / CHUNK_SIZE) as u32
}

impl OutgoingTransfer {
    pub fn new(
        file_id: String,
        remote_user: String,
        path: PathBuf,
        mime_type: String,
        total_size: u64,
        created_at: u64,
    ) -> Self {
        let total_chunks = total_chunks_for(total_size);
        OutgoingTransfer {
            file_id,
            remote_user,
            path,
            mime_type,
            total_size,
            total_chunks,
            state: FileTransferState::Pending,
            bytes_sent: 0,
            created_at,
        }
    }

    pub fn accept(&mut self) {
        if self.state == FileTransferState::Pending {
            self.state = FileTransferState::InProgress;
        }
    }

    pub fn reject(&mut self) {
        self.state = FileTransferState::Cancelled;
    }

    /// Reads the bytes for `index` directly from disk — the transfer keeps
    /// no resident copy of the file, matching the spec's per-chunk read.
    pub fn read_chunk(&mut self, index: u32) -> io::Result<Vec<u8>> {
        let offset = index as u64 * CHUNK_SIZE;
        let remaining = self.total_size.saturating_sub(offset);
        let len = remaining.min(CHUNK_SIZE) as usize;

        let mut file = std::fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;

        self.bytes_sent += len as u64;
        if index + 1 == self.total_chunks {
            self.state = FileTransferState::Completed;
        }
        Ok(buf)
    }
}
