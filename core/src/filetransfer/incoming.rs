//! Incoming file transfer (receiver side).

use super::state::FileTransferState;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct IncomingTransfer {
    pub file_id: String,
    pub remote_user: String,
    pub filename: String,
    pub mime_type: String,
    pub description: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub state: FileTransferState,
    pub save_path: Option<PathBuf>,
    pub received_bytes: u64,
    pub created_at: u64,
    pub completed_at: Option<u64>,
    chunks: HashMap<u32, Vec<u8>>,
}

impl IncomingTransfer {
    pub fn new(
        file_id: String,
        remote_user: String,
        filename: String,
        mime_type: String,
        description: String,
        total_size: u64,
        total_chunks: u32,
        created_at: u64,
    ) -> Self {
        IncomingTransfer {
            file_id,
            remote_user,
            filename,
            mime_type,
            description,
            total_size,
            total_chunks,
            state: FileTransferState::Pending,
            save_path: None,
            received_bytes: 0,
            created_at,
            completed_at: None,
            chunks: HashMap::new(),
        }
    }

    /// Moves `Pending` into `InProgress` and records the destination,
    /// uniquified against `downloads_dir` so an existing file of the same
    /// sanitized name is never overwritten.
    pub fn accept(&mut self, downloads_dir: &Path) -> PathBuf {
        let path = unique_download_path(downloads_dir, &self.filename);
        self.save_path = Some(path.clone());
        self.state = FileTransferState::InProgress;
        path
    }

    pub fn reject(&mut self) {
        self.state = FileTransferState::Cancelled;
    }

    /// Stores chunk `index`, ignoring it if the transfer is not
    /// `InProgress`, the index is out of range, or the index was already
    /// seen. Returns `true` once every chunk has arrived.
    pub fn receive_chunk(&mut self, index: u32, data: Vec<u8>) -> bool {
        if self.state != FileTransferState::InProgress {
            return false;
        }
        if index >= self.total_chunks {
            return false;
        }
        if self.chunks.contains_key(&index) {
            return self.chunks.len() as u32 == self.total_chunks;
        }

        self.received_bytes += data.len() as u64;
        self.chunks.insert(index, data);
        self.chunks.len() as u32 == self.total_chunks
    }

    /// Concatenates chunks in index order and writes the file. Marks the
    /// transfer `Completed` on success, `Failed` on I/O error.
    pub fn finalize(&mut self, completed_at: u64) -> io::Result<PathBuf> {
        let save_path = self.save_path.clone().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "transfer has no save path")
        })?;

        let result = (|| -> io::Result<()> {
            let mut file = std::fs::File::create(&save_path)?;
            for index in 0..self.total_chunks {
                let data = self
                    .chunks
                    .get(&index)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing chunk"))?;
                file.write_all(data)?;
            }
            file.flush()
        })();

        match result {
            Ok(()) => {
                self.state = FileTransferState::Completed;
                self.completed_at = Some(completed_at);
                Ok(save_path)
            }
            Err(e) => {
                self.state = FileTransferState::Failed;
                Err(e)
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.len() as u32 == self.total_chunks
    }
}

/// Appends `_1`, `_2`, ... before the extension until the path doesn't
/// already exist, mirroring a shell's "Save As" collision handling.
pub fn unique_download_path(dir: &Path, filename: &str) -> PathBuf {
    let sanitized = sanitize_filename(filename);
    let candidate = dir.join(&sanitized);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(&sanitized);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path.extension().map(|s| s.to_string_lossy().to_string());

    for n in 1.. {
        let name = match &ext {
            Some(ext) => format!("{}_{}.{}", stem, n, ext),
            None => format!("{}_{}", stem, n),
        };
        let candidate = dir.join(&name);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("infinite suffix search cannot fail to find a free name")
}

/// Strips directory components and characters that don't belong in a
/// filename, so an attacker-controlled `FILENAME` field cannot escape the
/// downloads directory.
pub fn sanitize_filename(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn transfer() -> IncomingTransfer {
        IncomingTransfer::new(
            "f1".to_string(),
            "alice@10.0.0.2".to_string(),
            "photo.png".to_string(),
            "image/png".to_string(),
            "".to_string(),
            3000,
            3,
            1000,
        )
    }

    #[test]
    fn duplicate_chunk_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut t = transfer();
        t.accept(dir.path());
        assert!(!t.receive_chunk(0, vec![1; 1024]));
        assert!(!t.receive_chunk(0, vec![1; 1024]));
        assert_eq!(t.received_bytes, 1024);
    }

    #[test]
    fn out_of_range_chunk_is_ignored() {
        let dir = tempdir().unwrap();
        let mut t = transfer();
        t.accept(dir.path());
        assert!(!t.receive_chunk(99, vec![1; 10]));
        assert_eq!(t.received_bytes, 0);
    }

    #[test]
    fn chunk_before_accept_is_ignored() {
        let mut t = transfer();
        assert!(!t.receive_chunk(0, vec![1; 1024]));
        assert_eq!(t.state, FileTransferState::Pending);
    }

    #[test]
    fn full_reassembly_writes_bytes_in_order() {
        let dir = tempdir().unwrap();
        let mut t = transfer();
        let path = t.accept(dir.path());

        assert!(!t.receive_chunk(2, vec![3; 952]));
        assert!(!t.receive_chunk(0, vec![1; 1024]));
        assert!(t.receive_chunk(1, vec![2; 1024]));

        let written = t.finalize(2000).unwrap();
        assert_eq!(written, path);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 3000);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1024], 2);
        assert_eq!(bytes[2048], 3);
        assert_eq!(t.state, FileTransferState::Completed);
    }

    #[test]
    fn unique_download_path_appends_numeric_suffix() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("photo.png"), b"existing").unwrap();
        let path = unique_download_path(dir.path(), "photo.png");
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "photo_1.png");
    }

    #[test]
    fn sanitize_filename_strips_path_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a/b/c.txt"), "c.txt");
    }
}
