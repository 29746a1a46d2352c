//! File transfer state enum.

/// File transfer state. Transitions are monotonic: `Pending` to either
/// `InProgress` or `Cancelled`, then `InProgress` to `Completed` or
/// `Failed`. Nothing moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTransferState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}
