use thiserror::Error;

use crate::transport::Rank;

#[derive(Debug, Error)]
pub enum SyncError {
    /// An engine was used in the wrong state, or with an incompatible policy.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An arriving message does not fit the slice precomputed for its peer.
    #[error("message from rank {peer} has {actual} bytes, expected {expected}")]
    SizeMismatch {
        peer: Rank,
        expected: usize,
        actual: usize,
    },

    /// The transport reported a non-success status.
    #[error("transport error: {0}")]
    Transport(String),

    /// At least one rank in the peer group failed during a transfer.
    ///
    /// Raised on every rank after the closing min-reduction, so the whole
    /// group terminates the transfer symmetrically.
    #[error("a communication error occurred on at least one rank")]
    Communication,
}

pub type Result<T> = std::result::Result<T, SyncError>;
