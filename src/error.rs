/// Error types for the tree key-agreement core.
/// Every operation returns one of these instead of aborting, so the caller can
/// decide between skipping a message and requesting a full resynchronization.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeKemError {
    /// ECDH or AES-GCM failure: malformed key, bad length, tag mismatch.
    #[error("Crypto failure: {0}")]
    CryptoFailure(String),

    /// A message could not be applied against the local tree. Usually a missing
    /// or out-of-order message.
    #[error("Protocol desync: {0}")]
    ProtocolDesync(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Unknown entry: {0}")]
    UnknownEntry(String),

    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("OpenMLS error: {0}")]
    Mls(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TreeKemError {
    /// True when the failure points at a missing or reordered message rather
    /// than a local bug; callers typically answer these with a state re-exchange.
    pub fn is_desync(&self) -> bool {
        matches!(self, TreeKemError::ProtocolDesync(_))
    }
}

impl From<bincode::Error> for TreeKemError {
    fn from(err: bincode::Error) -> Self {
        TreeKemError::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for TreeKemError {
    fn from(err: serde_json::Error) -> Self {
        TreeKemError::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TreeKemError>;
