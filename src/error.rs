//! Error types for the store reader.

use crate::types::{BlockId, Format, NodeId, PropId};
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, PstError>;

/// Errors that can occur while reading a store file
#[derive(Error, Debug)]
pub enum PstError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The header's version word does not match the attempted variant.
    ///
    /// `open` relies on this error to retry the other variant, so it is
    /// raised unconditionally, regardless of the validation level.
    #[error("invalid format: version {version} is not {expected:?}")]
    InvalidFormat { version: u16, expected: Format },

    /// A trailer or heap signature did not match the computed value
    #[error("{context}: computed {computed:#x}, stored {stored:#x}")]
    SigMismatch {
        context: &'static str,
        computed: u32,
        stored: u32,
    },

    /// A CRC did not match the covered bytes
    #[error("{context}: computed {computed:#010x}, stored {stored:#010x}")]
    CrcFail {
        context: &'static str,
        computed: u32,
        stored: u32,
    },

    /// Page type, level, or location mismatch
    #[error("unexpected page: {0}")]
    UnexpectedPage(String),

    /// Block type or class mismatch
    #[error("unexpected block: {0}")]
    UnexpectedBlock(String),

    /// Deeper structural violation in the file
    #[error("database corrupt: {0}")]
    Corrupt(String),

    /// Node id not present in the node B-tree or a sub-node tree
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// Block id not present in the block B-tree
    #[error("block {0} not found")]
    BlockNotFound(BlockId),

    /// Property id not present in the property context
    #[error("property {0} not found")]
    PropNotFound(PropId),

    /// A read past the end of a stream or allocation
    #[error("read of {len} bytes at offset {offset} is out of range (size {size})")]
    OutOfRange { offset: u64, len: usize, size: u64 },
}

impl PstError {
    /// Create a corruption error with a message
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Create an unexpected-page error
    pub fn unexpected_page(msg: impl Into<String>) -> Self {
        Self::UnexpectedPage(msg.into())
    }

    /// Create an unexpected-block error
    pub fn unexpected_block(msg: impl Into<String>) -> Self {
        Self::UnexpectedBlock(msg.into())
    }
}
