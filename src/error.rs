use thiserror::Error;

#[derive(Error, Debug)]
pub enum MacFsError {
    #[error("I/O error: {0}")]
    DeviceIo(#[from] std::io::Error),

    #[error("no HFS or HFS+ signature found on device")]
    UnknownVolume,

    #[error("unsupported volume variant: {0}")]
    UnsupportedVersion(String),

    #[error("corrupt B-tree node {node}: {reason}")]
    CorruptNode { node: u32, reason: String },

    #[error("node index {index} outside tree of {total} nodes")]
    InvalidNodeIndex { index: u32, total: u32 },

    #[error("fork of CNID {cnid} short: extents cover {covered} of {total} blocks")]
    ShortFork { cnid: u32, covered: u32, total: u32 },

    #[error("thread record missing for CNID {0} during path reconstruction")]
    BrokenChain(u32),

    #[error("text conversion buffer too small: need {needed}, have {have}")]
    OutputTooSmall { needed: usize, have: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ill-formed HFS path: {0}")]
    PathSyntax(String),

    #[error("read of {length} bytes at offset {offset} exceeds extent of {available} bytes")]
    OutOfRange {
        offset: u64,
        length: usize,
        available: u64,
    },
}

impl MacFsError {
    pub fn corrupt_node(node: u32, reason: impl Into<String>) -> Self {
        MacFsError::CorruptNode {
            node,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MacFsError>;
