//! Error types for the translation layer.

use thiserror::Error;

use crate::config::{BlockId, Lpn, PageIdx};

pub type FtlResult<T> = Result<T, FtlError>;

/// Error variants surfaced by the engine.
///
/// "Nothing to reclaim" is deliberately not here: a garbage-collection pass
/// with no victim is a no-op, not an error. It only turns into
/// `CapacityExhausted` when the write path still lacks headroom afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FtlError {
    /// Physical page address outside the configured geometry.
    #[error("page address {block}:{page} out of range")]
    PageOutOfRange { block: BlockId, page: PageIdx },

    /// Block index outside the configured geometry.
    #[error("block index {block} out of range")]
    BlockOutOfRange { block: BlockId },

    /// Program issued against a page that is not FREE. Pages are
    /// program-once between erases.
    #[error("program on non-free page {block}:{page}")]
    PageNotFree { block: BlockId, page: PageIdx },

    /// Logical page number beyond the exported logical space.
    #[error("lpn {lpn} beyond logical capacity {capacity}")]
    LpnOutOfRange { lpn: Lpn, capacity: usize },

    /// No erased block left to extend a stream or absorb a collection copy.
    #[error("out of free blocks: {context}")]
    CapacityExhausted { context: &'static str },
}
