//! Error taxonomy for the execution core.
//!
//! Mirrors `fiddler::Error` in shape (a flat `thiserror` enum with `#[from]` wrappers for
//! the crate's own dependencies) but carries the kinds named by the pipeline engine rather
//! than the stream-processor ones.

use thiserror::Error;

/// Errors the execution core can return to its caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Compile-time: cycles, dangling references, duplicate component ids.
    #[error("invalid recipe: {0}")]
    InvalidRecipe(String),

    /// Input batch fails schema validation. Message aggregates every failing path.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Batch size exceeds the configured ceiling.
    #[error("batch of {got} exceeds maximum of {max}")]
    ExceedMaxBatchSize {
        /// Size of the offending batch.
        got: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// A template path did not resolve against Memory.
    #[error("not found: {0}")]
    NotFound(String),

    /// Requester-impersonation / permission failure surfaced by the ACL collaborator.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The workflow runtime reported a terminal failure for a trigger.
    #[error("trigger failed: {0}")]
    TriggerFail(String),

    /// Output or trace rendering failed after execution completed.
    #[error("assembly failed: {0}")]
    Assembly(String),

    /// The Memory Store reported a failure.
    #[error("memory store error: {0}")]
    Memory(#[from] pipeline_memory::Error),

    /// A recipe or configuration value failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A signal channel was dropped while awaiting a response.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

impl Error {
    /// The numeric status code reported on `Operation` carriers for non-`RUNNING`,
    /// non-`COMPLETED` workflow statuses (`GetOperation`).
    pub fn status_code(&self) -> i32 {
        match self {
            Error::InvalidRecipe(_) => 3,
            Error::Validation(_) => 3,
            Error::ExceedMaxBatchSize { .. } => 3,
            Error::NotFound(_) => 5,
            Error::Unauthorized(_) => 7,
            Error::TriggerFail(_) => 13,
            Error::Assembly(_) => 13,
            Error::Memory(_) => 13,
            Error::Serialization(_) => 13,
            Error::ChannelClosed(_) => 13,
        }
    }
}
