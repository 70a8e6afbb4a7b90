use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while accounting a packet to a flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// A packet was offered to a record that has already been expired.
    /// The flow table recovers from this by evicting and starting a new flow.
    #[error("flow {id} is expired and no longer accepts packets")]
    ExpiredFlowWrite { id: u64 },

    /// The packet falls outside the per-second statistics window of its flow
    /// (clock skew, out-of-order capture, or a flow past its lifetime).
    #[error("bucket index {index} outside statistics window of {len} seconds")]
    OutOfRangeBucket { index: i64, len: u32 },

    /// The live index already held the key it was about to insert.
    #[error("flow table index corrupted: key already present while creating flow {id}")]
    DuplicateKeyInvariantViolation { id: u64 },
}

impl FlowError {
    /// Whether the error indicates corrupted table state rather than a bad event.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, FlowError::DuplicateKeyInvariantViolation { .. })
    }
}

/// Errors raised while loading or validating a [`FlowConfig`](crate::config::FlowConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
