use thiserror::Error;

use crate::fixed_point::FixedPointError;

/// Common result alias for chain-state source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Failure of a live chain-state source. Terminal for the sequence that
/// yields it; siblings keep running.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("malformed chain value: {0}")]
    Decode(String),
    #[error("source `{0}` closed")]
    Closed(String),
    #[error("arithmetic error: {0}")]
    Arithmetic(#[from] FixedPointError),
}

impl SourceError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Rpc(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}
