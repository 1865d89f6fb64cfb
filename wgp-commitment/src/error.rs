//! Error types for commitment building and the commitment log.

use thiserror::Error;
use wgp_common::EncodingError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommitLogError {
    #[error("shield {0} is not tracked by the commitment log")]
    UntrackedShield(String),

    #[error("commitment log request failed: {0}")]
    Request(String),

    #[error("invalid commitment log response: {0}")]
    InvalidResponse(String),

    #[error("commitment log rejected leaf: {0}")]
    Rejected(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommitmentError {
    #[error("no previous leaf for shield {shield} at state {state}")]
    MissingPreviousLeaf { shield: String, state: u64 },

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Log(#[from] CommitLogError),
}
