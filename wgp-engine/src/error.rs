//! Error types for the protocol engine.

use std::time::Duration;

use thiserror::Error;
use wgp_commitment::{CommitLogError, CommitmentError};
use wgp_common::EncodingError;
use wgp_prover::ProofError;

use crate::poller::PollError;

#[derive(Debug, Error)]
pub enum EngineError {
    // ═══════════════════════════════════════════════════════════════════════════════
    // PROTOCOL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("commitment mismatch for shield {shield}: built {built}, log holds {stored}")]
    CommitmentMismatch {
        shield: String,
        built: String,
        stored: String,
    },

    #[error("proof generation failed: {0}")]
    ProofGenerationFailed(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("operation cancelled")]
    Cancelled,

    // ═══════════════════════════════════════════════════════════════════════════════
    // COLLABORATOR ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    CommitLog(#[from] CommitLogError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::MalformedPayload(_) => "malformed_payload",
            EngineError::CommitmentMismatch { .. } => "commitment_mismatch",
            EngineError::ProofGenerationFailed(_) => "proof_generation_failed",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::Timeout(_) => "timeout",
            EngineError::ProtocolViolation(_) => "protocol_violation",
            EngineError::Cancelled => "cancelled",
            EngineError::InvalidArgument(_) => "invalid_argument",
            EngineError::CommitLog(_) => "commit_log",
            EngineError::Transport(_) => "transport",
            EngineError::Config(_) => "config",
            EngineError::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::MalformedPayload(err.to_string())
    }
}

impl From<EncodingError> for EngineError {
    fn from(err: EncodingError) -> Self {
        EngineError::MalformedPayload(err.to_string())
    }
}

impl From<CommitmentError> for EngineError {
    fn from(err: CommitmentError) -> Self {
        match err {
            CommitmentError::MissingPreviousLeaf { .. } => EngineError::NotFound(err.to_string()),
            CommitmentError::Encoding(inner) => inner.into(),
            CommitmentError::Log(inner) => EngineError::CommitLog(inner),
        }
    }
}

impl From<ProofError> for EngineError {
    fn from(err: ProofError) -> Self {
        match err {
            ProofError::InvalidArgument(msg) => EngineError::InvalidArgument(msg),
            other => EngineError::ProofGenerationFailed(other.to_string()),
        }
    }
}

impl From<PollError> for EngineError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Timeout(after) => EngineError::Timeout(after),
            PollError::Cancelled => EngineError::Cancelled,
        }
    }
}
