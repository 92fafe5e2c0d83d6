//! Call-level errors for a generation request.

use crate::backend::{BackendError, Token};
use crate::sampling::SamplerInitError;
use thiserror::Error;

/// Result type alias using the crate's [`GenerateError`].
pub type Result<T> = std::result::Result<T, GenerateError>;

/// Where in the decode loop an evaluation failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// The whole-prompt evaluation.
    Prompt,
    /// A generation step, counted from 0.
    Step(usize),
}

impl std::fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prompt => write!(f, "prompt"),
            Self::Step(i) => write!(f, "step {i}"),
        }
    }
}

/// Errors surfaced to the caller of a generation entry point.
///
/// Every variant is fatal for the call. The decode loop releases its
/// sampler chain and the backend session before the error reaches the caller.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid sampler config: {0}")]
    InvalidSamplerConfig(#[from] SamplerInitError),

    #[error("decode failed at {stage}: {source}")]
    DecodeFailure {
        stage: DecodeStage,
        #[source]
        source: BackendError,
    },

    #[error("invalid token id {token} (vocabulary size {n_vocab})")]
    InvalidTokenId { token: Token, n_vocab: usize },

    #[error("tokenize failed: {0}")]
    Tokenize(#[source] BackendError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl GenerateError {
    pub(crate) fn decode(stage: DecodeStage, source: BackendError) -> Self {
        Self::DecodeFailure { stage, source }
    }
}
