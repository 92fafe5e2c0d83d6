//! Inference backend trait and implementations.
//!
//! The backend trait is the clean cutpoint between the decode loop and the
//! actual model. Anything that can tokenize, evaluate a batch of tokens and
//! hand back a logit vector can drive generation: llama.cpp in production,
//! [`ScriptedBackend`](scripted::ScriptedBackend) in tests.

#[cfg(feature = "llama-cpp")]
pub mod llama_cpp;
pub mod scripted;

use thiserror::Error;

/// A vocabulary id. Valid only within `[0, vocab_size)`.
pub type Token = u32;

/// Errors from inference backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to load model: {0}")]
    LoadError(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    /// The caller's buffer was undersized. Resize to `required` and retry.
    #[error("buffer too small ({required} required)")]
    BufferTooSmall { required: usize },

    #[error("evaluation failed (status {status})")]
    InferenceError { status: i32 },

    #[error("no free context slot for the batch")]
    ContextFull,

    #[error("no logits for the last evaluated position")]
    NoLogits,

    #[error("chat template error: {0}")]
    ChatTemplateError(String),
}

/// The contract between the decode loop and the model.
///
/// One implementation instance is one execution context: it holds the
/// evaluated positions and the most recent logits for a single sequence.
/// It is never shared between concurrent generations.
pub trait InferenceBackend {
    /// Number of vocabulary entries; every logit vector has this length.
    fn vocab_size(&self) -> usize;

    /// Context window in tokens.
    fn context_size(&self) -> usize;

    /// Tokenize `text` into at most `capacity` tokens.
    ///
    /// Returns [`BackendError::BufferTooSmall`] carrying the required length
    /// when `capacity` is insufficient.
    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        capacity: usize,
    ) -> Result<Vec<Token>, BackendError>;

    /// Render one token to its byte fragment, using at most `capacity` bytes.
    ///
    /// Same undersized-buffer contract as [`InferenceBackend::tokenize`].
    fn detokenize(&self, token: Token, capacity: usize) -> Result<Vec<u8>, BackendError>;

    /// Evaluate `tokens` at the next positions of the sequence, producing
    /// logits for the batch indices in `logits_for`. Blocking.
    fn evaluate(&mut self, tokens: &[Token], logits_for: &[usize]) -> Result<(), BackendError>;

    /// Logits of the last position that requested them in the most recent
    /// [`InferenceBackend::evaluate`], or `None` if none were requested.
    ///
    /// The slice borrows the backend, so it cannot outlive the next evaluation.
    fn last_logits(&self) -> Option<&[f32]>;

    /// Whether the vocabulary marks `token` as end-of-generation (EOS/EOT).
    fn is_end_of_generation(&self, token: Token) -> bool;
}
