//! Tokenize/detokenize adaptation over the backend's buffer contract.
//!
//! Backends report an undersized buffer with
//! [`BackendError::BufferTooSmall`]. Both directions resize to the reported
//! length and retry exactly once.

use crate::backend::{BackendError, InferenceBackend, Token};
use crate::error::{GenerateError, Result};
use tracing::warn;

/// Starting capacity for a single token's fragment.
pub const PIECE_CAPACITY: usize = 4096;

/// Initial token capacity for a prompt of `len` bytes.
fn prompt_capacity(len: usize) -> usize {
    (len + 8).max(32)
}

/// Tokenize a prompt, retrying once with the size the backend asks for.
pub fn tokenize_prompt<B: InferenceBackend + ?Sized>(
    backend: &B,
    text: &str,
    add_special: bool,
) -> Result<Vec<Token>> {
    match backend.tokenize(text, add_special, prompt_capacity(text.len())) {
        Ok(tokens) => Ok(tokens),
        Err(BackendError::BufferTooSmall { required }) => {
            warn!(required, "prompt token buffer too small, retrying");
            backend
                .tokenize(text, add_special, required)
                .map_err(GenerateError::Tokenize)
        }
        Err(e) => Err(GenerateError::Tokenize(e)),
    }
}

/// Renders tokens to bytes, keeping the grown buffer size between calls.
#[derive(Debug, Clone)]
pub struct PieceDecoder {
    capacity: usize,
}

impl Default for PieceDecoder {
    fn default() -> Self {
        Self::new(PIECE_CAPACITY)
    }
}

impl PieceDecoder {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fragment for `token`, or `None` if the backend could not render it.
    ///
    /// A failure here never aborts generation; the token just contributes
    /// no text.
    pub fn piece<B: InferenceBackend + ?Sized>(
        &mut self,
        backend: &B,
        token: Token,
    ) -> Option<Vec<u8>> {
        match backend.detokenize(token, self.capacity) {
            Ok(bytes) => Some(bytes),
            Err(BackendError::BufferTooSmall { required }) => {
                self.capacity = required.max(self.capacity.saturating_mul(2));
                match backend.detokenize(token, self.capacity) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!(token, error = %e, "dropping fragment after retry");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(token, error = %e, "dropping fragment");
                None
            }
        }
    }
}
