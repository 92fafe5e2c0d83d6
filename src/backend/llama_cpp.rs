//! llama.cpp backend: GGUF model loading and inference via llama-cpp-2.
//!
//! Three scoped handles, each borrowing the one before it:
//! - [`LlamaCppEngine`]: the process-wide llama.cpp backend, initialized once
//! - [`LlamaCppModel`]: loaded weights and vocabulary
//! - [`LlamaCppSession`]: one execution context (KV cache + logits) for a
//!   single sequence; implements [`InferenceBackend`]
//!
//! Dropping a session frees its context before the model can go, so every
//! exit path of a generation call releases resources in the right order.

use crate::backend::{BackendError, InferenceBackend, Token};
use crate::chat::{ChatMessage, ChatTemplater};
use crate::config::RuntimeConfig;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaChatTemplate, LlamaModel};
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::{DecodeError, TokenToStringError};

use std::num::NonZeroU32;
use std::path::Path;
use tracing::{debug, info, warn};

/// Handle on the initialized llama.cpp library.
///
/// llama.cpp can only be initialized once per process; create one of these
/// at startup and pass it to every call.
pub struct LlamaCppEngine {
    backend: LlamaBackend,
}

impl LlamaCppEngine {
    pub fn init() -> Result<Self, BackendError> {
        let backend = LlamaBackend::init()
            .map_err(|e| BackendError::LoadError(format!("backend init: {}", e)))?;
        Ok(Self { backend })
    }

    /// Load a GGUF model with CPU-only evaluation.
    pub fn load_model(
        &self,
        path: &Path,
        runtime: &RuntimeConfig,
    ) -> Result<LlamaCppModel<'_>, BackendError> {
        if !path.exists() {
            return Err(BackendError::LoadError(format!(
                "GGUF file not found: {}",
                path.display()
            )));
        }

        let params = LlamaModelParams::default().with_n_gpu_layers(runtime.n_gpu_layers);
        let model = LlamaModel::load_from_file(&self.backend, path, &params)
            .map_err(|e| BackendError::LoadError(format!("{}", e)))?;

        info!(
            path = %path.display(),
            n_vocab = model.n_vocab(),
            n_threads = runtime.n_threads,
            "model loaded"
        );
        Ok(LlamaCppModel {
            engine: self,
            model,
            runtime: runtime.clone(),
        })
    }
}

/// Loaded model weights and vocabulary.
pub struct LlamaCppModel<'e> {
    engine: &'e LlamaCppEngine,
    model: LlamaModel,
    runtime: RuntimeConfig,
}

impl<'e> LlamaCppModel<'e> {
    /// Create an execution context of `n_ctx` tokens.
    ///
    /// The batch size equals the context size, so a prompt that fits the
    /// context is always evaluated in one call.
    pub fn new_session(&self, n_ctx: u32) -> Result<LlamaCppSession<'_>, BackendError> {
        let threads = i32::try_from(self.runtime.n_threads).unwrap_or(i32::MAX);
        let params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(n_ctx)
            .with_n_threads(threads)
            .with_n_threads_batch(threads);

        let ctx = self
            .model
            .new_context(&self.engine.backend, params)
            .map_err(|e| BackendError::LoadError(format!("context: {}", e)))?;

        info!(n_ctx, n_threads = threads, "context created");
        Ok(LlamaCppSession {
            model: &self.model,
            ctx,
            n_ctx: n_ctx as usize,
            n_past: 0,
            logits_index: None,
        })
    }
}

impl ChatTemplater for LlamaCppModel<'_> {
    fn apply_chat_template(
        &self,
        messages: &[ChatMessage],
        template: Option<&str>,
        add_assistant: bool,
    ) -> Result<String, BackendError> {
        let template = match template {
            Some(t) => LlamaChatTemplate::new(t)
                .map_err(|e| BackendError::ChatTemplateError(format!("template: {}", e)))?,
            None => self
                .model
                .chat_template(None)
                .map_err(|e| BackendError::ChatTemplateError(format!("built-in template: {}", e)))?,
        };
        let chat = messages
            .iter()
            .map(|m| LlamaChatMessage::new(m.role.clone(), m.content.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BackendError::ChatTemplateError(format!("message: {}", e)))?;

        self.model
            .apply_chat_template(&template, &chat, add_assistant)
            .map_err(|e| BackendError::ChatTemplateError(format!("{}", e)))
    }
}

/// One single-sequence execution context.
pub struct LlamaCppSession<'m> {
    model: &'m LlamaModel,
    ctx: LlamaContext<'m>,
    n_ctx: usize,
    /// Positions already in the KV cache.
    n_past: usize,
    /// Batch index of the most recent logits, if any were requested.
    logits_index: Option<i32>,
}

impl LlamaCppSession<'_> {
    fn llama_token(token: Token) -> Result<LlamaToken, BackendError> {
        i32::try_from(token)
            .map(LlamaToken)
            .map_err(|_| BackendError::TokenizerError(format!("token {} out of range", token)))
    }
}

fn decode_error(err: DecodeError) -> BackendError {
    match err {
        DecodeError::NoKvCacheSlot => BackendError::ContextFull,
        DecodeError::Unknown(status) => BackendError::InferenceError { status },
        other => {
            warn!(error = %other, "llama_decode failed");
            BackendError::InferenceError { status: -1 }
        }
    }
}

impl InferenceBackend for LlamaCppSession<'_> {
    fn vocab_size(&self) -> usize {
        usize::try_from(self.model.n_vocab()).unwrap_or(0)
    }

    fn context_size(&self) -> usize {
        self.n_ctx
    }

    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        capacity: usize,
    ) -> Result<Vec<Token>, BackendError> {
        let bos = if add_special { AddBos::Always } else { AddBos::Never };
        let tokens = self
            .model
            .str_to_token(text, bos)
            .map_err(|e| BackendError::TokenizerError(format!("{}", e)))?;
        if tokens.len() > capacity {
            return Err(BackendError::BufferTooSmall {
                required: tokens.len(),
            });
        }
        Ok(tokens.iter().map(|t| t.0.unsigned_abs()).collect())
    }

    fn detokenize(&self, token: Token, capacity: usize) -> Result<Vec<u8>, BackendError> {
        let token = Self::llama_token(token)?;
        // special = true: control tokens render as their text, like EOS/EOT markers.
        match self.model.token_to_piece_bytes(token, capacity, true, None) {
            Ok(bytes) => Ok(bytes),
            Err(TokenToStringError::InsufficientBufferSpace(n)) => {
                Err(BackendError::BufferTooSmall {
                    required: n.unsigned_abs() as usize,
                })
            }
            Err(e) => Err(BackendError::TokenizerError(format!("{}", e))),
        }
    }

    fn evaluate(&mut self, tokens: &[Token], logits_for: &[usize]) -> Result<(), BackendError> {
        self.logits_index = None;
        if tokens.is_empty() {
            return Err(BackendError::InferenceError { status: -1 });
        }
        if self.n_past + tokens.len() > self.n_ctx {
            return Err(BackendError::ContextFull);
        }

        let mut batch = LlamaBatch::new(tokens.len(), 1);
        for (i, &tok) in tokens.iter().enumerate() {
            let pos = i32::try_from(self.n_past + i).map_err(|_| BackendError::ContextFull)?;
            batch
                .add(Self::llama_token(tok)?, pos, &[0], logits_for.contains(&i))
                .map_err(|e| {
                    warn!(error = %e, "batch add failed");
                    BackendError::InferenceError { status: -1 }
                })?;
        }

        self.ctx.decode(&mut batch).map_err(decode_error)?;

        self.n_past += tokens.len();
        self.logits_index = logits_for
            .iter()
            .filter(|&&i| i < tokens.len())
            .max()
            .and_then(|&i| i32::try_from(i).ok());
        debug!(n_tokens = tokens.len(), n_past = self.n_past, "batch evaluated");
        Ok(())
    }

    fn last_logits(&self) -> Option<&[f32]> {
        self.logits_index.map(|i| self.ctx.get_logits_ith(i))
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        Self::llama_token(token).map_or(false, |t| self.model.is_eog_token(t))
    }
}
