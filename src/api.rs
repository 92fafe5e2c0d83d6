//! Host-facing entry points.
//!
//! These are the calls a binding layer exposes: give a model path, a prompt
//! and limits, get text back or a descriptive error. Each call owns every
//! resource it acquires; nothing is cached between calls.

use crate::backend::InferenceBackend;
use crate::engine::{self, DecodeOptions};
use crate::error::{GenerateError, Result};
use crate::sampling::SamplingConfig;
use std::path::PathBuf;

/// One generation request as a host passes it in.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model_path: PathBuf,
    pub prompt: String,
    pub n_predict: i32,
    /// Context window; `<= 0` picks the default.
    pub n_ctx: i32,
    /// `None` decodes greedily.
    pub sampling: Option<SamplingConfig>,
}

impl GenerateRequest {
    pub fn greedy(
        model_path: impl Into<PathBuf>,
        prompt: impl Into<String>,
        n_predict: i32,
        n_ctx: i32,
    ) -> Self {
        Self {
            model_path: model_path.into(),
            prompt: prompt.into(),
            n_predict,
            n_ctx,
            sampling: None,
        }
    }

    pub fn sampled(
        model_path: impl Into<PathBuf>,
        prompt: impl Into<String>,
        n_predict: i32,
        n_ctx: i32,
        sampling: SamplingConfig,
    ) -> Self {
        Self {
            sampling: Some(sampling),
            ..Self::greedy(model_path, prompt, n_predict, n_ctx)
        }
    }

    /// Reject requests that cannot run, before any model is touched.
    pub fn validate(&self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(GenerateError::InvalidRequest(
                "model path is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the request produces anything at all.
    pub fn wants_tokens(&self) -> bool {
        self.n_predict > 0
    }

    pub fn options(&self) -> DecodeOptions {
        match &self.sampling {
            Some(config) => DecodeOptions::sampled(self.n_predict, config.clone()),
            None => DecodeOptions::greedy(self.n_predict),
        }
    }
}

/// Run `request` against an already-open backend.
///
/// `model_path` is only validated here; the caller chose the backend.
pub fn generate<B: InferenceBackend + ?Sized>(
    backend: &mut B,
    request: &GenerateRequest,
) -> Result<String> {
    request.validate()?;
    if !request.wants_tokens() {
        return Ok(String::new());
    }
    Ok(engine::generate(backend, &request.prompt, request.options())?.text)
}

#[cfg(feature = "llama-cpp")]
pub use self::llama::{chat_format, generate_greedy, generate_sampled, run};

#[cfg(feature = "llama-cpp")]
mod llama {
    use super::GenerateRequest;
    use crate::backend::llama_cpp::LlamaCppEngine;
    use crate::chat::{format_chat, ChatMessage};
    use crate::config::{resolve_n_ctx, RuntimeConfig};
    use crate::engine::{FinishReason, Generation};
    use crate::error::{GenerateError, Result};
    use crate::sampling::SamplingConfig;
    use std::path::Path;

    /// Load the model, open a context, generate, release both.
    pub fn run(engine: &LlamaCppEngine, request: &GenerateRequest) -> Result<Generation> {
        request.validate()?;
        if !request.wants_tokens() {
            return Ok(Generation {
                text: String::new(),
                tokens: Vec::new(),
                reason: FinishReason::MaxTokens,
            });
        }
        let runtime = RuntimeConfig::from_env();
        let model = engine.load_model(&request.model_path, &runtime)?;
        let mut session = model.new_session(resolve_n_ctx(request.n_ctx))?;
        crate::engine::generate(&mut session, &request.prompt, request.options())
    }

    /// Argmax decoding.
    pub fn generate_greedy(
        engine: &LlamaCppEngine,
        model_path: &Path,
        prompt: &str,
        n_predict: i32,
        n_ctx: i32,
    ) -> Result<String> {
        let request = GenerateRequest::greedy(model_path, prompt, n_predict, n_ctx);
        Ok(run(engine, &request)?.text)
    }

    /// Sampler-chain decoding with stop strings.
    pub fn generate_sampled(
        engine: &LlamaCppEngine,
        model_path: &Path,
        prompt: &str,
        n_predict: i32,
        n_ctx: i32,
        sampling: &SamplingConfig,
    ) -> Result<String> {
        let request =
            GenerateRequest::sampled(model_path, prompt, n_predict, n_ctx, sampling.clone());
        Ok(run(engine, &request)?.text)
    }

    /// Format `messages` with `template`, or the model's own template.
    pub fn chat_format(
        engine: &LlamaCppEngine,
        model_path: &Path,
        messages: &[ChatMessage],
        template: Option<&str>,
        add_assistant: bool,
    ) -> Result<String> {
        if model_path.as_os_str().is_empty() {
            return Err(GenerateError::InvalidRequest(
                "model path is empty".to_string(),
            ));
        }
        let model = engine.load_model(model_path, &RuntimeConfig::from_env())?;
        format_chat(&model, messages, template, add_assistant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::ScriptedBackend;

    #[test]
    fn empty_path_rejected_before_evaluation() {
        let mut backend = ScriptedBackend::new(256);
        let req = GenerateRequest::greedy("", "hi", 4, 0);
        assert!(matches!(
            generate(&mut backend, &req),
            Err(GenerateError::InvalidRequest(_))
        ));
        assert_eq!(backend.eval_calls(), 0);
    }

    #[test]
    fn non_positive_n_predict_is_empty() {
        let mut backend = ScriptedBackend::new(256).always_prefer(b'a' as u32);
        for n in [0, -3] {
            let req = GenerateRequest::sampled("m.gguf", "hi", n, 0, SamplingConfig::default());
            assert_eq!(generate(&mut backend, &req).unwrap(), "");
        }
        assert_eq!(backend.eval_calls(), 0);
        assert_eq!(backend.tokenize_calls(), 0);
    }

    #[test]
    fn options_follow_sampling() {
        let req = GenerateRequest::greedy("m.gguf", "p", 3, 0);
        assert_eq!(req.options(), DecodeOptions::greedy(3));
        let cfg = SamplingConfig {
            seed: 9,
            ..SamplingConfig::default()
        };
        let req = GenerateRequest::sampled("m.gguf", "p", 3, 0, cfg.clone());
        assert_eq!(req.options(), DecodeOptions::sampled(3, cfg));
    }

    #[test]
    fn greedy_request_returns_text() {
        let mut backend = ScriptedBackend::new(256).always_prefer(b'o' as u32);
        let req = GenerateRequest::greedy("m.gguf", "Hello", 3, 0);
        assert_eq!(generate(&mut backend, &req).unwrap(), "ooo");
    }
}
