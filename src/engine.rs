//! Decode loop: the single-sequence generation state machine.
//!
//! Drives one generation call against an [`InferenceBackend`]: prime the
//! prompt, then per step read the logits, pick a token (argmax or the
//! sampler chain), evaluate it, render its fragment and check the stop
//! conditions.
//!
//! ```
//! use llama_gen::backend::scripted::ScriptedBackend;
//! use llama_gen::engine::{DecodeLoop, DecodeOptions, FinishReason};
//!
//! let mut backend = ScriptedBackend::new(256).always_prefer(b'a' as u32);
//! let out = DecodeLoop::new(&mut backend, DecodeOptions::greedy(3))?.run("Hi")?;
//! assert_eq!(out.text, "aaa");
//! assert_eq!(out.reason, FinishReason::MaxTokens);
//! # Ok::<(), llama_gen::GenerateError>(())
//! ```
//!
//! States: `PrimingPrompt → Generating → Finished(Eos | StopString | MaxTokens)`,
//! or `Aborted` when an evaluation fails.

use crate::backend::{BackendError, InferenceBackend, Token};
use crate::error::{DecodeStage, GenerateError, Result};
use crate::history::TokenHistory;
use crate::sampling::{argmax, SamplerChain, SamplerInitError, SamplingConfig};
use crate::stop::StopMatcher;
use crate::text::{tokenize_prompt, PieceDecoder};
use tracing::{debug, info};

/// How the next token is chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeMode {
    /// Plain argmax over the logits, first maximum wins.
    Greedy,
    /// The sampler chain built from this configuration.
    Sampled(SamplingConfig),
}

/// Options for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    /// Maximum number of generated tokens; `<= 0` produces nothing.
    pub n_predict: i32,
    /// Let the tokenizer add its special marker tokens (BOS) to the prompt.
    pub add_special: bool,
    pub mode: DecodeMode,
}

impl DecodeOptions {
    pub fn greedy(n_predict: i32) -> Self {
        Self {
            n_predict,
            add_special: true,
            mode: DecodeMode::Greedy,
        }
    }

    pub fn sampled(n_predict: i32, config: SamplingConfig) -> Self {
        Self {
            n_predict,
            add_special: true,
            mode: DecodeMode::Sampled(config),
        }
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The model produced an end-of-generation token.
    Eos,
    /// The text ended with a configured stop string (trimmed off).
    StopString,
    /// `n_predict` tokens were generated.
    MaxTokens,
}

/// Where the loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PrimingPrompt,
    Generating,
    Finished(FinishReason),
    Aborted,
}

/// Result of a completed generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Decoded text, stop suffix removed. Invalid UTF-8 is replaced.
    pub text: String,
    /// Generated token ids, prompt excluded.
    pub tokens: Vec<Token>,
    pub reason: FinishReason,
}

/// The generation state machine for one call.
///
/// Owns the token history, the sampler chain and the accumulated text; all
/// of them are dropped with the loop, so nothing carries over between calls.
pub struct DecodeLoop<'b, B: InferenceBackend + ?Sized> {
    backend: &'b mut B,
    n_vocab: usize,
    n_predict: usize,
    add_special: bool,
    chain: Option<SamplerChain>,
    stops: StopMatcher,
    decoder: PieceDecoder,
    history: TokenHistory,
    text: Vec<u8>,
    phase: Phase,
    steps: usize,
}

impl<'b, B: InferenceBackend + ?Sized> DecodeLoop<'b, B> {
    /// Set up a call. Builds the sampler chain up front, so an invalid
    /// configuration fails before anything is evaluated.
    ///
    /// With `n_predict <= 0` the loop starts out finished and never touches
    /// the backend.
    pub fn new(backend: &'b mut B, options: DecodeOptions) -> Result<Self> {
        let n_predict = usize::try_from(options.n_predict).unwrap_or(0);
        let n_vocab = backend.vocab_size();

        let mut chain = None;
        let mut stops = StopMatcher::default();
        let phase = if n_predict == 0 {
            Phase::Finished(FinishReason::MaxTokens)
        } else {
            if n_vocab == 0 {
                return Err(SamplerInitError::EmptyVocabulary.into());
            }
            if let DecodeMode::Sampled(config) = &options.mode {
                chain = Some(SamplerChain::build(config, n_vocab, backend.context_size())?);
                stops = StopMatcher::new(&config.stop);
            }
            Phase::PrimingPrompt
        };

        Ok(Self {
            backend,
            n_vocab,
            n_predict,
            add_special: options.add_special,
            chain,
            stops,
            decoder: PieceDecoder::default(),
            history: TokenHistory::default(),
            text: Vec::new(),
            phase,
            steps: 0,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history(&self) -> &TokenHistory {
        &self.history
    }

    /// Text bytes accumulated so far.
    pub fn text(&self) -> &[u8] {
        &self.text
    }

    /// Tokenize the prompt and evaluate it in one batch, requesting logits
    /// for the final position only.
    pub fn prime(&mut self, prompt: &str) -> Result<()> {
        if self.phase != Phase::PrimingPrompt {
            return Err(GenerateError::InvalidRequest(format!(
                "cannot prime prompt in phase {:?}",
                self.phase
            )));
        }
        let result = self.prime_inner(prompt);
        if result.is_err() {
            self.phase = Phase::Aborted;
        }
        result
    }

    fn prime_inner(&mut self, prompt: &str) -> Result<()> {
        let tokens = tokenize_prompt(&*self.backend, prompt, self.add_special)?;
        self.check_token_range(&tokens)?;

        let last = tokens.len().saturating_sub(1);
        self.backend
            .evaluate(&tokens, &[last])
            .map_err(|e| GenerateError::decode(DecodeStage::Prompt, e))?;

        info!(
            prompt_tokens = tokens.len(),
            n_predict = self.n_predict,
            sampled = self.chain.is_some(),
            "prompt primed"
        );
        self.history = TokenHistory::with_prompt(tokens);
        self.phase = Phase::Generating;
        Ok(())
    }

    /// Generate one token. Returns the phase after the step.
    ///
    /// Calling this after the loop finished is a no-op.
    pub fn step(&mut self) -> Result<Phase> {
        match self.phase {
            Phase::Generating => {}
            Phase::PrimingPrompt => {
                return Err(GenerateError::InvalidRequest(
                    "prompt must be primed before stepping".to_string(),
                ))
            }
            Phase::Finished(_) | Phase::Aborted => return Ok(self.phase),
        }
        match self.step_inner() {
            Ok(phase) => {
                self.phase = phase;
                Ok(phase)
            }
            Err(e) => {
                self.phase = Phase::Aborted;
                Err(e)
            }
        }
    }

    fn step_inner(&mut self) -> Result<Phase> {
        let step = self.steps;

        let logits = self
            .backend
            .last_logits()
            .ok_or_else(|| GenerateError::decode(DecodeStage::Step(step), BackendError::NoLogits))?;
        let picked = match &mut self.chain {
            Some(chain) => chain.sample(logits),
            None => argmax(logits),
        };
        let token = picked
            .ok_or_else(|| GenerateError::decode(DecodeStage::Step(step), BackendError::NoLogits))?;

        if token as usize >= self.n_vocab {
            return Err(GenerateError::InvalidTokenId {
                token,
                n_vocab: self.n_vocab,
            });
        }
        if let Some(chain) = &mut self.chain {
            chain.accept(token);
        }
        self.history.push(token);

        self.backend
            .evaluate(&[token], &[0])
            .map_err(|e| GenerateError::decode(DecodeStage::Step(step), e))?;

        if let Some(piece) = self.decoder.piece(&*self.backend, token) {
            self.text.extend_from_slice(&piece);
        }
        self.steps += 1;
        debug!(step, token, context = self.history.len(), "token decoded");

        if self.backend.is_end_of_generation(token) {
            return Ok(Phase::Finished(FinishReason::Eos));
        }
        if self.stops.trim(&mut self.text) {
            debug!(step, "stop string matched");
            return Ok(Phase::Finished(FinishReason::StopString));
        }
        if self.steps >= self.n_predict {
            return Ok(Phase::Finished(FinishReason::MaxTokens));
        }
        Ok(Phase::Generating)
    }

    /// Run the whole call: prime, step until a terminal phase, collect.
    pub fn run(mut self, prompt: &str) -> Result<Generation> {
        if self.phase == Phase::PrimingPrompt {
            self.prime(prompt)?;
            while self.step()? == Phase::Generating {}
        }
        Ok(self.finish())
    }

    fn check_token_range(&self, tokens: &[Token]) -> Result<()> {
        match tokens.iter().find(|&&t| t as usize >= self.n_vocab) {
            Some(&token) => Err(GenerateError::InvalidTokenId {
                token,
                n_vocab: self.n_vocab,
            }),
            None => Ok(()),
        }
    }

    fn finish(self) -> Generation {
        let reason = match self.phase {
            Phase::Finished(reason) => reason,
            _ => FinishReason::MaxTokens,
        };
        let text = String::from_utf8_lossy(&self.text).into_owned();
        let tokens = self.history.into_generated();
        info!(?reason, tokens = tokens.len(), bytes = text.len(), "generation finished");
        Generation {
            text,
            tokens,
            reason,
        }
    }
}

/// Run one generation call over `backend`.
pub fn generate<B: InferenceBackend + ?Sized>(
    backend: &mut B,
    prompt: &str,
    options: DecodeOptions,
) -> Result<Generation> {
    DecodeLoop::new(backend, options)?.run(prompt)
}
