//! Sampler chain construction and the per-step sampling protocol.
//!
//! [`SamplerChain::build`] turns a [`SamplingConfig`] into a fixed, ordered
//! pipeline: penalties, top-k, top-p, then temperature plus a seeded draw
//! (or greedy argmax when temperature is not positive). The order is not
//! configurable.
//!
//! ```
//! use llama_gen::sampling::{SamplerChain, SamplingConfig};
//!
//! let config = SamplingConfig { temperature: 0.0, ..Default::default() };
//! let mut chain = SamplerChain::build(&config, 4, 512).unwrap();
//! let token = chain.sample(&[0.1, 2.0, 0.5, 2.0]).unwrap();
//! chain.accept(token);
//! assert_eq!(token, 1);
//! ```

pub mod stages;

use crate::backend::Token;
use serde::{Deserialize, Serialize};
use stages::{Candidates, Dist, Penalties, SamplerStage};
use thiserror::Error;
use tracing::debug;

/// Lookback used when `repeat_last_n` is 0.
pub const DEFAULT_REPEAT_LAST_N: usize = 64;

/// Seed used when the configured seed is 0.
pub const DEFAULT_SEED: u32 = 0xFFFF_FFFF;

/// Errors from building a sampler chain.
#[derive(Debug, Error)]
pub enum SamplerInitError {
    #[error("vocabulary is empty")]
    EmptyVocabulary,

    #[error("{param} must be finite, got {value}")]
    NonFinite { param: &'static str, value: f32 },

    #[error("repeat_penalty must be positive, got {0}")]
    NonPositivePenalty(f32),
}

/// Per-call sampling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// `<= 0` selects greedy argmax.
    pub temperature: f32,
    /// Nucleus threshold; `1.0` (or anything outside `(0, 1)`) disables.
    pub top_p: f32,
    /// `<= 0` disables; clamped to the vocabulary size.
    pub top_k: i32,
    /// `1.0` disables.
    pub repeat_penalty: f32,
    /// Penalty lookback in tokens; `<= 0` means [`DEFAULT_REPEAT_LAST_N`].
    pub repeat_last_n: i32,
    /// `0` means [`DEFAULT_SEED`].
    pub seed: u32,
    /// Generation stops when the text ends with one of these.
    pub stop: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.95,
            top_k: 40,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            seed: 0,
            stop: Vec::new(),
        }
    }
}

impl SamplingConfig {
    pub fn effective_seed(&self) -> u32 {
        if self.seed == 0 {
            DEFAULT_SEED
        } else {
            self.seed
        }
    }

    pub fn effective_repeat_last_n(&self) -> usize {
        match usize::try_from(self.repeat_last_n) {
            Ok(0) | Err(_) => DEFAULT_REPEAT_LAST_N,
            Ok(n) => n,
        }
    }

    fn validate(&self) -> Result<(), SamplerInitError> {
        for (param, value) in [
            ("temperature", self.temperature),
            ("top_p", self.top_p),
            ("repeat_penalty", self.repeat_penalty),
        ] {
            if !value.is_finite() {
                return Err(SamplerInitError::NonFinite { param, value });
            }
        }
        if self.repeat_penalty <= 0.0 {
            return Err(SamplerInitError::NonPositivePenalty(self.repeat_penalty));
        }
        Ok(())
    }
}

/// Ordered sampler stages for one generation call.
#[derive(Debug, Clone)]
pub struct SamplerChain {
    stages: Vec<SamplerStage>,
}

impl SamplerChain {
    /// Build the pipeline for `config` over a vocabulary of `n_vocab`
    /// entries in a context of `n_ctx` tokens.
    ///
    /// Fails before any stage exists if the configuration cannot be honored.
    pub fn build(
        config: &SamplingConfig,
        n_vocab: usize,
        n_ctx: usize,
    ) -> Result<Self, SamplerInitError> {
        if n_vocab == 0 {
            return Err(SamplerInitError::EmptyVocabulary);
        }
        config.validate()?;

        let mut stages = Vec::with_capacity(5);

        if config.repeat_penalty != 1.0 || config.repeat_last_n > 0 {
            let window = config.effective_repeat_last_n().min(n_ctx);
            // Frequency and presence terms are carried but neutral.
            stages.push(SamplerStage::Penalties(Penalties::new(
                window,
                config.repeat_penalty,
                0.0,
                0.0,
            )));
        }

        if config.top_k > 0 {
            let k = (config.top_k as usize).min(n_vocab);
            stages.push(SamplerStage::TopK { k });
        }

        if config.top_p > 0.0 && config.top_p < 1.0 {
            stages.push(SamplerStage::TopP {
                p: config.top_p,
                min_keep: 1,
            });
        }

        if config.temperature > 0.0 {
            stages.push(SamplerStage::Temperature {
                temp: config.temperature,
            });
            stages.push(SamplerStage::Dist(Dist::new(config.effective_seed())));
        } else {
            stages.push(SamplerStage::Greedy);
        }

        let chain = Self { stages };
        debug!(stages = ?chain.stage_names(), "built sampler chain");
        Ok(chain)
    }

    /// Run `logits` through the stages and pick one token.
    ///
    /// Returns `None` only for an empty logit vector.
    pub fn sample(&mut self, logits: &[f32]) -> Option<Token> {
        let mut candidates = Candidates::from_logits(logits);
        if candidates.is_empty() {
            return None;
        }
        for stage in &mut self.stages {
            stage.apply(&mut candidates);
            if let Some(token) = candidates.selected() {
                return Some(token);
            }
        }
        candidates.best()
    }

    /// Report the token chosen by [`SamplerChain::sample`] to stateful stages.
    ///
    /// Must be called once per sampled token, before the next `sample`.
    pub fn accept(&mut self, token: Token) {
        for stage in &mut self.stages {
            stage.accept(token);
        }
    }

    pub fn stages(&self) -> &[SamplerStage] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(SamplerStage::name).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Index of the highest logit, scanning ids upward and replacing only on a
/// strictly greater value, so the first maximum wins.
pub fn argmax(logits: &[f32]) -> Option<Token> {
    let (&first, rest) = logits.split_first()?;
    let mut best_id = 0usize;
    let mut best = first;
    for (i, &logit) in rest.iter().enumerate() {
        if logit > best {
            best = logit;
            best_id = i + 1;
        }
    }
    Some(best_id as Token)
}
