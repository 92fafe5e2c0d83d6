//! llama-gen: single-sequence token generation over llama.cpp.
//!
//! Turns a prompt into text one token at a time: greedy argmax or a
//! penalty / top-k / top-p / temperature sampler chain, stopping on
//! end-of-generation tokens, stop strings or a token budget. The model
//! itself sits behind the [`InferenceBackend`] trait; the llama.cpp
//! implementation is behind the `llama-cpp` feature.

pub mod api;
pub mod backend;
pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod sampling;
pub mod stop;
pub mod text;

pub use backend::{BackendError, InferenceBackend, Token};
pub use chat::ChatMessage;
pub use engine::{generate, DecodeLoop, DecodeOptions, FinishReason, Generation};
pub use error::{GenerateError, Result};
pub use sampling::{SamplerChain, SamplingConfig};
