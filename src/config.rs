//! Runtime resource knobs for the llama.cpp backend.
//!
//! The thread count comes from the environment so a host can tune it
//! without threading extra parameters through every call.

use std::num::NonZeroUsize;

/// Overrides the evaluation thread count when set to a positive integer.
pub const ENV_N_THREADS: &str = "LLAMA_GEN_N_THREADS";

/// Context size used when the caller passes a non-positive value.
pub const DEFAULT_N_CTX: u32 = 512;

/// Smallest context the backend will be asked for.
pub const MIN_N_CTX: u32 = 8;

/// Resolve a caller-supplied context size.
pub fn resolve_n_ctx(n_ctx: i32) -> u32 {
    let requested = u32::try_from(n_ctx).ok().filter(|&n| n > 0);
    requested.unwrap_or(DEFAULT_N_CTX).max(MIN_N_CTX)
}

/// Resource configuration for model loading and evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Worker threads for both single-token and batch evaluation.
    pub n_threads: usize,
    /// Always 0: evaluation stays on the CPU.
    pub n_gpu_layers: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            n_threads: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            n_gpu_layers: 0,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `LLAMA_GEN_N_THREADS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`RuntimeConfig::from_env`] with an injectable variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(n) = lookup(ENV_N_THREADS)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|&n| n > 0)
        {
            config.n_threads = usize::try_from(n).unwrap_or(config.n_threads);
        }
        config.n_threads = config.n_threads.max(1);
        config
    }
}
