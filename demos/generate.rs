//! llama-gen demo: end-to-end text generation against a GGUF file.
//!
//! Loads the model, primes the prompt, runs the decode loop and prints the
//! text with a short summary. Greedy unless `--temperature` is positive.
//!
//!   cargo run --example generate --features llama-cpp -- model.gguf "The quick brown fox"

use clap::Parser;
use llama_gen::api::{self, GenerateRequest};
use llama_gen::backend::llama_cpp::LlamaCppEngine;
use llama_gen::SamplingConfig;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Generate text from a GGUF model")]
struct Args {
    model: PathBuf,

    #[arg(default_value = "The quick brown fox")]
    prompt: String,

    #[arg(short = 'n', long, default_value_t = 64)]
    n_predict: i32,

    /// Context size; 0 picks the default.
    #[arg(long, default_value_t = 0)]
    n_ctx: i32,

    /// `<= 0` decodes greedily.
    #[arg(long, default_value_t = 0.0)]
    temperature: f32,

    #[arg(long, default_value_t = 0.95)]
    top_p: f32,

    #[arg(long, default_value_t = 40)]
    top_k: i32,

    #[arg(long, default_value_t = 1.1)]
    repeat_penalty: f32,

    #[arg(long, default_value_t = 64)]
    repeat_last_n: i32,

    #[arg(long, default_value_t = 0)]
    seed: u32,

    /// Stop when the output ends with this string. Repeatable.
    #[arg(long = "stop")]
    stop: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let request = if args.temperature > 0.0 {
        let sampling = SamplingConfig {
            temperature: args.temperature,
            top_p: args.top_p,
            top_k: args.top_k,
            repeat_penalty: args.repeat_penalty,
            repeat_last_n: args.repeat_last_n,
            seed: args.seed,
            stop: args.stop,
        };
        GenerateRequest::sampled(&args.model, &args.prompt, args.n_predict, args.n_ctx, sampling)
    } else {
        GenerateRequest::greedy(&args.model, &args.prompt, args.n_predict, args.n_ctx)
    };

    println!("llama-gen: text generation via llama.cpp");
    println!("  Model: {}", args.model.display());
    println!("  Prompt: \"{}\"", args.prompt);
    println!("  Mode: {}", if request.sampling.is_some() { "sampled" } else { "greedy" });
    println!();

    let engine = LlamaCppEngine::init()?;
    let t0 = Instant::now();
    let out = api::run(&engine, &request)?;
    let ms = t0.elapsed().as_millis();

    println!("{}{}", args.prompt, out.text);
    println!();
    println!("Stats:");
    println!(
        "  Generated: {} tokens in {} ms (load included)",
        out.tokens.len(),
        ms
    );
    println!("  Stopped: {:?}", out.reason);
    Ok(())
}
