//! llama-gen demo: the decode loop without a model file.
//!
//! Drives generation against `ScriptedBackend`, whose "model" spells out a
//! fixed script, and shows each way a call can finish.
//!
//!   RUST_LOG=llama_gen=debug cargo run --example scripted

use llama_gen::backend::scripted::ScriptedBackend;
use llama_gen::{generate, DecodeOptions, SamplingConfig, Token};
use tracing_subscriber::EnvFilter;

const EOS: Token = 300;

fn spelled(text: &str) -> Vec<Token> {
    text.bytes().map(Token::from).collect()
}

fn backend(script: &str) -> ScriptedBackend {
    let mut tokens = spelled(script);
    tokens.push(EOS);
    ScriptedBackend::new(512)
        .with_bos(1)
        .with_eog(EOS)
        .with_piece(EOS, "")
        .with_script(tokens)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let script = "Paris. Next question: Rome.";

    let out = generate(&mut backend(script), "Capital of France?", DecodeOptions::greedy(64))?;
    println!("greedy, EOS:      {:?} ({:?})", out.text, out.reason);

    let out = generate(&mut backend(script), "Capital of France?", DecodeOptions::greedy(5))?;
    println!("greedy, budget 5: {:?} ({:?})", out.text, out.reason);

    let sampling = SamplingConfig {
        temperature: 0.7,
        stop: vec!["Next question:".to_string()],
        ..SamplingConfig::default()
    };
    let out = generate(
        &mut backend(script),
        "Capital of France?",
        DecodeOptions::sampled(64, sampling),
    )?;
    println!("sampled, stop:    {:?} ({:?})", out.text, out.reason);
    Ok(())
}
