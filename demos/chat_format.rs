//! llama-gen demo: format a conversation with a model's chat template.
//!
//!   cargo run --example chat_format --features llama-cpp -- model.gguf

use clap::Parser;
use llama_gen::api;
use llama_gen::backend::llama_cpp::LlamaCppEngine;
use llama_gen::ChatMessage;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Apply a chat template to a short conversation")]
struct Args {
    model: PathBuf,

    /// Template string to use instead of the model's built-in one.
    #[arg(long)]
    template: Option<String>,

    /// Do not open an assistant turn at the end.
    #[arg(long)]
    no_assistant: bool,

    /// Conversation as a JSON array of `{"role", "content"}` objects.
    #[arg(long)]
    messages: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let messages: Vec<ChatMessage> = match &args.messages {
        Some(json) => serde_json::from_str(json)?,
        None => vec![
            ChatMessage::new("system", "You are a concise assistant."),
            ChatMessage::new("user", "Name three primary colors."),
        ],
    };

    let engine = LlamaCppEngine::init()?;
    let prompt = api::chat_format(
        &engine,
        &args.model,
        &messages,
        args.template.as_deref(),
        !args.no_assistant,
    )?;
    println!("{prompt}");
    Ok(())
}
