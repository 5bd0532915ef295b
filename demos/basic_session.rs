//! Basic session demo.
//!
//! Sends one message with a read-only `list_files` tool available and
//! prints the events as they stream in.
//!
//! # Running
//!
//! ```bash
//! GEMINI_API_KEY=your_key cargo run --example basic_session
//! ```
//!
//! Other backends are picked with `AGENT_BACKEND` (`openai`, `ollama`,
//! `openai-compatible` with `AGENT_ENDPOINT`) and `AGENT_MODEL`:
//! ```bash
//! AGENT_BACKEND=openai AGENT_MODEL=gpt-4o OPENAI_API_KEY=your_key \
//!     cargo run --example basic_session
//! ```
//!
//! To see debug logs from the core:
//! ```bash
//! RUST_LOG=agent_core=debug GEMINI_API_KEY=your_key cargo run --example basic_session
//! ```

use agent_core::llm::{Credentials, Part, ProviderConfig, models};
use agent_core::providers::Provider;
use agent_core::{
    AgentClient, AutoApproveHooks, LoggingHooks, StreamEvent, Tool, ToolRegistry, ToolResult,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Lists the entries of a directory.
struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the files in a directory."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dir": {
                    "type": "string",
                    "description": "Directory to list, relative to the working directory"
                }
            }
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<ToolResult> {
        let dir = args.get("dir").and_then(Value::as_str).unwrap_or(".");
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read directory: {dir}"))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(ToolResult::new(names.join("\n")).with_display(format!("{} entries", names.len())))
    }
}

fn provider_config() -> Result<ProviderConfig> {
    let backend = std::env::var("AGENT_BACKEND").unwrap_or_else(|_| "gemini".to_owned());
    let (model, key_var) = match backend.as_str() {
        "gemini" => (models::DEFAULT_GEMINI_MODEL, Some("GEMINI_API_KEY")),
        "openai" | "openai-compatible" => (models::DEFAULT_OPENAI_MODEL, Some("OPENAI_API_KEY")),
        _ => ("llama3.1", None),
    };
    let model = std::env::var("AGENT_MODEL").unwrap_or_else(|_| model.to_owned());

    let mut config = ProviderConfig::new(backend, model);
    if let Some(key_var) = key_var {
        let key = std::env::var(key_var).with_context(|| format!("{key_var} must be set"))?;
        config = config.with_credentials(Credentials::api_key(key));
    }
    if let Ok(endpoint) = std::env::var("AGENT_ENDPOINT") {
        config = config.with_endpoint(endpoint);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = provider_config()?;
    let provider = Provider::from_config(&config)?;

    let mut tools = ToolRegistry::new();
    tools.register(ListFilesTool);

    let client = AgentClient::builder()
        .provider(provider)
        .model(config.model.clone())
        .generation_config(config.generation.clone())
        .tools(tools)
        .hooks(LoggingHooks::new(AutoApproveHooks))
        .build();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    println!("Using {} ({})\n", config.model, config.backend);

    let mut events = Box::pin(client.send_message_stream(
        vec![Part::text(
            "What files are in the current directory? Answer in one sentence.",
        )],
        cancel,
    ));
    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::Content { text } => print!("{text}"),
            StreamEvent::Thought { subject, .. } if !subject.is_empty() => {
                println!("[thinking: {subject}]");
            }
            StreamEvent::ToolCallRequest(call) => {
                println!("\n[tool] {} {}", call.name, call.args);
            }
            StreamEvent::UsageMetadata { usage, duration_ms } => {
                let total = usage.map_or(0, |u| u.total_token_count);
                println!("\n--- {total} tokens, {duration_ms} ms");
            }
            StreamEvent::ChatCompressed(info) => println!(
                "[history compressed: {} -> {} tokens]",
                info.original_token_count, info.new_token_count
            ),
            StreamEvent::UserCancelled => println!("\n[cancelled]"),
            StreamEvent::Error { message, .. } => eprintln!("\nError: {message}"),
            StreamEvent::Thought { .. } => {}
        }
    }

    Ok(())
}
