//! Agent runner harness binary
//!
//! Dispatches a single command through the protocol reader and prints
//! the event stream. Useful for checking agent installation and the
//! capability grant without the voice front-end:
//!
//! ```text
//! AGENT_BINARY=claude agent-runner "list the files here"
//! ```

use agent_runner::{AgentRunner, RunnerConfig, StreamEvent};
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agent_runner=info".parse().unwrap()),
        )
        .init();

    let prompt = match std::env::args().nth(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: agent-runner <command text>");
            std::process::exit(2);
        }
    };

    let config = load_config();
    let runner = match AgentRunner::new(config) {
        Ok(r) => r,
        Err(e) => {
            error!("Invalid runner configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut stream = match runner.dispatch(&prompt, None).await {
        Ok(s) => s,
        Err(e) => {
            error!("Dispatch failed: {}", e);
            std::process::exit(1);
        }
    };

    while let Some(event) = stream.next_event().await {
        match &event {
            StreamEvent::SessionInit {
                session_id,
                tool_count,
            } => println!("[INIT] session={} tools={}", session_id, tool_count),
            StreamEvent::Status(text) => println!("[STATUS] {}", text),
            StreamEvent::ToolInvocation { name, preview } => {
                println!("[TOOL] {}: {}", name, preview)
            }
            StreamEvent::ToolResult { preview, is_error } => {
                let tag = if *is_error { "ERR" } else { "OK" };
                println!("[RESULT:{}] {}", tag, preview)
            }
            StreamEvent::PartialResponse(_) => {}
            StreamEvent::FinalResponse(text) => println!("[SPEAK] {}", text),
            StreamEvent::SessionId(id) => println!("[SESSION] {}", id),
            StreamEvent::Error { kind, message } => {
                println!("[ERROR:{:?}] {}", kind, message)
            }
            StreamEvent::StreamEnd => break,
        }
    }

    info!("Turn complete");
}

/// Load runner configuration from the environment
fn load_config() -> RunnerConfig {
    let mut config = RunnerConfig::default();

    if let Ok(binary) = std::env::var("AGENT_BINARY") {
        config.binary = PathBuf::from(binary);
    }

    if let Ok(model) = std::env::var("AGENT_MODEL") {
        config.model = Some(model);
    }

    if let Ok(max_turns) = std::env::var("AGENT_MAX_TURNS") {
        if let Ok(n) = max_turns.parse() {
            config.max_turns = n;
        }
    }

    config
}
