//! `sagebot ask` — Run one turn and stream the answer to stdout.

use super::CommandResult;
use async_trait::async_trait;
use sagebot_agent::{SinkClosed, StreamSink, TurnOutcome, TurnRequest};
use sagebot_config::AppConfig;
use sagebot_core::error::TurnError;
use std::io::Write;

/// Writes chunks to stdout as they arrive.
struct StdoutSink;

#[async_trait]
impl StreamSink for StdoutSink {
    async fn on_chunk(&mut self, text: &str) -> Result<(), SinkClosed> {
        let mut out = std::io::stdout().lock();
        out.write_all(text.as_bytes()).map_err(|_| SinkClosed)?;
        out.flush().map_err(|_| SinkClosed)
    }

    async fn on_end(&mut self) {
        println!();
    }

    async fn on_error(&mut self, error: &TurnError) {
        eprintln!("{}", error.terminal_fragment().trim());
    }
}

pub async fn run(message: String, page_url: Option<String>) -> CommandResult {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    SAGEBOT_API_KEY=...");
        eprintln!("    GEMINI_API_KEY=...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let engine = sagebot_gateway::build_engine(&config)?;

    let mut request = TurnRequest::new(message);
    if let Some(url) = page_url {
        request = request.with_page_url(url);
    }

    match engine.run(&request, &mut StdoutSink).await {
        TurnOutcome::Answered { .. } => Ok(()),
        TurnOutcome::Failed { error, .. } => Err(error.into()),
    }
}
