//! `sagebot serve` — Start the HTTP chat gateway.

use super::CommandResult;
use sagebot_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> CommandResult {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("🌿 sagebot gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.model);
    println!("   Storage:   {:?}", config.storage.backend);

    sagebot_gateway::start(config).await
}
