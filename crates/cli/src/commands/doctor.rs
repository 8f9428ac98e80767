//! `sagebot doctor` — Diagnose configuration and provider health.

use super::CommandResult;
use sagebot_config::AppConfig;
use sagebot_core::provider::GenerateRequest;
use sagebot_core::turn::Prompt;

pub async fn run() -> CommandResult {
    println!("🩺 sagebot Doctor — System Diagnostics");
    println!("======================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file: {}", config_path.display());
    } else {
        println!("  ⚠️  No config file, using defaults (run `sagebot init`)");
    }

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            return Ok(());
        }
    };

    println!("\n  Resolved configuration:");
    println!("    model:            {}", config.model);
    println!("    api base url:     {}", config.api_base_url);
    println!("    retry:            {} attempts, step {}ms", config.retry.max_attempts, config.retry.backoff_step_ms);
    println!("    turn deadline:    {}s", config.turn.deadline_secs);
    println!("    history limit:    {}", config.turn.history_limit);
    println!("    retrieval k:      {}", config.turn.retrieval_k);
    println!("    gateway:          {}:{}", config.gateway.host, config.gateway.port);
    println!("    storage:          {:?}", config.storage.backend);
    println!(
        "    knowledge index:  {}",
        config.knowledge.index_path.as_deref().unwrap_or("(none)")
    );
    println!();

    if config.market.price_api_key.is_some() {
        println!("  ✅ Price API key configured");
    } else {
        println!("  ⚠️  No price API key, getAssetPrice will fail (set TWELVEDATA_API_KEY)");
        issues += 1;
    }

    if !config.has_api_key() {
        println!("  ❌ No API key configured (set GEMINI_API_KEY)");
        issues += 1;
    } else {
        match sagebot_gateway::build_provider(&config) {
            Ok(provider) => {
                let request = GenerateRequest::new(&config.model, Prompt::new("ping"));
                match provider.generate(request).await {
                    Ok(_) => println!("  ✅ Provider '{}' reachable", provider.name()),
                    Err(e) => {
                        println!("  ❌ Provider '{}' unreachable: {e}", provider.name());
                        issues += 1;
                    }
                }
            }
            Err(e) => {
                println!("  ❌ Provider could not be built: {e}");
                issues += 1;
            }
        }
    }

    if let Some(path) = &config.knowledge.index_path {
        if std::path::Path::new(path).exists() {
            println!("  ✅ Knowledge index found");
        } else {
            println!("  ❌ Knowledge index missing: {path}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
