//! `sagebot init` — Write a default config file.

use super::CommandResult;
use sagebot_config::AppConfig;

pub fn run(force: bool) -> CommandResult {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("🌿 sagebot — Setup");
    println!("==================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    }

    if config_path.exists() && !force {
        println!("  Config already exists: {}", config_path.display());
        println!("  Pass --force to overwrite it.");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Wrote {}", config_path.display());

    println!();
    println!("Next steps:");
    println!("  1. Set your Gemini key:   export GEMINI_API_KEY=...");
    println!("  2. Set a price API key:   export TWELVEDATA_API_KEY=...");
    println!("  3. Check the setup:       sagebot doctor");
    println!("  4. Start the server:      sagebot serve");

    Ok(())
}
