//! `rago config`: configuration inspection.

use rago_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();

            if !config.has_api_key() {
                warnings.push("No API key set (set RAGO_API_KEY or GROQ_API_KEY)");
            }

            if config.gateway.host == "0.0.0.0" {
                warnings.push("Gateway bound to 0.0.0.0; the Command action is reachable from the network");
            }

            if config.command_policy.allowed_commands.iter().any(|c| c == "*") {
                warnings.push("command_policy allows any command line");
            }

            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Upstream:  {}", config.api_url);
            println!("   Model:     {}", config.default_model);
            println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
            println!("   Rounds:    {}", config.orchestration.max_rounds);
            println!("   Fixtures:  {}", config.lights.fixtures.join(", "));
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.api_key.is_some() {
        config.api_key = Some("***".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
