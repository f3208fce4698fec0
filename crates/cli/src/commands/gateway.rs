//! `rago serve`: start the HTTP proxy.

use rago_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("rago proxy");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Upstream:  {}", config.api_url);
    println!("   Model:     {}", config.default_model);

    rago_gateway::start(config).await?;

    Ok(())
}
