//! `simguide serve`: Start the HTTP API server.

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_with_key()?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("simguide gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:  {} ({})", config.provider, config.model);
    println!(
        "   Cache TTL: {}s, sessions keep {} turns",
        config.cache.ttl_secs, config.sessions.max_turns
    );

    simguide_gateway::start(config).await?;

    Ok(())
}
