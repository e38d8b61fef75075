pub mod ask;
pub mod config_cmd;
pub mod serve;

use simguide_config::AppConfig;

/// Load the config and insist on an API key, printing setup help if missing.
pub(crate) fn load_with_key() -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Err(e) = config.require_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    SIMGUIDE_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add `api_key` to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err(e.into());
    }

    Ok(config)
}
