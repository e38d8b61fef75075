//! `simguide config`: Show configuration.

use simguide_config::AppConfig;

pub fn run(show_default: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", render(show_default)?);
    Ok(())
}

fn render(show_default: bool) -> Result<String, Box<dyn std::error::Error>> {
    if show_default {
        return Ok(AppConfig::default_toml());
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let path = AppConfig::config_dir().join("config.toml");
    Ok(format!("# {}\n{}", path.display(), config.redacted_toml()))
}
