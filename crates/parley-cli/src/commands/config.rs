use anyhow::{Context, Result};
use parley_infrastructure::ConfigService;
use std::path::PathBuf;

pub fn service(path: Option<PathBuf>) -> ConfigService {
    match path {
        Some(path) => ConfigService::with_path(path),
        None => ConfigService::new(),
    }
}

pub fn show(service: &ConfigService) -> Result<()> {
    let config = service.get_config().context("Failed to load configuration")?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}

pub fn path(service: &ConfigService) -> Result<()> {
    let path = service
        .config_path()
        .context("Failed to resolve the config file location")?;
    let state = if path.exists() { "" } else { " (not created yet)" };
    println!("{}{}", path.display(), state);
    Ok(())
}
