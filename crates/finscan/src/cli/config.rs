use std::path::Path;

use anyhow::{Context, Result};

use finscan_core::ExtractorConfig;

/// File values first, then environment overrides.
pub fn load(path: Option<&Path>) -> Result<ExtractorConfig> {
    let config = match path {
        Some(p) => ExtractorConfig::from_file(p)
            .with_context(|| format!("failed to load config {}", p.display()))?
            .with_env_overrides()?,
        None => ExtractorConfig::from_env()?,
    };
    Ok(config)
}

pub fn run(path: Option<&Path>) -> Result<()> {
    let config = load(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
