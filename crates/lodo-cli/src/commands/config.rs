//! Config command handlers

use anyhow::{bail, Context, Result};

use lodo_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load()?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        _ => {
            println!("Config file: {}", Config::config_file_path().display());
            println!();
            println!("data_dir     = {}", config.data_dir.display());
            println!(
                "sync_url     = {}",
                config.sync_url.as_deref().unwrap_or("(not set)")
            );
            println!("sync_enabled = {}", config.sync_enabled);
            println!("max_retries  = {}", config.max_retries);
        }
    }

    Ok(())
}

/// Set a configuration value and save
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load()?;

    match key.as_str() {
        "data_dir" => config.data_dir = value.clone().into(),
        "sync_url" => {
            config.sync_url = if value.is_empty() {
                None
            } else {
                Some(value.clone())
            }
        }
        "sync_enabled" => {
            config.sync_enabled = value.eq_ignore_ascii_case("true") || value == "1";
        }
        "max_retries" => {
            config.max_retries = value
                .parse()
                .with_context(|| format!("Invalid max_retries value: {}", value))?;
        }
        other => bail!(
            "Unknown config key '{}'. Valid keys: data_dir, sync_url, sync_enabled, max_retries",
            other
        ),
    }

    config.save()?;
    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}
