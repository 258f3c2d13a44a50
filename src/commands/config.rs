use anyhow::Result;
use colored::Colorize;
use fanlog::config::{self, Settings};
use std::path::Path;
use tracing::info;

/// Execute the config show command
///
/// Displays the effective configuration with the privacy salt masked
pub fn show(path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());
    info!(path = %path.display(), "Loading configuration for display");

    let settings = config::load_settings(path)?;
    let sanitized = sanitize_secrets(&settings);

    println!("{}", "Current Configuration:".green().bold());
    println!();
    println!("{}", toml::to_string_pretty(&sanitized)?);

    Ok(())
}

/// Execute the config validate command
pub fn validate(path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());

    let settings = config::load_settings(path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Database: {}", settings.storage.database_url);
    println!("  Registry: {}", settings.storage.registry_path.display());
    println!(
        "  Shared cache: {}",
        if settings.storage.cache_enabled { "enabled" } else { "disabled" }
    );
    println!(
        "  Rotation: {}",
        if settings.rotation.enabled {
            format!("every {}s", settings.rotation.interval_seconds)
        } else {
            "disabled".to_string()
        }
    );
    if settings.privacy.salt.is_empty() {
        println!("  {}", "Warning: privacy.salt is empty".yellow());
    }

    info!("Configuration validation successful");
    Ok(())
}

fn sanitize_secrets(settings: &Settings) -> Settings {
    let mut sanitized = settings.clone();
    sanitized.privacy.salt = mask_secret(&settings.privacy.salt);
    sanitized
}

/// Keep the first and last two characters of secrets longer than eight.
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}...{}", head, tail)
}
