//! Config command - inspect the effective configuration

use super::load_config;
use anyhow::Result;
use colored::Colorize;
use stash_core::StashConfig;

/// Show current configuration
pub async fn show(namespace: Option<&str>) -> Result<()> {
    let config = load_config(namespace)?;

    println!("{}", "Stash Configuration".bold().underline());
    println!();
    println!("  Home:        {}", StashConfig::stash_home().display());
    println!("  Settings:    {}", StashConfig::settings_path().display());
    println!("  Backend:     {}", config.backend.to_string().cyan());
    println!("  Data dir:    {}", config.data_dir.display());
    println!("  Database:    {}", config.database_path().display());
    println!("  Namespace:   {}", config.namespace.cyan());
    println!("  Primary key: {}", config.primary_key);

    Ok(())
}
