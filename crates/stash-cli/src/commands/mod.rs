//! CLI command implementations

pub mod config;
pub mod records;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use stash_core::{Database, Registry, StashConfig};
use std::sync::Arc;

/// Effective configuration, with the `--namespace` flag applied last
pub fn load_config(namespace: Option<&str>) -> Result<StashConfig> {
    let mut config = StashConfig::load().context("Failed to load settings")?;
    if let Some(namespace) = namespace {
        config.namespace = namespace.to_string();
    }
    Ok(config)
}

/// Open the configured namespace
pub async fn open_database(namespace: Option<&str>) -> Result<Arc<Database>> {
    let config = load_config(namespace)?;
    let registry = Registry::from_config(&config)
        .await
        .with_context(|| format!("Failed to open {} backend", config.backend))?;
    let database = registry
        .database(&config.namespace)
        .await
        .with_context(|| format!("Failed to open namespace {}", config.namespace))?;
    Ok(database)
}

/// Split `key=value`, reading the value as JSON when it parses and as a
/// plain string otherwise
pub fn parse_assignment(assignment: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = assignment.split_once('=') else {
        bail!("Expected key=value, got: {}", assignment);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Missing field name in: {}", assignment);
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
