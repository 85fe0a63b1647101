//! config command - Get, set, or list configuration values

use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};

use crate::cli::context::Context;
use crate::core::config::Config;
use crate::core::paths::SpinPaths;
use crate::ui::output::{self, Verbosity};

/// Global config and the file `set` writes to.
fn load() -> Result<(Config, PathBuf)> {
    let paths = SpinPaths::discover().context("Failed to locate the wp-spin storage root")?;
    let config = Config::load(&paths, None).context("Failed to load config")?;
    let path = config
        .global_config_loaded_from()
        .map(PathBuf::from)
        .unwrap_or_else(|| paths.config_path());
    Ok((config, path))
}

/// Every known key with its effective value.
fn effective(config: &Config) -> Vec<(&'static str, String)> {
    let words = |items: &[String]| items.join(" ");
    vec![
        ("engine.binary", config.engine_binary().to_string()),
        (
            "engine.compose",
            config
                .compose_override()
                .map(words)
                .unwrap_or_else(|| format!("{} compose", config.engine_binary())),
        ),
        ("ports.scan_window", config.scan_window().to_string()),
        ("ports.bind_retries", config.bind_retries().to_string()),
        ("proxy.reload_command", words(&config.proxy_reload_command())),
        ("proxy.upstream_host", config.proxy_upstream_host().to_string()),
        ("tls.issuer", config.tls_issuer().to_string()),
        ("resources.min_disk_mb", config.min_disk_mb().to_string()),
        ("resources.min_memory_mb", config.min_memory_mb().to_string()),
        ("tunnel.binary", config.tunnel_binary().to_string()),
        ("tunnel.api_url", config.tunnel_api_url().to_string()),
        (
            "tunnel.timeout_secs",
            config.tunnel_timeout().as_secs().to_string(),
        ),
        ("locks.timeout_secs", config.lock_timeout().as_secs().to_string()),
    ]
}

/// Get a configuration value.
pub fn get(_ctx: &Context, key: &str) -> Result<()> {
    let (config, path) = load()?;
    if let Some(value) = Config::get_key(&path, key).context("Failed to read config")? {
        match value {
            toml::Value::String(s) => println!("{}", s),
            other => println!("{}", other),
        }
        return Ok(());
    }

    match effective(&config).into_iter().find(|(k, _)| *k == key) {
        Some((_, value)) => println!("{}", value),
        None => bail!("Unknown configuration key: {}", key),
    }
    Ok(())
}

/// Set a configuration value.
pub fn set(ctx: &Context, key: &str, value: &str) -> Result<()> {
    let (_, path) = load()?;
    Config::set_key(&path, key, value).with_context(|| format!("Failed to set {}", key))?;
    output::success(format!("Set {} = {}", key, value), ctx.verbosity());
    Ok(())
}

/// List all configuration values.
pub fn list(_ctx: &Context) -> Result<()> {
    let (config, path) = load()?;
    let origin = if path.exists() {
        path.display().to_string()
    } else {
        "defaults".to_string()
    };
    output::print(format!("# Global configuration ({})", origin), Verbosity::Normal);
    for (key, value) in effective(&config) {
        output::print(format!("{} = {}", key, value), Verbosity::Normal);
    }
    Ok(())
}

/// Print the global config file location.
pub fn path(_ctx: &Context) -> Result<()> {
    let (_, path) = load()?;
    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_values_cover_defaults() {
        let values = effective(&Config::default());
        let get = |key: &str| {
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("ports.scan_window"), "1000");
        assert_eq!(get("engine.compose"), "docker compose");
        assert_eq!(get("locks.timeout_secs"), "10");
    }
}
