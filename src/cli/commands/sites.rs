//! sites command - Manage site aliases

use std::path::Path;

use anyhow::{Context as _, Result};

use crate::cli::context::Context;
use crate::core::config::Config;
use crate::core::paths::SpinPaths;
use crate::sites::{SiteAlias, SiteDirectory};
use crate::ui::output::{self, Verbosity};

// Alias commands must work from any directory, so they skip project
// resolution and open the directory straight from the storage root.
fn directory() -> Result<SiteDirectory> {
    let paths = SpinPaths::discover().context("Failed to locate the wp-spin storage root")?;
    let config = Config::load(&paths, None).context("Failed to load config")?;
    Ok(SiteDirectory::open(&paths).with_lock_timeout(config.lock_timeout()))
}

pub fn add(ctx: &Context, name: &str, path: Option<&Path>) -> Result<()> {
    let verbosity = ctx.verbosity();
    let dir = match path {
        Some(path) => path.to_path_buf(),
        None => ctx.working_dir()?,
    };
    let alias = directory()?
        .add(name, &dir)
        .with_context(|| format!("Failed to add site '{}'", name))?;
    output::success(
        format!("{} -> {}", alias.name, alias.path.display()),
        verbosity,
    );
    Ok(())
}

pub fn remove(ctx: &Context, name: &str) -> Result<()> {
    let verbosity = ctx.verbosity();
    match directory()?
        .remove(name)
        .with_context(|| format!("Failed to remove site '{}'", name))?
    {
        Some(alias) => output::success(format!("Removed {}", alias.name), verbosity),
        None => output::print(format!("No site named '{}'", name), verbosity),
    }
    Ok(())
}

pub fn list(ctx: &Context, json: bool) -> Result<()> {
    let sites = directory()?.list().context("Failed to read sites")?;
    if json {
        output::json(&sites)?;
    } else if sites.is_empty() {
        output::print("No sites registered.", ctx.verbosity());
    } else {
        output::print(format_sites(&sites), Verbosity::Normal);
    }
    Ok(())
}

pub fn prune(ctx: &Context) -> Result<()> {
    let verbosity = ctx.verbosity();
    let pruned = directory()?.prune().context("Failed to prune sites")?;
    if pruned.is_empty() {
        output::print("Nothing to prune.", verbosity);
    } else {
        let lines: Vec<String> = pruned
            .iter()
            .map(|s| format!("{} ({})", s.name, s.path.display()))
            .collect();
        output::print(output::format_list(&lines, "  - "), verbosity);
        output::success(format!("Pruned {} site(s)", pruned.len()), verbosity);
    }
    Ok(())
}

fn format_sites(sites: &[SiteAlias]) -> String {
    let rows: Vec<Vec<String>> = sites
        .iter()
        .map(|s| {
            let path = if s.is_live() {
                s.path.display().to_string()
            } else {
                format!("{} (missing)", s.path.display())
            };
            vec![s.name.clone(), path]
        })
        .collect();
    output::format_table(&["NAME", "PATH"], &rows)
}
