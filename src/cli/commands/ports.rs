//! ports command - List, release and garbage-collect port allocations

use anyhow::{Context as _, Result};

use crate::cli::context::{Context, Workspace};
use crate::core::types::AllocationKey;
use crate::ports::PortAllocation;
use crate::ui::output::{self, Verbosity};

pub fn list(ctx: &Context, json: bool) -> Result<()> {
    let ws = Workspace::open(ctx)?;
    let allocations = ws.registry.list().context("Failed to read port registry")?;
    if json {
        output::json(&allocations)?;
    } else if allocations.is_empty() {
        output::print("No ports allocated.", ctx.verbosity());
    } else {
        output::print(format_allocations(&allocations), Verbosity::Normal);
    }
    Ok(())
}

/// Release one allocation. Unknown keys are not an error.
pub fn release(ctx: &Context, key: &str) -> Result<()> {
    let verbosity = ctx.verbosity();
    let ws = Workspace::open(ctx)?;
    let key = AllocationKey::raw(key);
    match ws
        .registry
        .release(&key)
        .with_context(|| format!("Failed to release {}", key))?
    {
        Some(allocation) => output::success(
            format!("Released port {} ({})", allocation.port, allocation.key),
            verbosity,
        ),
        None => output::print(format!("No allocation for {}", key), verbosity),
    }
    Ok(())
}

/// Release allocations of projects that no longer exist.
pub fn gc(ctx: &Context) -> Result<()> {
    let verbosity = ctx.verbosity();
    let ws = Workspace::open(ctx)?;
    let released = ws
        .registry
        .garbage_collect()
        .context("Failed to collect stale allocations")?;
    if released.is_empty() {
        output::print("No stale allocations.", verbosity);
        return Ok(());
    }
    let lines: Vec<String> = released
        .iter()
        .map(|a| format!("{} ({})", a.port, a.key))
        .collect();
    output::print(output::format_list(&lines, "  - "), verbosity);
    output::success(format!("Released {} allocation(s)", released.len()), verbosity);
    Ok(())
}

fn format_allocations(allocations: &[PortAllocation]) -> String {
    let rows: Vec<Vec<String>> = allocations
        .iter()
        .map(|a| {
            let project = if a.is_live() {
                a.project_path.display().to_string()
            } else {
                format!("{} (missing)", a.project_path.display())
            };
            vec![a.port.to_string(), a.key.to_string(), project]
        })
        .collect();
    output::format_table(&["PORT", "KEY", "PROJECT"], &rows)
}
