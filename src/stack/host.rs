//! stack::host
//!
//! Free disk and memory on the host, for the checks run before a new
//! project is created.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::core::process;

/// Host resource queries. `None` means the value cannot be determined on
/// this host and the check is skipped.
pub trait HostResources {
    /// Free disk space on the filesystem holding `path`, in MB.
    fn free_disk_mb(&self, path: &Path) -> Option<u64>;

    /// Memory available to new processes, in MB.
    fn available_memory_mb(&self) -> Option<u64>;
}

/// Resources read from `df` and `/proc/meminfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResources;

impl HostResources for SystemResources {
    fn free_disk_mb(&self, path: &Path) -> Option<u64> {
        let target = path.to_string_lossy();
        let out = process::run("df", &["-Pk", &target], None).ok()?;
        if !out.success() {
            debug!(output = %out.combined(), "df failed");
            return None;
        }
        parse_df_available_kb(&out.stdout).map(|kb| kb / 1024)
    }

    fn available_memory_mb(&self) -> Option<u64> {
        let content = fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo_available_kb(&content).map(|kb| kb / 1024)
    }
}

/// `df -Pk` prints a header then `fs blocks used available capacity mount`.
fn parse_df_available_kb(output: &str) -> Option<u64> {
    output
        .lines()
        .nth(1)?
        .split_whitespace()
        .nth(3)?
        .parse()
        .ok()
}

fn parse_meminfo_available_kb(content: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        line.strip_prefix("MemAvailable:")?
            .split_whitespace()
            .next()?
            .parse()
            .ok()
    })
}
