//! doctor command - Diagnose and repair persisted state
//!
//! Nothing is changed without an explicit flag:
//! - `--acknowledge-corrupt` lifts write refusal on quarantined stores
//! - `--repair` applies every repair the doctor knows

use anyhow::{anyhow, Context as _, Result};

use crate::cli::context::{Context, Workspace};
use crate::doctor::{Doctor, RepairOutcome};
use crate::ui::output::{self, Verbosity};

pub fn doctor(ctx: &Context, repair: bool, acknowledge_corrupt: bool) -> Result<()> {
    let verbosity = ctx.verbosity();
    let ws = Workspace::open(ctx)?;
    let router = ws.router();
    let doctor = Doctor::new(&ws.engine, &ws.registry, &router, &ws.sites);

    if acknowledge_corrupt {
        let lifted = doctor
            .acknowledge_corrupt()
            .context("Failed to acknowledge corrupt stores")?;
        if lifted.is_empty() {
            output::print("No stores were quarantined.", verbosity);
        }
        for store in lifted {
            output::success(format!("Writes resumed for {}", store.display()), verbosity);
        }
    }

    let diagnosis = doctor.diagnose().context("Diagnosis failed")?;

    if repair && diagnosis.has_repairable_issues() {
        let outcome = doctor.repair().context("Repair failed")?;
        output::print(format_outcome(&outcome), verbosity);

        let after = doctor.diagnose().context("Diagnosis failed")?;
        output::print("", verbosity);
        output::print(after.format(), Verbosity::Normal);
        return finish(after.has_blocking_issues());
    }

    output::print(diagnosis.format(), Verbosity::Normal);
    if !repair && diagnosis.has_repairable_issues() {
        output::print("\nRun 'wp-spin doctor --repair' to fix warnings.", verbosity);
    }
    finish(diagnosis.has_blocking_issues())
}

fn finish(blocking: bool) -> Result<()> {
    if blocking {
        Err(anyhow!("blocking issues found"))
    } else {
        Ok(())
    }
}

fn format_outcome(outcome: &RepairOutcome) -> String {
    if outcome.is_noop() {
        return "Nothing to repair.".to_string();
    }
    let mut lines = Vec::new();
    let report = &outcome.reconciled;
    for host in report.added.iter().chain(&report.updated) {
        lines.push(format!("resynced binding {}", host));
    }
    for host in &report.removed {
        lines.push(format!("dropped binding {}", host));
    }
    for binding in &outcome.unbound {
        lines.push(format!("unbound {}", binding.hostname));
    }
    for allocation in &outcome.released {
        lines.push(format!("released port {} ({})", allocation.port, allocation.key));
    }
    for alias in &outcome.pruned {
        lines.push(format!("pruned site {}", alias.name));
    }
    lines.join("\n")
}
