//! cli::commands
//!
//! Command handlers, one module per command family.
//!
//! Handlers build a [`Workspace`](crate::cli::context::Workspace) when they
//! need the project, stores or engine, call into the library, and print
//! through [`crate::ui::output`]. They hold no logic of their own beyond
//! formatting.

mod completion;
mod config_cmd;
mod doctor;
mod domain;
mod ports;
mod share;
mod sites;
mod stack_cmd;

use crate::cli::args::{Command, ConfigAction, DomainAction, PortsAction, SitesAction};
use crate::cli::context::Context;
use anyhow::Result;

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        // Stack lifecycle
        Command::Start { domain, tls, init } => stack_cmd::start(ctx, domain.as_deref(), tls, init),
        Command::Stop => stack_cmd::stop(ctx),
        Command::Restart => stack_cmd::restart(ctx),
        Command::Status { json } => stack_cmd::status(ctx, json),
        Command::Logs { follow, service } => stack_cmd::logs(ctx, follow, service.as_deref()),
        Command::Open => stack_cmd::open(ctx),
        Command::Share => share::share(ctx),

        // Routing and allocation
        Command::Domain { action } => match action {
            DomainAction::Bind {
                hostname,
                tls,
                port,
            } => domain::bind(ctx, &hostname, tls, port),
            DomainAction::Unbind { hostname } => domain::unbind(ctx, &hostname),
            DomainAction::List { json } => domain::list(ctx, json),
            DomainAction::Reconcile => domain::reconcile(ctx),
        },
        Command::Ports { action } => match action {
            PortsAction::List { json } => ports::list(ctx, json),
            PortsAction::Release { key } => ports::release(ctx, &key),
            PortsAction::Gc => ports::gc(ctx),
        },
        Command::Sites { action } => match action {
            SitesAction::Add { name, path } => sites::add(ctx, &name, path.as_deref()),
            SitesAction::Remove { name } => sites::remove(ctx, &name),
            SitesAction::List { json } => sites::list(ctx, json),
            SitesAction::Prune => sites::prune(ctx),
        },

        // Maintenance
        Command::Doctor {
            repair,
            acknowledge_corrupt,
        } => doctor::doctor(ctx, repair, acknowledge_corrupt),
        Command::Config { action } => match action {
            ConfigAction::Get { key } => config_cmd::get(ctx, &key),
            ConfigAction::Set { key, value } => config_cmd::set(ctx, &key, &value),
            ConfigAction::List => config_cmd::list(ctx),
            ConfigAction::Path => config_cmd::path(ctx),
        },
        Command::Completion { shell } => completion::completion(shell),
    }
}
