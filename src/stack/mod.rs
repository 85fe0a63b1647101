//! stack
//!
//! Container stack lifecycle for one project.
//!
//! # Architecture
//!
//! - [`engine`] wraps the container engine and compose CLIs
//! - [`compose`] reads and rewrites published ports in the compose file
//! - [`role`] classifies containers (app, database, admin UI, auxiliary)
//! - [`state`] holds the lifecycle state machine and the per-project marker
//! - [`host`] reads free disk and memory for creation-time checks
//! - [`controller`] ties them together: prerequisites, port
//!   reconciliation, start/stop/restart and status
//! - [`mock`] provides engine and resource doubles for tests

pub mod compose;
pub mod controller;
pub mod engine;
pub mod host;
pub mod mock;
pub mod role;
pub mod state;

pub use controller::{PortChange, PrereqScope, StackController, StackDescriptor, StackSettings};
pub use engine::{ContainerEngine, ContainerInfo, DockerCli};
pub use role::ContainerRole;
pub use state::{StackMarker, StackOperation, StackStatus};
