//! stack::mock
//!
//! Scriptable container engine and host resources for tests.
//!
//! # Example
//!
//! ```
//! use wpspin::stack::mock::MockEngine;
//! use wpspin::stack::engine::ContainerEngine;
//!
//! let engine = MockEngine::new().with_daemon_running(false);
//! assert!(engine.check_binary().is_ok());
//! assert!(engine.check_daemon().is_err());
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::engine::{ContainerEngine, ContainerInfo};
use super::host::HostResources;
use crate::core::errors::SpinError;
use crate::core::process::ProcessOutput;

/// In-memory engine. Clones share state.
#[derive(Debug, Clone)]
pub struct MockEngine {
    inner: Arc<Mutex<MockEngineInner>>,
}

#[derive(Debug)]
struct MockEngineInner {
    binary_present: bool,
    daemon_running: bool,
    compose_present: bool,
    containers: Vec<ContainerInfo>,
    compose_results: VecDeque<ProcessOutput>,
    compose_calls: Vec<Vec<String>>,
    list_calls: usize,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockEngineInner {
                binary_present: true,
                daemon_running: true,
                compose_present: true,
                containers: Vec::new(),
                compose_results: VecDeque::new(),
                compose_calls: Vec::new(),
                list_calls: 0,
            })),
        }
    }
}

impl MockEngine {
    /// A healthy engine with no containers whose compose calls succeed.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockEngineInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_binary_present(self, present: bool) -> Self {
        self.state().binary_present = present;
        self
    }

    pub fn with_daemon_running(self, running: bool) -> Self {
        self.state().daemon_running = running;
        self
    }

    pub fn with_compose_present(self, present: bool) -> Self {
        self.state().compose_present = present;
        self
    }

    /// Replace the container listing.
    pub fn set_containers(&self, containers: Vec<ContainerInfo>) {
        self.state().containers = containers;
    }

    /// Queue the result of the next compose call. Unscripted calls succeed
    /// with empty output.
    pub fn push_compose_result(&self, code: i32, output: &str) {
        self.state().compose_results.push_back(ProcessOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: output.to_string(),
        });
    }

    /// Arguments of every compose call, in order.
    pub fn compose_calls(&self) -> Vec<Vec<String>> {
        self.state().compose_calls.clone()
    }

    /// Number of container listings requested.
    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    /// Convenience constructor for replica 1 of `service` in `project`.
    pub fn container(project: &str, service: &str, running: bool, host_ports: &[u16]) -> ContainerInfo {
        ContainerInfo {
            name: format!("{}-{}-1", project, service),
            service: service.to_string(),
            status: if running {
                "Up 2 minutes".to_string()
            } else {
                "Exited (0) 1 minute ago".to_string()
            },
            host_ports: host_ports.to_vec(),
        }
    }
}

impl ContainerEngine for MockEngine {
    fn check_binary(&self) -> Result<(), SpinError> {
        if self.state().binary_present {
            Ok(())
        } else {
            Err(SpinError::PrerequisiteMissing {
                what: "docker".into(),
                hint: "mock: not installed".into(),
            })
        }
    }

    fn check_daemon(&self) -> Result<(), SpinError> {
        if self.state().daemon_running {
            Ok(())
        } else {
            Err(SpinError::PrerequisiteNotRunning {
                what: "docker daemon".into(),
                hint: "mock: not running".into(),
            })
        }
    }

    fn check_compose(&self) -> Result<(), SpinError> {
        if self.state().compose_present {
            Ok(())
        } else {
            Err(SpinError::PrerequisiteMissing {
                what: "docker compose".into(),
                hint: "mock: not installed".into(),
            })
        }
    }

    fn compose(
        &self,
        _project_dir: &Path,
        _project_name: &str,
        _compose_file: &Path,
        args: &[&str],
        sink: &mut dyn FnMut(&str),
    ) -> Result<ProcessOutput, SpinError> {
        let result = {
            let mut state = self.state();
            state
                .compose_calls
                .push(args.iter().map(|a| a.to_string()).collect());
            state.compose_results.pop_front().unwrap_or(ProcessOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        };
        for line in result.stderr.lines().chain(result.stdout.lines()) {
            sink(line);
        }
        Ok(result)
    }

    fn list_containers(&self, _project_name: &str) -> Result<Vec<ContainerInfo>, SpinError> {
        let mut state = self.state();
        state.list_calls += 1;
        if !state.daemon_running {
            return Err(SpinError::PrerequisiteNotRunning {
                what: "docker daemon".into(),
                hint: "mock: not running".into(),
            });
        }
        Ok(state.containers.clone())
    }
}

/// Fixed host resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockResources {
    pub disk_mb: Option<u64>,
    pub memory_mb: Option<u64>,
}

impl MockResources {
    /// Plenty of everything.
    pub fn ample() -> Self {
        Self {
            disk_mb: Some(100_000),
            memory_mb: Some(16_000),
        }
    }
}

impl HostResources for MockResources {
    fn free_disk_mb(&self, _path: &Path) -> Option<u64> {
        self.disk_mb
    }

    fn available_memory_mb(&self) -> Option<u64> {
        self.memory_mb
    }
}
