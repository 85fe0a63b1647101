//! stack::state
//!
//! Lifecycle states and the per-project marker that carries them across
//! invocations.
//!
//! # State machine
//!
//! ```text
//! Stopped --start--> Starting --ok--> Running
//! Running --stop---> Stopping --ok--> Stopped
//! any     --failure mid-operation---> Degraded
//! Degraded --start/stop ok----------> Running / Stopped
//! ```
//!
//! # Marker
//!
//! `<project>/.wp-spin/state.json` records the last state this tool put the
//! stack in. A marker left in `Starting` or `Stopping` with no invocation
//! holding the project operation lock belongs to an interrupted run and is
//! read as `Degraded`.

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::errors::SpinError;
use crate::core::paths::SpinPaths;
use crate::core::store::write_atomic;

/// Lifecycle state of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackStatus {
    Unknown,
    Stopped,
    Starting,
    Running,
    Stopping,
    Degraded,
}

impl StackStatus {
    /// True for the in-flight states.
    pub fn is_transient(self) -> bool {
        matches!(self, StackStatus::Starting | StackStatus::Stopping)
    }

    /// Validate that `op` may begin from this state and return the
    /// in-flight state it moves to.
    ///
    /// `self` must already account for interrupted runs, i.e. a transient
    /// state here means another invocation is mid-operation.
    pub fn begin(self, op: StackOperation) -> Result<StackStatus, String> {
        if self.is_transient() {
            return Err(format!(
                "cannot {} while the stack is {} in another invocation",
                op, self
            ));
        }
        Ok(match op {
            StackOperation::Start | StackOperation::Restart => StackStatus::Starting,
            StackOperation::Stop => StackStatus::Stopping,
        })
    }

    /// State after `op` completed successfully.
    pub fn settled(op: StackOperation) -> StackStatus {
        match op {
            StackOperation::Start | StackOperation::Restart => StackStatus::Running,
            StackOperation::Stop => StackStatus::Stopped,
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StackStatus::Unknown => "unknown",
            StackStatus::Stopped => "stopped",
            StackStatus::Starting => "starting",
            StackStatus::Running => "running",
            StackStatus::Stopping => "stopping",
            StackStatus::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// A lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOperation {
    Start,
    Stop,
    Restart,
}

impl fmt::Display for StackOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StackOperation::Start => "start",
            StackOperation::Stop => "stop",
            StackOperation::Restart => "restart",
        };
        f.write_str(s)
    }
}

/// Persisted per-project marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackMarker {
    pub state: StackStatus,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl StackMarker {
    /// Read the marker for a project. Missing or unreadable markers read as
    /// `None`; the marker is advisory and never blocks an operation.
    pub fn load(project_root: &Path) -> Option<Self> {
        let path = SpinPaths::project_state_path(project_root);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "ignoring unreadable stack marker");
                None
            }
        }
    }

    /// Record `state` for a project.
    pub fn save(
        project_root: &Path,
        state: StackStatus,
        last_error: Option<String>,
    ) -> Result<(), SpinError> {
        let path = SpinPaths::project_state_path(project_root);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| SpinError::io(dir, e))?;
        }
        let marker = StackMarker {
            state,
            updated_at: Utc::now(),
            last_error,
        };
        let content = serde_json::to_string_pretty(&marker)
            .map_err(|e| SpinError::io(&path, std::io::Error::other(e)))?;
        write_atomic(&path, content.as_bytes())
    }

    /// The state to act on, given whether another invocation is mid-operation.
    pub fn effective_state(&self, operation_in_flight: bool) -> StackStatus {
        if self.state.is_transient() && !operation_in_flight {
            StackStatus::Degraded
        } else {
            self.state
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn start_and_stop_from_settled_states() {
        for state in [
            StackStatus::Unknown,
            StackStatus::Stopped,
            StackStatus::Running,
            StackStatus::Degraded,
        ] {
            assert_eq!(state.begin(StackOperation::Start), Ok(StackStatus::Starting));
            assert_eq!(state.begin(StackOperation::Stop), Ok(StackStatus::Stopping));
        }
    }

    #[test]
    fn in_flight_states_reject_operations() {
        assert!(StackStatus::Starting.begin(StackOperation::Start).is_err());
        assert!(StackStatus::Stopping.begin(StackOperation::Restart).is_err());
    }

    #[test]
    fn settled_states() {
        assert_eq!(StackStatus::settled(StackOperation::Start), StackStatus::Running);
        assert_eq!(StackStatus::settled(StackOperation::Restart), StackStatus::Running);
        assert_eq!(StackStatus::settled(StackOperation::Stop), StackStatus::Stopped);
    }

    #[test]
    fn interrupted_marker_reads_as_degraded() {
        let marker = StackMarker {
            state: StackStatus::Starting,
            updated_at: Utc::now(),
            last_error: None,
        };
        assert_eq!(marker.effective_state(false), StackStatus::Degraded);
        assert_eq!(marker.effective_state(true), StackStatus::Starting);
    }

    #[test]
    fn marker_roundtrip_on_disk() {
        let temp = TempDir::new().unwrap();
        assert!(StackMarker::load(temp.path()).is_none());

        StackMarker::save(temp.path(), StackStatus::Degraded, Some("exit 1".into())).unwrap();
        let marker = StackMarker::load(temp.path()).unwrap();
        assert_eq!(marker.state, StackStatus::Degraded);
        assert_eq!(marker.last_error.as_deref(), Some("exit 1"));
    }

    #[test]
    fn garbage_marker_is_ignored() {
        let temp = TempDir::new().unwrap();
        let path = SpinPaths::project_state_path(temp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();
        assert!(StackMarker::load(temp.path()).is_none());
    }
}
