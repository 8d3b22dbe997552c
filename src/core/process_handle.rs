//! Process handle model - one launched OS process and its lifecycle

use serde::{Deserialize, Serialize};

/// Lifecycle of a launched process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Spawned, not yet pinned and supervised
    Starting,
    /// Process is alive
    Running,
    /// Process ended on its own
    Exited,
    /// Process was force-killed by the host
    Terminated,
}

impl ProcessState {
    /// Whether the process is gone for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited | ProcessState::Terminated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Exited => "exited",
            ProcessState::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A launched process as tracked by the launcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessHandle {
    pub pid: u32,
    /// Bit `n` set means the process may run on logical core `n`
    pub affinity_mask: u64,
    pub state: ProcessState,
}

impl ProcessHandle {
    /// A just-spawned process; the launcher marks it running once set up
    pub fn new(pid: u32, affinity_mask: u64) -> Self {
        Self {
            pid,
            affinity_mask,
            state: ProcessState::Starting,
        }
    }

    /// Index of the single core the process is pinned to, if exactly one
    pub fn pinned_core(&self) -> Option<u32> {
        if self.affinity_mask.count_ones() == 1 {
            Some(self.affinity_mask.trailing_zeros())
        } else {
            None
        }
    }
}
