//! Process tree snapshots and forced termination
//!
//! A snapshot is taken from the live OS process table every time it is
//! needed. Helpers can appear while a sweep is running, so callers sweep
//! repeatedly instead of trusting an older snapshot.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use thiserror::Error;

/// Pause between sweeps that killed something
const SWEEP_SETTLE: Duration = Duration::from_millis(50);

/// One row of the OS process table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent_pid: u32,
    /// Process group (Unix only)
    pub group_id: Option<u32>,
    /// OS start time in platform units (clock ticks since boot on Linux,
    /// FILETIME on Windows). Only compared against other start times.
    pub started: Option<u64>,
}

/// A descendant could not be killed. Never fatal.
#[derive(Debug, Error)]
pub enum CleanupWarning {
    #[error("Process {0} vanished before it could be killed")]
    Vanished(u32),

    #[error("Not permitted to kill process {0}")]
    Denied(u32),

    #[error("Failed to kill process {pid}: {message}")]
    Os { pid: u32, message: String },
}

/// Result of [`terminate_tree`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub killed: usize,
    /// Descendants still alive once every sweep was used
    pub survivors: Vec<u32>,
}

/// Descendants of one root process at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTreeSnapshot {
    root: u32,
    descendants: Vec<u32>,
}

impl ProcessTreeSnapshot {
    /// Read the process table now and collect everything below `root`.
    ///
    /// A root that no longer exists simply has no children. A table that
    /// cannot be read yields an empty snapshot.
    pub fn capture(root: u32, root_started: Option<u64>) -> Self {
        match process_table() {
            Ok(table) => Self::from_table(root, root_started, &table),
            Err(e) => {
                tracing::warn!(root, error = %e, "Could not read the process table");
                Self {
                    root,
                    descendants: Vec::new(),
                }
            }
        }
    }

    /// Build a snapshot from an already captured table.
    ///
    /// Children of `root` come first in breadth-first order, followed by
    /// members of the root's process group that were re-parented elsewhere
    /// (and their own children).
    ///
    /// Parent ids can be stale once a parent has exited and its pid was
    /// handed to another process. A child that started before the process
    /// now holding its parent pid is not followed, and when the root pid
    /// itself belongs to a process other than `root_started`, nothing hangs
    /// off it.
    pub fn from_table(root: u32, root_started: Option<u64>, table: &[ProcessEntry]) -> Self {
        let current_root = table.iter().find(|e| e.pid == root).and_then(|e| e.started);
        let root_reused = matches!(
            (root_started, current_root),
            (Some(ours), Some(now)) if ours != now
        );

        let mut seen = HashSet::from([root]);
        let mut descendants = Vec::new();
        let mut queue = VecDeque::new();

        if root_reused {
            tracing::debug!(root, "Root pid was reused; ignoring its children");
        } else {
            queue.push_back((root, root_started.or(current_root)));
            collect_children(table, &mut queue, &mut seen, &mut descendants);
        }

        for entry in table {
            if entry.group_id == Some(root) && seen.insert(entry.pid) {
                descendants.push(entry.pid);
                queue.push_back((entry.pid, entry.started));
                collect_children(table, &mut queue, &mut seen, &mut descendants);
            }
        }

        Self { root, descendants }
    }

    pub fn pids(&self) -> &[u32] {
        &self.descendants
    }

    pub fn is_empty(&self) -> bool {
        self.descendants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.descendants.len()
    }
}

fn collect_children(
    table: &[ProcessEntry],
    queue: &mut VecDeque<(u32, Option<u64>)>,
    seen: &mut HashSet<u32>,
    out: &mut Vec<u32>,
) {
    while let Some((parent, parent_started)) = queue.pop_front() {
        for entry in table {
            if entry.parent_pid != parent || entry.pid == parent {
                continue;
            }
            // Older than its supposed parent: the parent pid was reused
            if let (Some(child), Some(parent)) = (entry.started, parent_started) {
                if child < parent {
                    continue;
                }
            }
            if seen.insert(entry.pid) {
                out.push(entry.pid);
                queue.push_back((entry.pid, entry.started));
            }
        }
    }
}

/// Kill every descendant of `root`, sweeping up to `sweeps` times until a
/// snapshot comes back empty.
///
/// Blocking; run it off the async executor.
pub fn terminate_tree(root: u32, root_started: Option<u64>, sweeps: u32) -> CleanupSummary {
    if root <= 1 {
        tracing::warn!(root, "Refusing to clean up a system process tree");
        return CleanupSummary::default();
    }

    let own_pid = std::process::id();
    let mut killed = HashSet::new();

    for sweep in 1..=sweeps.max(1) {
        let snapshot = ProcessTreeSnapshot::capture(root, root_started);
        let targets: Vec<u32> = snapshot
            .pids()
            .iter()
            .copied()
            .filter(|pid| *pid > 1 && *pid != own_pid && !killed.contains(pid))
            .collect();

        if targets.is_empty() {
            tracing::debug!(root, sweep, "No descendants left");
            return CleanupSummary {
                killed: killed.len(),
                survivors: Vec::new(),
            };
        }

        tracing::debug!(root, sweep, found = snapshot.len(), "Sweeping descendants");
        for pid in targets {
            match force_kill(pid) {
                Ok(()) => {
                    tracing::info!(root, pid, "Terminated descendant process");
                    killed.insert(pid);
                }
                Err(CleanupWarning::Vanished(pid)) => {
                    tracing::debug!(root, pid, "Descendant already gone");
                }
                Err(warning) => {
                    tracing::warn!(root, %warning, "Cleanup warning");
                }
            }
        }

        std::thread::sleep(SWEEP_SETTLE);
    }

    let last = ProcessTreeSnapshot::capture(root, root_started);
    if !last.is_empty() {
        tracing::warn!(
            root,
            sweeps,
            survivors = ?last.pids(),
            "Descendants still alive after the last cleanup sweep"
        );
    }

    CleanupSummary {
        killed: killed.len(),
        survivors: last.descendants,
    }
}

/// Whether `pid` is currently a live (non-zombie) process
#[cfg(test)]
pub fn is_alive(pid: u32) -> bool {
    process_table()
        .map(|table| table.iter().any(|entry| entry.pid == pid))
        .unwrap_or(false)
}

/// OS start time of `pid`, comparable with [`ProcessEntry::started`]
#[cfg(target_os = "linux")]
pub fn start_time(pid: u32) -> Option<u64> {
    let pid = i32::try_from(pid).ok()?;
    procfs::process::Process::new(pid)
        .and_then(|process| process.stat())
        .map(|stat| stat.starttime)
        .ok()
}

#[cfg(windows)]
pub fn start_time(pid: u32) -> Option<u64> {
    use windows::Win32::Foundation::{CloseHandle, FILETIME};
    use windows::Win32::System::Threading::{
        GetProcessTimes, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;

        let mut created = FILETIME::default();
        let mut exited = FILETIME::default();
        let mut kernel = FILETIME::default();
        let mut user = FILETIME::default();
        let result = GetProcessTimes(handle, &mut created, &mut exited, &mut kernel, &mut user);
        let _ = CloseHandle(handle);
        result.ok()?;

        Some(((created.dwHighDateTime as u64) << 32) | created.dwLowDateTime as u64)
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
pub fn start_time(_pid: u32) -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn process_table() -> std::io::Result<Vec<ProcessEntry>> {
    let processes = procfs::process::all_processes().map_err(std::io::Error::other)?;

    Ok(processes
        .filter_map(|process| process.ok())
        .filter_map(|process| process.stat().ok())
        .filter(|stat| !matches!(stat.state, 'Z' | 'X'))
        .map(|stat| ProcessEntry {
            pid: stat.pid as u32,
            parent_pid: stat.ppid as u32,
            group_id: Some(stat.pgrp as u32),
            started: Some(stat.starttime),
        })
        .collect())
}

#[cfg(windows)]
fn process_table() -> std::io::Result<Vec<ProcessEntry>> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };

    let mut table = Vec::new();

    unsafe {
        let snapshot =
            CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0).map_err(std::io::Error::other)?;

        let mut entry: PROCESSENTRY32W = std::mem::zeroed();
        entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;

        if Process32FirstW(snapshot, &mut entry).is_ok() {
            loop {
                table.push(ProcessEntry {
                    pid: entry.th32ProcessID,
                    parent_pid: entry.th32ParentProcessID,
                    group_id: None,
                    started: start_time(entry.th32ProcessID),
                });
                if Process32NextW(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }

        let _ = CloseHandle(snapshot);
    }

    Ok(table)
}

#[cfg(not(any(target_os = "linux", windows)))]
fn process_table() -> std::io::Result<Vec<ProcessEntry>> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process table enumeration is not implemented for this platform",
    ))
}

#[cfg(unix)]
fn force_kill(pid: u32) -> Result<(), CleanupWarning> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| CleanupWarning::Vanished(pid))?;

    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(CleanupWarning::Vanished(pid)),
        Err(Errno::EPERM) => Err(CleanupWarning::Denied(pid)),
        Err(e) => Err(CleanupWarning::Os {
            pid,
            message: e.to_string(),
        }),
    }
}

#[cfg(windows)]
fn force_kill(pid: u32) -> Result<(), CleanupWarning> {
    use windows::Win32::Foundation::{CloseHandle, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER};
    use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, false, pid).map_err(|e| {
            if e.code() == ERROR_INVALID_PARAMETER.to_hresult() {
                CleanupWarning::Vanished(pid)
            } else if e.code() == ERROR_ACCESS_DENIED.to_hresult() {
                CleanupWarning::Denied(pid)
            } else {
                CleanupWarning::Os {
                    pid,
                    message: e.to_string(),
                }
            }
        })?;

        let result = TerminateProcess(handle, 1);
        let _ = CloseHandle(handle);

        result.map_err(|e| CleanupWarning::Os {
            pid,
            message: e.to_string(),
        })
    }
}
