//! CPU affinity for launched processes
//!
//! Old game builds misbehave when their threads migrate between cores, so
//! every launched process is pinned to exactly one logical core. This is a
//! compatibility shim, not isolation.

use thiserror::Error;

/// Highest core index representable in an affinity mask
const MAX_CORES: usize = 64;

#[derive(Debug, Error)]
pub enum AffinityError {
    #[error("CPU affinity is not supported on this platform")]
    Unsupported,

    #[error("No usable core in the host's affinity set")]
    NoCore,

    #[error("Failed to set affinity for process {pid}: {message}")]
    Os { pid: u32, message: String },
}

/// Pick `preferred` when the host may run there, else the first allowed core
pub fn choose_core(preferred: usize, allowed: &[usize]) -> Option<usize> {
    if allowed.contains(&preferred) {
        Some(preferred)
    } else {
        allowed.iter().copied().min()
    }
}

/// Mask with only `core` set
pub fn single_core_mask(core: usize) -> u64 {
    if core < MAX_CORES {
        1u64 << core
    } else {
        0
    }
}

/// Restrict `pid` to one core and return the mask that was applied
pub fn pin_to_single_core(pid: u32, preferred: usize) -> Result<u64, AffinityError> {
    let allowed = host_allowed_cores()?;
    let core = choose_core(preferred, &allowed).ok_or(AffinityError::NoCore)?;
    apply(pid, core)?;
    Ok(single_core_mask(core))
}

#[cfg(target_os = "linux")]
fn host_allowed_cores() -> Result<Vec<usize>, AffinityError> {
    use nix::sched::{sched_getaffinity, CpuSet};
    use nix::unistd::Pid;

    let own = sched_getaffinity(Pid::from_raw(0)).map_err(|e| AffinityError::Os {
        pid: std::process::id(),
        message: e.to_string(),
    })?;

    Ok((0..CpuSet::count().min(MAX_CORES))
        .filter(|core| own.is_set(*core).unwrap_or(false))
        .collect())
}

#[cfg(target_os = "linux")]
fn apply(pid: u32, core: usize) -> Result<(), AffinityError> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let os_error = |e: nix::errno::Errno| AffinityError::Os {
        pid,
        message: e.to_string(),
    };

    let raw = i32::try_from(pid).map_err(|_| AffinityError::Os {
        pid,
        message: "pid out of range".to_string(),
    })?;

    let mut set = CpuSet::new();
    set.set(core).map_err(os_error)?;
    sched_setaffinity(Pid::from_raw(raw), &set).map_err(os_error)
}

#[cfg(windows)]
fn host_allowed_cores() -> Result<Vec<usize>, AffinityError> {
    use windows::Win32::System::Threading::{GetCurrentProcess, GetProcessAffinityMask};

    let mut process_mask = 0usize;
    let mut system_mask = 0usize;

    unsafe {
        GetProcessAffinityMask(GetCurrentProcess(), &mut process_mask, &mut system_mask).map_err(
            |e| AffinityError::Os {
                pid: std::process::id(),
                message: e.to_string(),
            },
        )?;
    }

    Ok((0..usize::BITS as usize)
        .filter(|core| process_mask & (1usize << core) != 0)
        .collect())
}

#[cfg(windows)]
fn apply(pid: u32, core: usize) -> Result<(), AffinityError> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{
        OpenProcess, SetProcessAffinityMask, PROCESS_QUERY_LIMITED_INFORMATION,
        PROCESS_SET_INFORMATION,
    };

    let os_error = |e: windows::core::Error| AffinityError::Os {
        pid,
        message: e.to_string(),
    };

    unsafe {
        let handle = OpenProcess(
            PROCESS_SET_INFORMATION | PROCESS_QUERY_LIMITED_INFORMATION,
            false,
            pid,
        )
        .map_err(os_error)?;

        let result = SetProcessAffinityMask(handle, 1usize << core);
        let _ = CloseHandle(handle);
        result.map_err(os_error)
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
fn host_allowed_cores() -> Result<Vec<usize>, AffinityError> {
    Err(AffinityError::Unsupported)
}

#[cfg(not(any(target_os = "linux", windows)))]
fn apply(_pid: u32, _core: usize) -> Result<(), AffinityError> {
    Err(AffinityError::Unsupported)
}
