//! Host module for launching programs and managing their process trees

pub mod affinity;
pub mod launcher;
pub mod process_tree;

pub use launcher::{ExitReport, LaunchError, LaunchOutcome, Launcher, LauncherOptions, SessionHandle};
