//! Core data models shared by the launcher, discovery client and bridge

mod discovery_result;
mod launch_request;
mod process_handle;

pub use discovery_result::*;
pub use launch_request::*;
pub use process_handle::*;
