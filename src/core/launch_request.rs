//! Launch request model - what to start, where, and with which arguments

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why a user-supplied path was refused as a launch target
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidExecutable {
    #[error("Path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("File is not executable: {0}")]
    NotExecutable(PathBuf),
}

/// An immutable description of one program launch.
///
/// The working directory is always the executable's parent directory; legacy
/// games resolve their data files relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    executable: PathBuf,
    working_directory: PathBuf,
    arguments: Vec<String>,
}

impl LaunchRequest {
    /// Build a request for `executable`. No filesystem checks happen here;
    /// the OS start call is the authority on whether the file can run.
    pub fn new<I, S>(executable: impl Into<PathBuf>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let executable = executable.into();
        let working_directory = match executable.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Self {
            executable,
            working_directory,
            arguments: arguments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }
}

/// Check that `path` names an existing, executable regular file.
///
/// On Windows only `.exe` files are accepted, which is the same filter the
/// file picker offers.
pub fn validate_executable(path: impl AsRef<Path>) -> Result<PathBuf, InvalidExecutable> {
    let path = path.as_ref();
    let metadata =
        std::fs::metadata(path).map_err(|_| InvalidExecutable::NotFound(path.to_path_buf()))?;

    if !metadata.is_file() {
        return Err(InvalidExecutable::NotAFile(path.to_path_buf()));
    }

    if !is_executable(path, &metadata) {
        return Err(InvalidExecutable::NotExecutable(path.to_path_buf()));
    }

    Ok(path.to_path_buf())
}

#[cfg(unix)]
fn is_executable(_path: &Path, metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(path: &Path, _metadata: &std::fs::Metadata) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
}
