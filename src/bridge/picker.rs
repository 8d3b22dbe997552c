//! File pickers the bridge can delegate executable selection to

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Something that can ask the user for an executable path
#[async_trait]
pub trait FilePicker: Send + Sync {
    /// `Ok(None)` when the user cancelled
    async fn pick_executable(&self) -> anyhow::Result<Option<PathBuf>>;
}

/// Always answers with a preconfigured path
pub struct FixedPicker {
    path: Option<PathBuf>,
}

impl FixedPicker {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl FilePicker for FixedPicker {
    async fn pick_executable(&self) -> anyhow::Result<Option<PathBuf>> {
        Ok(self.path.clone())
    }
}

/// Asks on the host console; an empty line cancels
pub struct ConsolePicker;

#[async_trait]
impl FilePicker for ConsolePicker {
    async fn pick_executable(&self) -> anyhow::Result<Option<PathBuf>> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(b"Executable to launch (empty to cancel): ").await?;
        stdout.flush().await?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

        let path = line.trim();
        if path.is_empty() {
            Ok(None)
        } else {
            Ok(Some(PathBuf::from(path)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_picker() {
        let picker = FixedPicker::new(Some(PathBuf::from("/games/war3.exe")));
        assert_eq!(
            picker.pick_executable().await.unwrap(),
            Some(PathBuf::from("/games/war3.exe"))
        );

        let picker = FixedPicker::new(None);
        assert_eq!(picker.pick_executable().await.unwrap(), None);
    }
}
