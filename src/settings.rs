//! Host settings
//!
//! Read from `<config_dir>/gamebridge/settings.toml` unless a path is given.
//!
//! ```toml
//! [discovery]
//! url = "http://localhost:8080/server-info"
//! max_attempts = 5
//! delay_ms = 2000
//!
//! [launcher]
//! arguments = ["-window"]
//! affinity_core = 0
//! show_window = true
//! cleanup_sweeps = 3
//! default_executable = "C:\\Games\\Warcraft III\\war3.exe"
//!
//! [bridge]
//! bind = "127.0.0.1:19400"
//!
//! [logging]
//! file = "gamebridge.log"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::bridge::server::DEFAULT_BIND;
use crate::core::RetryPolicy;
use crate::discovery::DEFAULT_DISCOVERY_URL;
use crate::host::LauncherOptions;

const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub discovery: DiscoverySettings,
    pub launcher: LauncherSettings,
    pub bridge: BridgeSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub url: String,
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            url: DEFAULT_DISCOVERY_URL.to_string(),
            max_attempts: policy.max_attempts(),
            delay_ms: policy.delay_between_attempts().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherSettings {
    pub arguments: Vec<String>,
    pub affinity_core: usize,
    pub show_window: bool,
    pub cleanup_sweeps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_executable: Option<PathBuf>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        let options = LauncherOptions::default();
        Self {
            arguments: Vec::new(),
            affinity_core: options.affinity_core,
            show_window: options.show_window,
            cleanup_sweeps: options.cleanup_sweeps,
            default_executable: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub bind: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gamebridge").join(SETTINGS_FILE))
    }

    /// Load from `explicit` if given, else from the default location.
    ///
    /// Problems with the default file are reported and replaced by defaults;
    /// problems with an explicit file are errors.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        let Some(path) = Self::default_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        match Self::load_from(&path) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                // Logging may not be up yet
                eprintln!("Ignoring settings at {}: {:#}", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid settings file {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.discovery.max_attempts,
            Duration::from_millis(self.discovery.delay_ms),
        )
    }

    pub fn launcher_options(&self) -> LauncherOptions {
        LauncherOptions {
            affinity_core: self.launcher.affinity_core,
            show_window: self.launcher.show_window,
            cleanup_sweeps: self.launcher.cleanup_sweeps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.discovery.url, "http://localhost:8080/server-info");
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
        assert_eq!(settings.launcher_options(), LauncherOptions::default());
        assert_eq!(settings.bridge.bind, "127.0.0.1:19400");
        assert!(settings.launcher.arguments.is_empty());
        assert!(settings.logging.file.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let settings = Settings::parse(
            r#"
            [discovery]
            max_attempts = 2

            [launcher]
            arguments = ["-window", "-nativefullscr"]
            show_window = false
            "#,
        )
        .unwrap();

        assert_eq!(
            settings.retry_policy(),
            RetryPolicy::new(2, Duration::from_millis(2000))
        );
        assert_eq!(settings.launcher.arguments, vec!["-window", "-nativefullscr"]);
        assert!(!settings.launcher_options().show_window);
        assert_eq!(settings.launcher_options().cleanup_sweeps, 3);
        assert_eq!(settings.bridge, BridgeSettings::default());
    }

    #[test]
    fn test_malformed_file() {
        assert!(Settings::parse("[discovery]\nmax_attempts = \"many\"").is_err());
        assert!(Settings::parse("not = [toml").is_err());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[bridge]\nbind = \"127.0.0.1:0\"\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.bridge.bind, "127.0.0.1:0");

        assert!(Settings::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let mut settings = Settings::default();
        settings.launcher.default_executable = Some(PathBuf::from("/games/war3"));
        let text = toml::to_string(&settings).unwrap();
        assert_eq!(Settings::parse(&text).unwrap(), settings);
    }
}
