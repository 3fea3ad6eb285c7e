//! Terminal settings

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use usbser_detect::ScannerConfig;
use usbser_protocol::LineConfig;

/// Bytes appended to every line typed into the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    None,
    Cr,
    Lf,
    #[default]
    CrLf,
}

impl LineEnding {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnding::None => b"",
            LineEnding::Cr => b"\r",
            LineEnding::Lf => b"\n",
            LineEnding::CrLf => b"\r\n",
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Line configuration applied after opening a port
    #[serde(default)]
    pub line: LineConfig,
    /// Duration of `~b` breaks in milliseconds
    #[serde(default = "default_break_ms")]
    pub break_ms: u64,
    /// Show received data as hex instead of text
    #[serde(default)]
    pub show_hex: bool,
    /// Line ending sent after each input line
    #[serde(default)]
    pub line_ending: LineEnding,
    /// Which kinds of port `list` and `open` look for
    #[serde(default)]
    pub scanner: ScannerConfig,
}

fn default_break_ms() -> u64 {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            line: LineConfig::default(),
            break_ms: default_break_ms(),
            show_hex: false,
            line_ending: LineEnding::default(),
            scanner: ScannerConfig::default(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for usbser
    /// Uses $XDG_CONFIG_HOME/usbser on Linux/macOS, falls back to ~/.config/usbser
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("usbser"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("usbser"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        Self::settings_path()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|s| match serde_json::from_str(&s) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    tracing::warn!("Ignoring invalid settings file: {}", e);
                    None
                }
            })
            .unwrap_or_default()
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::settings_path().context("could not determine settings path")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(self).context("failed to serialize settings")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;

        Ok(path)
    }

    pub fn break_duration(&self) -> Duration {
        Duration::from_millis(self.break_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usbser_protocol::Parity;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.line.to_string(), "9600 8N1");
        assert_eq!(settings.break_duration(), Duration::from_millis(100));
        assert_eq!(settings.line_ending.as_bytes(), b"\r\n");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"show_hex": true, "line_ending": "lf"}"#).unwrap();
        assert!(settings.show_hex);
        assert_eq!(settings.line_ending, LineEnding::Lf);
        assert_eq!(settings.break_ms, 100);
        assert!(settings.scanner.include_loopback);
    }

    #[test]
    fn test_round_trip_keeps_line() {
        let mut settings = Settings::default();
        settings.line.baud_rate = 115_200;
        settings.line.parity = Parity::Even;
        let json = serde_json::to_string_pretty(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
