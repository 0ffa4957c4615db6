//! Configuration for the headless player.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use scrview_core::{FrameSize, PlaybackConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Decode settings.
    pub playback: PlaybackConfig,
    /// Viewers to register, one sink each.
    pub viewers: Vec<ViewerConfig>,
    /// Last-image snapshot of the first viewer.
    pub snapshot: SnapshotConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// One viewer's output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerConfig {
    pub width: u32,
    pub height: u32,
}

impl ViewerConfig {
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// Snapshot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    /// Output path of the binary PPM image.
    pub path: PathBuf,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("snapshot.ppm"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl PlayerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// The default configuration as TOML, with one example viewer.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        let cfg = Self {
            viewers: vec![ViewerConfig {
                width: 540,
                height: 1140,
            }],
            ..Self::default()
        };
        toml::to_string_pretty(&cfg)
    }
}

// ── Tests ────────────────────────────────────────────────────────
