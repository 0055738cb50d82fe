//! Settings Persistence
//!
//! Persistent converter configuration with atomic file writes (temp file +
//! rename), schema defaults for forward compatibility, and tolerant loading:
//! a missing file yields defaults, a corrupt file is logged and replaced by
//! defaults rather than failing startup.
//!
//! Storage location: `{config_dir}/mediaforge/settings.json`

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::engines::EngineId;
use super::CoreResult;

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Default output-naming pieces applied in batch mode
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSettings {
    /// Output directory; `None` means same directory as each input
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Filename suffix appended to the input basename; may be empty
    #[serde(default = "default_suffix")]
    pub suffix: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: None,
            suffix: default_suffix(),
        }
    }
}

fn default_suffix() -> String {
    "_converted".to_string()
}

/// Process-wide converter configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverterSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Active conversion engine; read-only while a batch is running
    #[serde(default)]
    pub engine: EngineId,

    /// Path to the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Path to the ffprobe binary
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// Batch-mode output naming defaults
    #[serde(default)]
    pub output: OutputSettings,

    /// Root of the isolated AI runtime; `None` uses the platform default
    #[serde(default)]
    pub ai_runtime_dir: Option<PathBuf>,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            engine: EngineId::default(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            output: OutputSettings::default(),
            ai_runtime_dir: None,
        }
    }
}

impl ConverterSettings {
    /// Default settings file location under the platform config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mediaforge")
            .join(SETTINGS_FILE)
    }

    /// Loads settings from `path`.
    ///
    /// Missing file → defaults. Corrupt file → warn and defaults, so a bad
    /// write never blocks startup.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => settings,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Corrupt settings file; using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Saves settings atomically: write to a temp file, then rename over
    /// the destination.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ConverterSettings::default();
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.engine, EngineId::Ffmpeg);
        assert_eq!(settings.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(settings.output.suffix, "_converted");
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);

        let mut settings = ConverterSettings::default();
        settings.engine = EngineId::Fftool;
        settings.output.directory = Some(PathBuf::from("/exports"));
        settings.save(&path).unwrap();

        let loaded = ConverterSettings::load(&path);
        assert_eq!(loaded, settings);
        // No temp file left behind.
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ConverterSettings::load(&dir.path().join("nope.json"));
        assert_eq!(loaded, ConverterSettings::default());
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "{ this is not json").unwrap();

        let loaded = ConverterSettings::load(&path);
        assert_eq!(loaded, ConverterSettings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, r#"{"engine": "pixel"}"#).unwrap();

        let loaded = ConverterSettings::load(&path);
        assert_eq!(loaded.engine, EngineId::Pixel);
        assert_eq!(loaded.version, SETTINGS_VERSION);
        assert_eq!(loaded.ffprobe_path, PathBuf::from("ffprobe"));
    }
}
