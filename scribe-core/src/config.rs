//! Persistent configuration (JSON file) with `SCRIBE_*` environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audio::ENGINE_SAMPLE_RATE;
use crate::error::Result;
use crate::inference::models::{normalize_language, normalize_model_id};

const DEFAULT_MAX_CHUNK_SECONDS: f64 = 30.0;
const DEFAULT_OVERLAP_SECONDS: f64 = 2.0;
const DEFAULT_MAX_AUDIO_SECONDS: f64 = 1_800.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ScribeConfig {
    /// Rate the engine consumes. Only 16 kHz is defined.
    pub target_sample_rate: u32,
    pub model_id: String,
    pub language: String,
    pub thread_count: usize,
    pub translate: bool,
    pub max_chunk_seconds: f64,
    pub overlap_seconds: f64,
    /// Ceiling on the estimated engine memory of a model. 0 disables the check.
    pub memory_limit_mb: u32,
    /// Longer inputs are truncated before planning. 0 means unlimited.
    pub max_audio_seconds: f64,
    pub max_recording_seconds: f64,
    pub preferred_input_device: Option<String>,
}

impl Default for ScribeConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: ENGINE_SAMPLE_RATE,
            model_id: "base.en".into(),
            language: "en".into(),
            thread_count: default_thread_count(),
            translate: false,
            max_chunk_seconds: DEFAULT_MAX_CHUNK_SECONDS,
            overlap_seconds: DEFAULT_OVERLAP_SECONDS,
            memory_limit_mb: 2_048,
            max_audio_seconds: DEFAULT_MAX_AUDIO_SECONDS,
            max_recording_seconds: 120.0,
            preferred_input_device: None,
        }
    }
}

/// `min(8, available_parallelism)`.
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8)
}

impl ScribeConfig {
    pub fn normalize(&mut self) {
        if self.target_sample_rate != ENGINE_SAMPLE_RATE {
            warn!(
                requested = self.target_sample_rate,
                "engine only accepts 16 kHz, ignoring targetSampleRate"
            );
            self.target_sample_rate = ENGINE_SAMPLE_RATE;
        }
        self.model_id = normalize_model_id(&self.model_id);
        self.language = normalize_language(&self.language);
        self.thread_count = self.thread_count.clamp(1, 64);

        if !self.max_chunk_seconds.is_finite() || self.max_chunk_seconds <= 0.0 {
            self.max_chunk_seconds = DEFAULT_MAX_CHUNK_SECONDS;
        }
        self.max_chunk_seconds = self.max_chunk_seconds.clamp(1.0, 600.0);
        if !self.overlap_seconds.is_finite() || self.overlap_seconds <= 0.0 {
            self.overlap_seconds = DEFAULT_OVERLAP_SECONDS;
        }
        if self.overlap_seconds >= self.max_chunk_seconds {
            self.overlap_seconds = self.max_chunk_seconds / 10.0;
        }

        if !self.max_audio_seconds.is_finite() || self.max_audio_seconds < 0.0 {
            self.max_audio_seconds = DEFAULT_MAX_AUDIO_SECONDS;
        }
        if !self.max_recording_seconds.is_finite() {
            self.max_recording_seconds = 120.0;
        }
        self.max_recording_seconds = self.max_recording_seconds.clamp(1.0, 3_600.0);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    /// Apply `SCRIBE_*` environment variables, then re-normalize.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("SCRIBE_MODEL") {
            self.model_id = v;
        }
        if let Some(v) = get("SCRIBE_LANGUAGE") {
            self.language = v;
        }
        if let Some(v) = get("SCRIBE_THREADS").and_then(|v| v.trim().parse().ok()) {
            self.thread_count = v;
        }
        if let Some(v) = get("SCRIBE_TRANSLATE") {
            self.translate = matches!(v.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = get("SCRIBE_MAX_CHUNK_SECONDS").and_then(|v| v.trim().parse().ok()) {
            self.max_chunk_seconds = v;
        }
        if let Some(v) = get("SCRIBE_OVERLAP_SECONDS").and_then(|v| v.trim().parse().ok()) {
            self.overlap_seconds = v;
        }
        self.normalize();
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Scribe")
            .join("config.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("scribe")
            .join("config.json")
    }
}

/// Load and normalize the config at `path`. A missing file yields defaults.
///
/// # Errors
/// `Config` for malformed JSON, `Io` for unreadable files.
pub fn load_config(path: &Path) -> Result<ScribeConfig> {
    let mut config = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<ScribeConfig>(&raw)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ScribeConfig::default(),
        Err(e) => return Err(e.into()),
    };
    config.normalize();
    Ok(config)
}

pub fn save_config(path: &Path, config: &ScribeConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScribeError;
    use std::collections::HashMap;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.model_id, "base.en");
        assert_eq!(config.max_chunk_seconds, 30.0);
        assert_eq!(config.overlap_seconds, 2.0);
        assert!(config.thread_count >= 1 && config.thread_count <= 8);
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = ScribeConfig {
            model_id: "small".into(),
            language: "de".into(),
            translate: true,
            max_chunk_seconds: 20.0,
            overlap_seconds: 4.0,
            ..ScribeConfig::default()
        };

        save_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.model_id, "small");
        assert_eq!(loaded.language, "de");
        assert!(loaded.translate);
        assert_eq!(loaded.max_chunk_seconds, 20.0);
    }

    #[test]
    fn partial_json_uses_camel_case_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "modelId": "Tiny-EN", "language": "English", "overlapSeconds": 45 }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.model_id, "tiny.en");
        assert_eq!(config.language, "en");
        // Overlap can never reach the chunk length.
        assert_eq!(config.overlap_seconds, 3.0);
        assert_eq!(config.memory_limit_mb, 2_048);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(&path), Err(ScribeError::Config(_))));
    }

    #[test]
    fn normalize_repairs_out_of_range_values() {
        let mut config = ScribeConfig {
            target_sample_rate: 44_100,
            thread_count: 0,
            max_chunk_seconds: f64::NAN,
            overlap_seconds: -1.0,
            max_audio_seconds: -5.0,
            preferred_input_device: Some("   ".into()),
            ..ScribeConfig::default()
        };
        config.normalize();

        assert_eq!(config.target_sample_rate, 16_000);
        assert_eq!(config.thread_count, 1);
        assert_eq!(config.max_chunk_seconds, 30.0);
        assert_eq!(config.overlap_seconds, 2.0);
        assert_eq!(config.max_audio_seconds, 1_800.0);
        assert_eq!(config.preferred_input_device, None);
    }

    #[test]
    fn env_overrides_apply_and_normalize() {
        let vars: HashMap<&str, &str> = [
            ("SCRIBE_MODEL", "large"),
            ("SCRIBE_LANGUAGE", "french"),
            ("SCRIBE_THREADS", "3"),
            ("SCRIBE_TRANSLATE", "true"),
            ("SCRIBE_MAX_CHUNK_SECONDS", "not a number"),
            ("SCRIBE_OVERLAP_SECONDS", "1.5"),
        ]
        .into_iter()
        .collect();

        let mut config = ScribeConfig::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.model_id, "large-v3");
        assert_eq!(config.language, "fr");
        assert_eq!(config.thread_count, 3);
        assert!(config.translate);
        assert_eq!(config.max_chunk_seconds, 30.0);
        assert_eq!(config.overlap_seconds, 1.5);
    }
}
