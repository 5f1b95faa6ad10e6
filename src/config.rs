use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{AuthSettings, MissingDistancePolicy};
use facegate_vision::SourceSettings;

pub static CONFIG_PATH: Lazy<&'static Path> =
    Lazy::new(|| Path::new(option_env!("FACEGATE_CONFIG_PATH").unwrap_or("facegate.toml")));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    pub sample_interval_ms: u64,
    pub max_consecutive_failures: u32,
    pub store_dir: PathBuf,
    pub threshold: f64,
    pub missing_distance: MissingDistancePolicy,
    pub probe_count: usize,
    pub matcher: MatcherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            sample_interval_ms: 30,
            max_consecutive_failures: 100,
            store_dir: PathBuf::from("known_faces"),
            threshold: 0.6,
            missing_distance: MissingDistancePolicy::Deny,
            probe_count: 5,
            matcher: MatcherConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherBackend {
    /// External program printing a JSON result table.
    Command,
    /// In-process ONNX recognition model.
    Onnx,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub backend: MatcherBackend,
    pub model_name: String,
    pub detector_backend: String,
    pub enforce_detection: bool,
    pub command: Vec<String>,
    pub recognizer_model: PathBuf,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            backend: MatcherBackend::Command,
            model_name: "Facenet".to_string(),
            detector_backend: "mtcnn".to_string(),
            enforce_detection: false,
            command: vec!["deepface-find".to_string()],
            recognizer_model: PathBuf::from("models/face_recognition_sface_2021dec.onnx"),
        }
    }
}

impl Config {
    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            interval: Duration::from_millis(self.sample_interval_ms),
            max_consecutive_failures: self.max_consecutive_failures.max(1),
        }
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            store_dir: self.store_dir.clone(),
            threshold: self.threshold,
            missing_distance: self.missing_distance,
            model_name: self.matcher.model_name.clone(),
            detector_backend: self.matcher.detector_backend.clone(),
            enforce_detection: self.matcher.enforce_detection,
            temp_dir: None,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data).with_context(|| format!("writing config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = load_config(Some(&dir.path().join("absent.toml")))?;
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.threshold, 0.6);
        assert_eq!(cfg.sample_interval_ms, 30);
        Ok(())
    }

    #[test]
    fn partial_file_fills_in_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("facegate.toml");
        std::fs::write(
            &path,
            "threshold = 0.4\nmissing_distance = \"accept\"\n\n[matcher]\nbackend = \"onnx\"\n",
        )?;
        let cfg = load_config(Some(&path))?;
        assert_eq!(cfg.threshold, 0.4);
        assert_eq!(cfg.missing_distance, MissingDistancePolicy::Accept);
        assert_eq!(cfg.matcher.backend, MatcherBackend::Onnx);
        assert_eq!(cfg.matcher.model_name, "Facenet");
        assert_eq!(cfg.camera, "/dev/video0");
        Ok(())
    }

    #[test]
    fn save_then_load_preserves_values() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested/facegate.toml");
        let mut cfg = Config::default();
        cfg.camera = "/dev/video2".into();
        cfg.matcher.enforce_detection = true;
        save_config(&cfg, Some(&path))?;
        assert_eq!(load_config(Some(&path))?, cfg);
        Ok(())
    }

    #[test]
    fn malformed_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "threshold = \"high\"").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("bad.toml"));
    }

    #[test]
    fn failure_budget_is_at_least_one() {
        let cfg = Config {
            max_consecutive_failures: 0,
            ..Config::default()
        };
        assert_eq!(cfg.source_settings().max_consecutive_failures, 1);
    }
}
