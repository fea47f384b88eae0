//! Settings persistence.
//!
//! One YAML file holds everything a deployment may want to change without a
//! rebuild: where the bundled mod sources live, the remembered install path
//! per game, automation timing, and the status color rules. Missing file or
//! missing keys fall back to defaults, so a fresh checkout runs without any
//! configuration step.

use crate::automation::{AutomationTuning, ColorClassifier};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::{debug, info};

pub const SETTINGS_FILE: &str = "souls-configurator.yaml";

fn default_data_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("Data")
}

/// Automation timing and status colors, all overridable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSettings {
    /// Completion poll cadence in milliseconds.
    pub poll_interval_ms: u64,
    /// Total completion budget in milliseconds.
    pub completion_budget_ms: u64,
    /// Pause after launching a tool before touching its window.
    pub settle_delay_ms: u64,
    /// Grace period after a close request before the tool is killed.
    pub close_grace_ms: u64,
    /// Status color rules for tools with themed palettes.
    pub colors: ColorClassifier,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            completion_budget_ms: 30_000,
            settle_delay_ms: 2_000,
            close_grace_ms: 2_000,
            colors: ColorClassifier::default(),
        }
    }
}

impl AutomationSettings {
    pub fn tuning(&self) -> AutomationTuning {
        AutomationTuning {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            completion_budget: Duration::from_millis(self.completion_budget_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            close_grace: Duration::from_millis(self.close_grace_ms),
            ..AutomationTuning::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the bundled mod sources.
    pub data_dir: Utf8PathBuf,
    /// Remembered install path per game name.
    pub install_paths: IndexMap<String, Utf8PathBuf>,
    pub automation: AutomationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            install_paths: IndexMap::new(),
            automation: AutomationSettings::default(),
        }
    }
}

impl Settings {
    pub fn install_path(&self, game: &str) -> Option<&Utf8Path> {
        self.install_paths.get(game).map(Utf8PathBuf::as_path)
    }

    pub fn set_install_path(&mut self, game: &str, path: Utf8PathBuf) {
        self.install_paths.insert(game.to_string(), path);
    }
}

/// Loads and saves the settings file in a configuration directory.
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: Utf8PathBuf) -> Result<Self> {
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory {config_dir}"))?;
        Ok(Self { config_dir })
    }

    pub fn settings_path(&self) -> Utf8PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }

    /// Load settings, falling back to defaults when no file exists yet.
    pub fn load_settings(&self) -> Result<Settings> {
        let path = self.settings_path();
        if !path.is_file() {
            debug!(%path, "no settings file, using defaults");
            return Ok(Settings::default());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {path}"))?;
        let settings = serde_yaml_ng::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {path}"))?;
        info!(%path, "loaded settings");
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let path = self.settings_path();
        let contents =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings")?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write settings to {path}"))?;
        info!(%path, "saved settings");
        Ok(())
    }
}
