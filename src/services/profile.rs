//! Per-game profile: where the game lives, which mods it offers, and which
//! prerequisite policy applies.

use crate::error::InstallError;
use crate::models::mods::backup_variant;
use crate::models::{FileDropMod, ModCapability};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tracing::{debug, info};

/// How a game obtains its mod-loading engine.
///
/// The engine is a prerequisite, not a mod the user picks. When a selected
/// mod's archive already bundles the engine files, only those entries are
/// extracted from it; the standalone engine archive is used when a selected
/// mod needs the engine but does not carry it; otherwise no engine is
/// installed at all.
#[derive(Debug, Clone, PartialEq)]
pub struct EnginePolicy {
    /// Standalone engine drop (archive plus the files removal deletes).
    pub standalone: FileDropMod,
    /// Mod whose own archive bundles the engine files.
    pub bundled_with: Option<String>,
    /// Archive entries that make up the engine inside the bundling mod.
    pub bundled_entries: Vec<String>,
    /// Mods that need the engine but do not bundle it.
    pub required_by: Vec<String>,
    /// Engine configuration file name inside the install path.
    pub config_file: String,
    /// Key rewritten to point the engine at the active mod folder.
    pub override_key: String,
}

impl EnginePolicy {
    /// Engine install step for this selection, if any.
    fn resolve(&self, profile: &GameProfile, selection: &[String]) -> Option<FileDropMod> {
        if let Some(bundling) = &self.bundled_with {
            if selection.iter().any(|name| name == bundling) {
                let source = profile
                    .find_mod(bundling)
                    .map(|unit| unit.descriptor().source.clone())?;
                let mut engine = self.standalone.clone();
                engine.descriptor.source = source;
                engine.payload = crate::models::DropPayload::Archive {
                    entries: Some(self.bundled_entries.clone()),
                };
                return Some(engine);
            }
        }
        if selection
            .iter()
            .any(|name| self.required_by.iter().any(|needs| needs == name))
        {
            return Some(self.standalone.clone());
        }
        None
    }
}

/// Ordered steps an install run will perform, built before any filesystem
/// work so callers can inspect or log it.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallationPlan {
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    /// Engine drop or stability patch; installed before any mod.
    Prerequisite(ModCapability),
    /// A mod the user selected.
    Mod(ModCapability),
    /// Shared asset drop installed after the mods whose tools expect it.
    Companion(ModCapability),
}

impl PlanStep {
    pub fn unit(&self) -> &ModCapability {
        match self {
            Self::Prerequisite(unit) | Self::Mod(unit) | Self::Companion(unit) => unit,
        }
    }

    pub fn is_prerequisite(&self) -> bool {
        matches!(self, Self::Prerequisite(_))
    }
}

impl InstallationPlan {
    pub fn mod_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, PlanStep::Mod(_)))
            .count()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.unit().name()).collect()
    }
}

/// One supported game and everything needed to mod it.
#[derive(Debug, Clone)]
pub struct GameProfile {
    name: String,
    install_path: Option<Utf8PathBuf>,
    expected_executable: String,
    /// Directory name the install path must end with, when the game keeps
    /// its binaries in a subfolder of the product directory.
    expected_dir_name: Option<String>,
    /// Game files renamed aside before installing and restored on removal.
    backup_files: Vec<String>,
    engine: Option<EnginePolicy>,
    /// Always installed with any mod selection.
    stability_patch: Option<ModCapability>,
    mods: Vec<ModCapability>,
    /// Asset drops that land after the mods, inside the folders the mods'
    /// tools created.
    companions: Vec<ModCapability>,
}

impl GameProfile {
    pub fn new(name: impl Into<String>, expected_executable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            install_path: None,
            expected_executable: expected_executable.into(),
            expected_dir_name: None,
            backup_files: Vec::new(),
            engine: None,
            stability_patch: None,
            mods: Vec::new(),
            companions: Vec::new(),
        }
    }

    pub fn expected_dir_name(mut self, name: impl Into<String>) -> Self {
        self.expected_dir_name = Some(name.into());
        self
    }

    pub fn backup_file(mut self, name: impl Into<String>) -> Self {
        self.backup_files.push(name.into());
        self
    }

    pub fn engine_policy(mut self, policy: EnginePolicy) -> Self {
        self.engine = Some(policy);
        self
    }

    pub fn stability_patch(mut self, patch: ModCapability) -> Self {
        self.stability_patch = Some(patch);
        self
    }

    pub fn with_mod(mut self, unit: ModCapability) -> Self {
        self.mods.push(unit);
        self
    }

    pub fn with_companion(mut self, unit: ModCapability) -> Self {
        self.companions.push(unit);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expected_executable_name(&self) -> &str {
        &self.expected_executable
    }

    pub fn mods(&self) -> &[ModCapability] {
        &self.mods
    }

    pub fn find_mod(&self, name: &str) -> Option<&ModCapability> {
        self.mods.iter().find(|unit| unit.name() == name)
    }

    pub fn patch(&self) -> Option<&ModCapability> {
        self.stability_patch.as_ref()
    }

    pub fn engine(&self) -> Option<&EnginePolicy> {
        self.engine.as_ref()
    }

    pub fn companions(&self) -> &[ModCapability] {
        &self.companions
    }

    pub fn install_path(&self) -> Option<&Utf8Path> {
        self.install_path.as_deref()
    }

    pub fn set_install_path(&mut self, path: Option<Utf8PathBuf>) {
        self.install_path = path;
    }

    /// Install the selected mods into this profile's game directory.
    /// Convenience wrapper over [`InstallationOrchestrator`].
    pub async fn install_mods(
        &self,
        engine: &crate::automation::ProcessAutomationEngine,
        selection: &[String],
        status: Option<crate::models::StatusSink<'_>>,
    ) -> Result<(), InstallError> {
        crate::services::InstallationOrchestrator::new(engine)
            .install_mods(self, selection, status)
            .await
    }

    /// Remove every installed mod and prerequisite and restore the game
    /// files. Convenience wrapper over [`InstallationOrchestrator`].
    pub async fn clear_mods(
        &self,
        engine: &crate::automation::ProcessAutomationEngine,
        reinstall_hint: Option<&[String]>,
        status: Option<crate::models::StatusSink<'_>>,
    ) -> Result<(), InstallError> {
        crate::services::InstallationOrchestrator::new(engine)
            .clear_mods(self, reinstall_hint, status)
            .await
    }

    /// A usable install path names the right directory and contains the
    /// game's executable.
    pub fn validate_install_path(&self, path: &Utf8Path) -> bool {
        if path.as_str().is_empty() {
            return false;
        }
        if let Some(expected) = &self.expected_dir_name {
            // Case-insensitive: Steam and manual installs disagree on casing.
            let name_matches = path
                .file_name()
                .is_some_and(|name| name.eq_ignore_ascii_case(expected));
            if !name_matches {
                return false;
            }
        }
        path.join(&self.expected_executable).is_file()
    }

    pub fn require_install_path(&self) -> Result<&Utf8Path, InstallError> {
        self.install_path
            .as_deref()
            .filter(|path| !path.as_str().is_empty())
            .ok_or_else(|| InstallError::InstallPathNotSet {
                game: self.name.clone(),
            })
    }

    /// Build the ordered step list for a selection without touching the
    /// filesystem beyond availability checks.
    pub fn plan_install(&self, selection: &[String]) -> Result<InstallationPlan, InstallError> {
        let mut chosen = Vec::with_capacity(selection.len());
        for name in selection {
            let unit = self
                .find_mod(name)
                .ok_or_else(|| InstallError::PrerequisiteMissing { name: name.clone() })?;
            if !unit.is_available() {
                return Err(InstallError::SourceUnavailable {
                    path: unit.descriptor().source.clone(),
                });
            }
            chosen.push(unit.clone());
        }

        let mut steps = Vec::new();
        if let Some(policy) = &self.engine {
            if let Some(engine) = policy.resolve(self, selection) {
                if !engine.descriptor.is_available() {
                    return Err(InstallError::PrerequisiteMissing {
                        name: engine.descriptor.name.clone(),
                    });
                }
                steps.push(PlanStep::Prerequisite(ModCapability::FileDrop(engine)));
            }
        }
        if let Some(patch) = &self.stability_patch {
            if !patch.is_available() {
                return Err(InstallError::PrerequisiteMissing {
                    name: patch.name().to_string(),
                });
            }
            steps.push(PlanStep::Prerequisite(patch.clone()));
        }
        let any_mods = !chosen.is_empty();
        steps.extend(chosen.into_iter().map(PlanStep::Mod));
        if any_mods {
            for unit in &self.companions {
                if !unit.is_available() {
                    return Err(InstallError::PrerequisiteMissing {
                        name: unit.name().to_string(),
                    });
                }
                steps.push(PlanStep::Companion(unit.clone()));
            }
        }
        Ok(InstallationPlan { steps })
    }

    /// Rename the game files aside before installation. Already-present
    /// backups are kept, so repeated installs never clobber the originals.
    pub fn backup_game_files(&self) -> Result<(), InstallError> {
        let path = self.require_install_path()?;
        for name in &self.backup_files {
            let original = path.join(name);
            let backup = path.join(backup_variant(name));
            if original.is_file() && !backup.exists() {
                info!(%original, %backup, "backing up game file");
                fs::rename(&original, &backup)
                    .map_err(|e| InstallError::io(format!("backing up {original}"), e))?;
            }
        }
        Ok(())
    }

    /// Move backups back over the installed files.
    pub fn restore_game_files(&self) -> Result<(), InstallError> {
        let path = self.require_install_path()?;
        for name in &self.backup_files {
            let original = path.join(name);
            let backup = path.join(backup_variant(name));
            if !backup.is_file() {
                continue;
            }
            info!(%backup, %original, "restoring game file");
            if original.is_file() {
                fs::remove_file(&original)
                    .map_err(|e| InstallError::io(format!("replacing {original}"), e))?;
            }
            fs::rename(&backup, &original)
                .map_err(|e| InstallError::io(format!("restoring {original}"), e))?;
        }
        Ok(())
    }

    /// Point the engine's override key at a mod folder. Runs before the
    /// owning mod's tool so the game picks up the new files on next launch
    /// even if the tool is interrupted.
    pub fn write_engine_override(
        &self,
        install_path: &Utf8Path,
        folder: &str,
    ) -> Result<(), InstallError> {
        let Some(policy) = &self.engine else {
            return Ok(());
        };
        let config = install_path.join(&policy.config_file);
        if !config.is_file() {
            return Err(InstallError::PrerequisiteMissing {
                name: policy.config_file.clone(),
            });
        }

        let contents = fs::read_to_string(&config)
            .map_err(|e| InstallError::io(format!("reading {config}"), e))?;
        let rewritten: Vec<String> = contents
            .lines()
            .map(|line| {
                if line.trim_start().starts_with(&policy.override_key) {
                    format!("{}=\"\\{}\"", policy.override_key, folder)
                } else {
                    line.to_string()
                }
            })
            .collect();
        debug!(%config, folder, "rewriting engine override");
        fs::write(&config, rewritten.join("\n") + "\n")
            .map_err(|e| InstallError::io(format!("writing {config}"), e))
    }
}
