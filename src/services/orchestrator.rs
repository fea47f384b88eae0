//! Sequences whole install and removal runs for a game profile.
//!
//! Installation order is prerequisites (engine, stability patch), then
//! mods, then companion asset drops; removal walks the same order in
//! reverse and finishes by restoring the backed-up game files. Any step failure aborts the run; already
//! completed steps are not rolled back, and a later removal run cleans up.

use crate::automation::ProcessAutomationEngine;
use crate::error::InstallError;
use crate::models::mods::emit;
use crate::models::{InstallContext, ModCapability, StatusSink};
use crate::services::profile::{GameProfile, PlanStep};
use tracing::{info, instrument};

pub struct InstallationOrchestrator<'a> {
    engine: &'a ProcessAutomationEngine,
}

impl<'a> InstallationOrchestrator<'a> {
    pub fn new(engine: &'a ProcessAutomationEngine) -> Self {
        Self { engine }
    }

    /// Install the selected mods (by name) plus whatever prerequisites the
    /// profile's policy derives from the selection.
    #[instrument(skip_all, fields(game = profile.name()))]
    pub async fn install_mods(
        &self,
        profile: &GameProfile,
        selection: &[String],
        status: Option<StatusSink<'_>>,
    ) -> Result<(), InstallError> {
        // Fail before any filesystem work when no path is configured.
        let install_path = profile.require_install_path()?;
        emit(status, "Checking mod availability...");
        let plan = profile.plan_install(selection)?;
        info!(steps = ?plan.step_names(), "installation plan ready");

        emit(status, "Backing up game files...");
        profile.backup_game_files()?;

        let write_override = |folder: &str| profile.write_engine_override(install_path, folder);
        let ctx = InstallContext {
            engine: self.engine,
            override_writer: Some(&write_override),
        };
        let total = plan.mod_count();
        let mut current = 0;
        for step in &plan.steps {
            let unit = step.unit();
            match step {
                PlanStep::Prerequisite(_) => {
                    emit(
                        status,
                        &format!("Installing prerequisite: {}...", unit.name()),
                    );
                }
                PlanStep::Mod(_) => {
                    current += 1;
                    emit(
                        status,
                        &format!("Installing mod {current} of {total}: {}...", unit.name()),
                    );
                }
                PlanStep::Companion(_) => {
                    emit(status, &format!("Installing {}...", unit.name()));
                }
            }
            self.install_unit(profile, &ctx, unit, status).await?;
        }
        emit(status, "Installation complete.");
        Ok(())
    }

    async fn install_unit(
        &self,
        profile: &GameProfile,
        ctx: &InstallContext<'_>,
        unit: &ModCapability,
        status: Option<StatusSink<'_>>,
    ) -> Result<(), InstallError> {
        let install_path = profile.require_install_path()?;
        info!(name = unit.name(), "installing unit");
        unit.install(ctx, install_path, status).await
    }

    /// Remove everything the profile could have installed, in reverse
    /// install order, then restore the backed-up game files.
    ///
    /// `reinstall_hint` names mods that are about to be installed again;
    /// those skip their slow revert invocation because the upcoming install
    /// replaces their data anyway.
    #[instrument(skip_all, fields(game = profile.name()))]
    pub async fn clear_mods(
        &self,
        profile: &GameProfile,
        reinstall_hint: Option<&[String]>,
        status: Option<StatusSink<'_>>,
    ) -> Result<(), InstallError> {
        let install_path = profile.require_install_path()?;
        emit(status, "Starting mod removal...");

        for unit in profile.companions().iter().rev() {
            emit(status, &format!("Removing {}...", unit.name()));
            info!(name = unit.name(), "removing companion drop");
            unit.remove(install_path, false, status).await?;
        }

        for unit in profile.mods().iter().rev() {
            let will_be_reinstalled = reinstall_hint
                .is_some_and(|hint| hint.iter().any(|name| name == unit.name()));
            emit(status, &format!("Removing {}...", unit.name()));
            info!(name = unit.name(), will_be_reinstalled, "removing unit");
            unit.remove(install_path, will_be_reinstalled, status)
                .await?;
        }

        if let Some(patch) = profile.patch() {
            emit(status, &format!("Removing {}...", patch.name()));
            patch.remove(install_path, false, status).await?;
        }

        if let Some(policy) = profile.engine() {
            emit(status, "Removing mod engine...");
            ModCapability::FileDrop(policy.standalone.clone())
                .remove(install_path, false, status)
                .await?;
        }

        emit(status, "Restoring original game files...");
        profile.restore_game_files()?;
        emit(status, "Removal complete.");
        Ok(())
    }
}
