//! Mod units and their install/remove behavior.
//!
//! A mod is either a plain file drop (archive or single file copied into the
//! game folder) or an automated unit whose payload must be configured by
//! driving the tool it ships with. The two capabilities are a closed enum so
//! installation plans can be built and inspected without touching the
//! filesystem.

use crate::automation::engine::{
    AutomationStep, AutomationTask, CompletionSignal, ProcessAutomationEngine,
};
use crate::error::InstallError;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Progress callback for user-facing status lines.
pub type StatusSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

pub(crate) fn emit(status: Option<StatusSink<'_>>, message: &str) {
    if let Some(sink) = status {
        sink(message);
    }
}

/// Shared resources an install run needs.
pub struct InstallContext<'a> {
    pub engine: &'a ProcessAutomationEngine,
    /// Points the mod engine's override key at a folder name. Invoked after
    /// the mod's payload is on disk, since an archive can itself carry the
    /// engine's configuration file and would clobber an earlier rewrite.
    pub override_writer: Option<&'a (dyn Fn(&str) -> Result<(), InstallError> + Send + Sync)>,
}

/// Identity and source location of a mod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModDescriptor {
    pub name: String,
    /// Bundled payload under the data directory (archive or bare file).
    pub source: Utf8PathBuf,
}

impl ModDescriptor {
    pub fn new(name: impl Into<String>, source: Utf8PathBuf) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    pub fn is_available(&self) -> bool {
        self.source.is_file()
    }
}

/// What a file-drop mod copies into the game folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropPayload {
    /// Unpack the source archive, optionally restricted to named entries.
    Archive { entries: Option<Vec<String>> },
    /// Copy the source as a single file under this name.
    SingleFile { dest_name: String },
}

/// A mod installed by copying files, with no tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDropMod {
    pub descriptor: ModDescriptor,
    pub payload: DropPayload,
    /// Subdirectory of the install path to drop into, created on demand.
    pub target_subdir: Option<String>,
    /// Paths (relative to the install path) deleted on removal. A trailing
    /// `*` matches by prefix, for seed-stamped files.
    pub removes: Vec<String>,
}

impl FileDropMod {
    fn target_dir(&self, install_path: &Utf8Path) -> Utf8PathBuf {
        match &self.target_subdir {
            Some(subdir) => install_path.join(subdir),
            None => install_path.to_path_buf(),
        }
    }

    pub fn install(&self, install_path: &Utf8Path) -> Result<(), InstallError> {
        if !self.descriptor.is_available() {
            return Err(InstallError::SourceUnavailable {
                path: self.descriptor.source.clone(),
            });
        }
        let target = self.target_dir(install_path);
        if self.target_subdir.is_some() {
            fs::create_dir_all(&target)
                .map_err(|e| InstallError::io(format!("creating {target}"), e))?;
        }

        match &self.payload {
            DropPayload::Archive { entries } => {
                extract_archive(&self.descriptor.source, &target, entries.as_deref())
            }
            DropPayload::SingleFile { dest_name } => {
                let dest = target.join(dest_name);
                info!(source = %self.descriptor.source, %dest, "dropping file");
                fs::copy(&self.descriptor.source, &dest)
                    .map_err(|e| InstallError::io(format!("copying to {dest}"), e))?;
                Ok(())
            }
        }
    }

    pub fn remove(&self, install_path: &Utf8Path) {
        let target = self.target_dir(install_path);
        if let DropPayload::SingleFile { dest_name } = &self.payload {
            // Only delete a dropped file when its backup still exists;
            // otherwise the game would be left without the file at all.
            let dest = target.join(dest_name);
            if target.join(backup_variant(dest_name)).is_file() {
                remove_path_quietly(&dest);
            } else {
                debug!(%dest, "no backup present, keeping dropped file");
            }
        }
        remove_relative_paths(&target, &self.removes);
    }
}

/// A mod whose ships-with tool must be driven to produce the install.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurableAutomatedMod {
    pub descriptor: ModDescriptor,
    pub payload: DropPayload,
    /// Folder the payload unpacks into, relative to the install path.
    pub work_dir: Option<String>,
    /// Tool executable name inside the work folder.
    pub executable: String,
    /// Exact window title, when the tool's window cannot be found by pid.
    pub window_title: Option<String>,
    pub steps: Vec<AutomationStep>,
    pub confirm_key: Option<u16>,
    /// Folder name written into the engine override before the tool runs.
    pub override_folder: Option<String>,
    /// Paths (relative to the install path) deleted on removal; trailing `*`
    /// matches by prefix.
    pub removes: Vec<String>,
    /// Command-line flag that restores the game's data files.
    pub revert_arg: Option<String>,
    /// Settings folders under `%LOCALAPPDATA%` cleared after a run, so the
    /// tool starts fresh next time.
    pub appdata_dirs: Vec<String>,
}

impl ConfigurableAutomatedMod {
    fn executable_path(&self, install_path: &Utf8Path) -> Utf8PathBuf {
        let preferred = match &self.work_dir {
            Some(dir) => install_path.join(dir).join(&self.executable),
            None => install_path.join(&self.executable),
        };
        if preferred.is_file() {
            return preferred;
        }
        // Some archives unpack flat instead of into their advertised folder.
        let flat = install_path.join(&self.executable);
        if flat.is_file() { flat } else { preferred }
    }

    fn build_task(&self, executable: Utf8PathBuf) -> AutomationTask {
        let exe_dir = executable
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| Utf8PathBuf::from("."));

        let steps = self
            .steps
            .iter()
            .cloned()
            .map(|mut step| {
                if let Some(CompletionSignal::LogMarker { directory, .. }) = &mut step.completion {
                    if directory.is_relative() {
                        *directory = exe_dir.join(&*directory);
                    }
                }
                step
            })
            .collect();

        let mut cleanup_paths = vec![Utf8PathBuf::from(format!("{executable}.config"))];
        if let Some(appdata) = local_appdata() {
            cleanup_paths.extend(self.appdata_dirs.iter().map(|dir| appdata.join(dir)));
        }

        AutomationTask {
            executable,
            window_title: self.window_title.clone(),
            steps,
            confirm_key: self.confirm_key,
            cleanup_paths,
        }
    }

    pub async fn install(
        &self,
        ctx: &InstallContext<'_>,
        install_path: &Utf8Path,
        status: Option<StatusSink<'_>>,
    ) -> Result<(), InstallError> {
        if !self.descriptor.is_available() {
            return Err(InstallError::SourceUnavailable {
                path: self.descriptor.source.clone(),
            });
        }

        emit(status, &format!("Extracting {}...", self.descriptor.name));
        match &self.payload {
            DropPayload::Archive { entries } => {
                extract_archive(&self.descriptor.source, install_path, entries.as_deref())?;
            }
            DropPayload::SingleFile { dest_name } => {
                let dest = install_path.join(dest_name);
                fs::copy(&self.descriptor.source, &dest)
                    .map_err(|e| InstallError::io(format!("copying to {dest}"), e))?;
            }
        }

        let executable = self.executable_path(install_path);
        if !executable.is_file() {
            return Err(InstallError::SourceUnavailable { path: executable });
        }

        // The override must point at this mod's folder before its tool runs,
        // so an interrupted run still leaves the engine loading the folder
        // that was being configured.
        if let Some(folder) = &self.override_folder {
            if let Some(write_override) = ctx.override_writer {
                write_override(folder)?;
            }
        }

        emit(status, &format!("Configuring {}...", self.descriptor.name));
        ctx.engine.run(&self.build_task(executable)).await?;
        Ok(())
    }

    pub async fn remove(
        &self,
        install_path: &Utf8Path,
        will_be_reinstalled: bool,
        status: Option<StatusSink<'_>>,
    ) -> Result<(), InstallError> {
        if let Some(arg) = &self.revert_arg {
            // A run that is about to reinstall reverts anyway, so skip the
            // slow tool invocation.
            if will_be_reinstalled {
                debug!(name = %self.descriptor.name, "skipping revert before reinstall");
            } else {
                self.revert(install_path, arg, status).await;
            }
        }
        remove_relative_paths(install_path, &self.removes);
        Ok(())
    }

    async fn revert(&self, install_path: &Utf8Path, arg: &str, status: Option<StatusSink<'_>>) {
        let executable = self.executable_path(install_path);
        if !executable.is_file() {
            return;
        }
        emit(status, &format!("Reverting {}...", self.descriptor.name));
        let run = tokio::process::Command::new(executable.as_std_path())
            .arg(arg)
            .current_dir(executable.parent().unwrap_or_else(|| Utf8Path::new(".")))
            .status()
            .await;
        match run {
            Ok(code) if code.success() => {}
            Ok(code) => warn!(name = %self.descriptor.name, %code, "revert exited nonzero"),
            Err(e) => warn!(name = %self.descriptor.name, error = %e, "revert failed to run"),
        }
    }
}

/// Closed set of mod capabilities.
#[derive(Debug, Clone, PartialEq)]
pub enum ModCapability {
    FileDrop(FileDropMod),
    Automated(ConfigurableAutomatedMod),
}

impl ModCapability {
    pub fn descriptor(&self) -> &ModDescriptor {
        match self {
            Self::FileDrop(unit) => &unit.descriptor,
            Self::Automated(unit) => &unit.descriptor,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor().name
    }

    pub fn is_available(&self) -> bool {
        self.descriptor().is_available()
    }

    pub async fn install(
        &self,
        ctx: &InstallContext<'_>,
        install_path: &Utf8Path,
        status: Option<StatusSink<'_>>,
    ) -> Result<(), InstallError> {
        match self {
            Self::FileDrop(unit) => unit.install(install_path),
            Self::Automated(unit) => unit.install(ctx, install_path, status).await,
        }
    }

    pub async fn remove(
        &self,
        install_path: &Utf8Path,
        will_be_reinstalled: bool,
        status: Option<StatusSink<'_>>,
    ) -> Result<(), InstallError> {
        match self {
            Self::FileDrop(unit) => {
                unit.remove(install_path);
                Ok(())
            }
            Self::Automated(unit) => unit.remove(install_path, will_be_reinstalled, status).await,
        }
    }
}

/// Backup name for a game file: `DarkSoulsIII.exe` becomes
/// `DarkSoulsIII_org.exe`.
pub fn backup_variant(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, extension)) => format!("{stem}_org.{extension}"),
        None => format!("{file_name}_org"),
    }
}

/// Unpack a zip archive into `target`, optionally restricted to named
/// entries. Entry names are matched against the full path inside the
/// archive.
pub fn extract_archive(
    archive_path: &Utf8Path,
    target: &Utf8Path,
    entries: Option<&[String]>,
) -> Result<(), InstallError> {
    let failure = |context: String| InstallError::ExtractionFailure {
        archive: archive_path.to_path_buf(),
        context,
    };

    info!(archive = %archive_path, %target, "extracting archive");
    let file = fs::File::open(archive_path).map_err(|e| failure(e.to_string()))?;
    let mut archive = ZipArchive::new(file).map_err(|e| failure(e.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| failure(e.to_string()))?;
        if let Some(wanted) = entries {
            if !wanted.iter().any(|name| name == entry.name()) {
                continue;
            }
        }
        let Some(relative) = entry.enclosed_name() else {
            // Entry escapes the target directory; never write it.
            warn!(entry = entry.name(), "skipping unsafe archive entry");
            continue;
        };
        let Ok(relative) = Utf8PathBuf::from_path_buf(relative) else {
            warn!(entry = entry.name(), "skipping non-utf8 archive entry");
            continue;
        };
        let dest = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&dest).map_err(|e| failure(e.to_string()))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| failure(e.to_string()))?;
        }
        let mut out = fs::File::create(&dest).map_err(|e| failure(e.to_string()))?;
        io::copy(&mut entry, &mut out).map_err(|e| failure(e.to_string()))?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dest, fs::Permissions::from_mode(mode))
                .map_err(|e| failure(e.to_string()))?;
        }
    }
    Ok(())
}

/// Tool settings root, `%LOCALAPPDATA%` on Windows.
fn local_appdata() -> Option<Utf8PathBuf> {
    std::env::var("LOCALAPPDATA").ok().map(Utf8PathBuf::from)
}

/// Delete install-relative paths, tolerating absence and errors. A trailing
/// `*` deletes every directory entry whose name starts with the prefix.
fn remove_relative_paths(root: &Utf8Path, relative: &[String]) {
    for pattern in relative {
        if let Some(prefix) = pattern.strip_suffix('*') {
            remove_by_prefix(root, prefix);
        } else {
            remove_path_quietly(&root.join(pattern));
        }
    }
}

fn remove_by_prefix(root: &Utf8Path, prefix: &str) {
    let Ok(entries) = root.read_dir_utf8() else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name().starts_with(prefix) {
            remove_path_quietly(entry.path());
        }
    }
}

fn remove_path_quietly(path: &Utf8Path) {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.is_file() {
        fs::remove_file(path)
    } else {
        return;
    };
    match removed {
        Ok(()) => debug!(%path, "removed"),
        Err(e) => warn!(%path, error = %e, "could not remove path"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn utf8_root(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    fn write_zip(path: &Utf8Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_backup_variant_naming() {
        assert_eq!(backup_variant("DarkSoulsIII.exe"), "DarkSoulsIII_org.exe");
        assert_eq!(backup_variant("modengine.ini"), "modengine_org.ini");
        assert_eq!(backup_variant("README"), "README_org");
    }

    #[test]
    fn test_extract_whole_archive() {
        let dir = TempDir::new().unwrap();
        let root = utf8_root(&dir);
        let archive = root.join("ModEngine.zip");
        write_zip(
            &archive,
            &[("dinput8.dll", "dll bytes"), ("modengine.ini", "[files]")],
        );

        let target = root.join("game");
        fs::create_dir(&target).unwrap();
        extract_archive(&archive, &target, None).unwrap();

        assert_eq!(
            fs::read_to_string(target.join("dinput8.dll")).unwrap(),
            "dll bytes"
        );
        assert!(target.join("modengine.ini").is_file());
    }

    #[test]
    fn test_extract_selected_entries_only() {
        let dir = TempDir::new().unwrap();
        let root = utf8_root(&dir);
        let archive = root.join("combined.zip");
        write_zip(
            &archive,
            &[
                ("dinput8.dll", "dll"),
                ("modengine.ini", "ini"),
                ("randomizer/DS3Randomizer.exe", "exe"),
            ],
        );

        let target = root.join("game");
        fs::create_dir(&target).unwrap();
        let wanted = vec!["dinput8.dll".to_string(), "modengine.ini".to_string()];
        extract_archive(&archive, &target, Some(&wanted)).unwrap();

        assert!(target.join("dinput8.dll").is_file());
        assert!(target.join("modengine.ini").is_file());
        assert!(!target.join("randomizer").exists());
    }

    #[test]
    fn test_missing_archive_is_extraction_failure() {
        let dir = TempDir::new().unwrap();
        let root = utf8_root(&dir);
        let err = extract_archive(&root.join("absent.zip"), &root, None).unwrap_err();
        assert!(matches!(err, InstallError::ExtractionFailure { .. }));
    }

    #[test]
    fn test_file_drop_into_subdirectory() {
        let dir = TempDir::new().unwrap();
        let root = utf8_root(&dir);
        let source = root.join("loose.dll");
        fs::write(&source, "payload").unwrap();
        let game = root.join("game");
        fs::create_dir(&game).unwrap();

        let unit = FileDropMod {
            descriptor: ModDescriptor::new("Loose", source),
            payload: DropPayload::SingleFile {
                dest_name: "loose.dll".to_string(),
            },
            target_subdir: Some("mods".to_string()),
            removes: vec!["mods".to_string()],
        };
        unit.install(&game).unwrap();
        assert!(game.join("mods/loose.dll").is_file());
    }

    #[test]
    fn test_single_file_removal_requires_backup() {
        let dir = TempDir::new().unwrap();
        let root = utf8_root(&dir);
        let source = root.join("patched.exe");
        fs::write(&source, "patched").unwrap();
        let game = root.join("game");
        fs::create_dir(&game).unwrap();

        let unit = FileDropMod {
            descriptor: ModDescriptor::new("Stability Patch", source),
            payload: DropPayload::SingleFile {
                dest_name: "Game.exe".to_string(),
            },
            target_subdir: None,
            removes: Vec::new(),
        };
        unit.install(&game).unwrap();

        // Without a backup the dropped file stays put.
        unit.remove(&game);
        assert!(game.join("Game.exe").is_file());

        fs::write(game.join("Game_org.exe"), "original").unwrap();
        unit.remove(&game);
        assert!(!game.join("Game.exe").exists());
        assert!(game.join("Game_org.exe").is_file());
    }

    #[test]
    fn test_prefix_removal_matches_seed_files() {
        let dir = TempDir::new().unwrap();
        let root = utf8_root(&dir);
        fs::write(root.join("random-seed-123.txt"), "x").unwrap();
        fs::write(root.join("random-seed-456.txt"), "x").unwrap();
        fs::write(root.join("randomizer.ini"), "x").unwrap();

        remove_relative_paths(&root, &["random-seed-*".to_string()]);
        assert!(!root.join("random-seed-123.txt").exists());
        assert!(!root.join("random-seed-456.txt").exists());
        assert!(root.join("randomizer.ini").is_file());
    }

    #[test]
    fn test_unavailable_source_is_reported() {
        let dir = TempDir::new().unwrap();
        let root = utf8_root(&dir);
        let unit = FileDropMod {
            descriptor: ModDescriptor::new("Missing", root.join("absent.zip")),
            payload: DropPayload::Archive { entries: None },
            target_subdir: None,
            removes: Vec::new(),
        };
        let err = unit.install(&root).unwrap_err();
        assert!(matches!(err, InstallError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_log_marker_directory_is_resolved_against_tool_folder() {
        let unit = ConfigurableAutomatedMod {
            descriptor: ModDescriptor::new("Fog", Utf8PathBuf::from("Data/fog.zip")),
            payload: DropPayload::Archive { entries: None },
            work_dir: Some("fog".to_string()),
            executable: "FogMod.exe".to_string(),
            window_title: None,
            steps: vec![
                AutomationStep::click_control(crate::automation::ControlQuery::by_text(
                    "Randomize!",
                ))
                .with_completion(CompletionSignal::LogMarker {
                    directory: Utf8PathBuf::from("runs"),
                    prefix: "Writing messages to ".to_string(),
                }),
            ],
            confirm_key: None,
            override_folder: Some("fog".to_string()),
            removes: vec!["fog".to_string()],
            revert_arg: None,
            appdata_dirs: Vec::new(),
        };

        let task = unit.build_task(Utf8PathBuf::from("game/fog/FogMod.exe"));
        let Some(CompletionSignal::LogMarker { directory, .. }) = &task.steps[0].completion else {
            panic!("expected a log marker signal");
        };
        assert_eq!(directory, &Utf8PathBuf::from("game/fog/runs"));
        assert_eq!(
            task.cleanup_paths[0],
            Utf8PathBuf::from("game/fog/FogMod.exe.config")
        );
    }
}
