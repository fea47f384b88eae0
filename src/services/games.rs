//! Built-in game profiles.
//!
//! Sources live under a per-game folder of the bundled data directory, e.g.
//! `Data/DS3/ModEngine.zip`. The step scripts and completion signals encode
//! how each randomizer tool actually behaves; tuning and colors come from
//! settings, not from here.

use crate::automation::engine::{AutomationStep, ColorRegion, CompletionSignal};
use crate::automation::window::VK_RETURN;
use crate::automation::{ColorClassifier, ControlQuery};
use crate::models::{
    ConfigurableAutomatedMod, DropPayload, FileDropMod, ModCapability, ModDescriptor,
};
use crate::services::profile::{EnginePolicy, GameProfile};
use camino::Utf8Path;
use std::time::Duration;

const ENGINE_CONFIG_FILE: &str = "modengine.ini";
const ENGINE_OVERRIDE_KEY: &str = "modOverrideDirectory";
const ENGINE_FILES: [&str; 2] = ["dinput8.dll", "modengine.ini"];
const LOG_MARKER_PREFIX: &str = "Writing messages to ";

fn engine_files() -> Vec<String> {
    ENGINE_FILES.iter().map(|s| s.to_string()).collect()
}

/// Statusbar query shared by the WinForms randomizers: exact native class,
/// then managed-class or caption matches, then the lowest bottom-band
/// control.
fn statusbar_query() -> ControlQuery {
    ControlQuery::by_class("msctls_statusbar32")
        .with_texts(&["StatusStrip", "status"])
        .with_bottom_band_fallback()
}

fn status_color_signal() -> CompletionSignal {
    CompletionSignal::ColorMatch {
        region: ColorRegion::StatusControl(statusbar_query()),
        classifier: ColorClassifier::default(),
    }
}

fn band_color_signal() -> CompletionSignal {
    CompletionSignal::ColorMatch {
        region: ColorRegion::BottomBand {
            height: 60,
            max_width: 400,
            stride: 8,
        },
        classifier: ColorClassifier {
            success: crate::automation::ColorRule::green_text(),
            failure: crate::automation::ColorRule::failure_red(),
        },
    }
}

fn log_marker_signal() -> CompletionSignal {
    CompletionSignal::LogMarker {
        directory: "runs".into(),
        prefix: LOG_MARKER_PREFIX.to_string(),
    }
}

pub fn dark_souls_3(data_dir: &Utf8Path) -> GameProfile {
    let data = data_dir.join("DS3");

    let engine = EnginePolicy {
        standalone: FileDropMod {
            descriptor: ModDescriptor::new("Mod Engine", data.join("ModEngine.zip")),
            payload: DropPayload::Archive { entries: None },
            target_subdir: None,
            removes: engine_files(),
        },
        bundled_with: Some("Item & Enemy Randomizer".to_string()),
        bundled_entries: engine_files(),
        required_by: vec!["Fog Gate Randomizer".to_string()],
        config_file: ENGINE_CONFIG_FILE.to_string(),
        override_key: ENGINE_OVERRIDE_KEY.to_string(),
    };

    let crashfix = ModCapability::FileDrop(FileDropMod {
        descriptor: ModDescriptor::new("Crashfix", data.join("DarkSoulsIII.exe")),
        payload: DropPayload::SingleFile {
            dest_name: "DarkSoulsIII.exe".to_string(),
        },
        target_subdir: None,
        removes: Vec::new(),
    });

    let item_enemy = ModCapability::Automated(ConfigurableAutomatedMod {
        descriptor: ModDescriptor::new(
            "Item & Enemy Randomizer",
            data.join("DS3 Static Item and Enemy Randomizer.zip"),
        ),
        payload: DropPayload::Archive { entries: None },
        work_dir: Some("randomizer".to_string()),
        executable: "DS3Randomizer.exe".to_string(),
        window_title: None,
        steps: vec![
            AutomationStep::click_control(ControlQuery::by_texts(&[
                "Randomize new run!",
                "Run with fixed seed",
                "Reroll",
            ]))
            .with_completion(status_color_signal()),
        ],
        confirm_key: None,
        override_folder: Some("randomizer".to_string()),
        removes: vec!["randomizer".to_string()],
        revert_arg: None,
        appdata_dirs: vec![
            "DS3Randomizer".to_string(),
            "DS3_Static_Item_and_Enemy_Randomizer".to_string(),
            "RandomizerCommon".to_string(),
        ],
    });

    let fog_gate = ModCapability::Automated(ConfigurableAutomatedMod {
        descriptor: ModDescriptor::new(
            "Fog Gate Randomizer",
            data.join("DS3_FogGate_Randomizer.zip"),
        ),
        payload: DropPayload::Archive { entries: None },
        work_dir: Some("fog".to_string()),
        executable: "FogMod.exe".to_string(),
        window_title: Some("DS3 Fog Gate Randomizer v0.2".to_string()),
        steps: vec![
            AutomationStep::click_control(ControlQuery::by_text("Randomize!"))
                .with_completion(log_marker_signal()),
        ],
        confirm_key: None,
        override_folder: Some("fog".to_string()),
        removes: vec!["fog".to_string()],
        revert_arg: None,
        appdata_dirs: vec!["FogMod".to_string()],
    });

    GameProfile::new("Dark Souls III", "DarkSoulsIII.exe")
        .expected_dir_name("Game")
        .backup_file("DarkSoulsIII.exe")
        .engine_policy(engine)
        .stability_patch(crashfix)
        .with_mod(item_enemy)
        .with_mod(fog_gate)
}

pub fn dark_souls_remastered(data_dir: &Utf8Path) -> GameProfile {
    let data = data_dir.join("DS1");

    let enemy = ModCapability::Automated(ConfigurableAutomatedMod {
        descriptor: ModDescriptor::new("Enemy Randomizer", data.join("enemy_randomizer.exe")),
        payload: DropPayload::SingleFile {
            dest_name: "enemy_randomizer.exe".to_string(),
        },
        work_dir: None,
        executable: "enemy_randomizer.exe".to_string(),
        window_title: Some("Dark Souls Enemy Randomizer".to_string()),
        steps: vec![
            AutomationStep::click_control(ControlQuery::by_texts(&[
                "Scramble!",
                "Randomize",
            ]))
            .with_completion(CompletionSignal::ControlDisabled),
        ],
        confirm_key: None,
        override_folder: None,
        removes: vec!["enemy_randomizer.exe".to_string(), "enemyRandomizerData".to_string()],
        revert_arg: Some("--revert".to_string()),
        appdata_dirs: Vec::new(),
    });

    let item = ModCapability::Automated(ConfigurableAutomatedMod {
        descriptor: ModDescriptor::new("Item Randomizer", data.join("randomizer_gui.exe")),
        payload: DropPayload::SingleFile {
            dest_name: "randomizer_gui.exe".to_string(),
        },
        work_dir: None,
        executable: "randomizer_gui.exe".to_string(),
        window_title: None,
        steps: vec![
            AutomationStep::click_control(ControlQuery::by_texts(&[
                "Scramble items",
                "Randomize",
            ]))
            .with_completion(CompletionSignal::ControlDisabled),
        ],
        confirm_key: None,
        override_folder: None,
        removes: vec![
            "randomizer.ini".to_string(),
            "randomizer_gui.exe".to_string(),
            "random-seed-*".to_string(),
        ],
        revert_arg: Some("--revert".to_string()),
        appdata_dirs: Vec::new(),
    });

    let fog_gate = ModCapability::Automated(ConfigurableAutomatedMod {
        descriptor: ModDescriptor::new(
            "Fog Gate Randomizer",
            data.join("DS1_FogGate_Randomizer.zip"),
        ),
        payload: DropPayload::Archive { entries: None },
        work_dir: Some("fog".to_string()),
        executable: "FogMod.exe".to_string(),
        window_title: Some("DS1 Fog Gate Randomizer v0.3".to_string()),
        steps: vec![
            AutomationStep::click_control(ControlQuery::by_text("Randomize!"))
                .with_completion(log_marker_signal()),
        ],
        confirm_key: None,
        override_folder: None,
        removes: vec!["fog".to_string()],
        revert_arg: None,
        appdata_dirs: vec!["FogMod".to_string()],
    });

    GameProfile::new("Dark Souls Remastered", "DarkSoulsRemastered.exe")
        .with_mod(enemy)
        .with_mod(item)
        .with_mod(fog_gate)
}

pub fn dark_souls_2(data_dir: &Utf8Path) -> GameProfile {
    let data = data_dir.join("DS2");

    // The DS2 tool draws custom controls, so the script clicks proportional
    // positions: randomize button, settings tab, then the write-out button,
    // each confirmed by green text appearing in the bottom band.
    let randomizer = ModCapability::Automated(ConfigurableAutomatedMod {
        descriptor: ModDescriptor::new("DS2 Randomizer", data.join("DS2S_Randomizer.zip")),
        payload: DropPayload::Archive { entries: None },
        work_dir: Some("DS2S Randomizer".to_string()),
        executable: "DS2SRandomizer.exe".to_string(),
        window_title: Some("DS2S Randomizer".to_string()),
        steps: vec![
            AutomationStep::click_at(0.85, 0.92).with_completion(band_color_signal()),
            AutomationStep::click_at(0.5, 0.04),
            AutomationStep::pause(Duration::from_secs(1)),
            AutomationStep::click_at(0.85, 0.92).with_completion(band_color_signal()),
        ],
        confirm_key: Some(VK_RETURN),
        override_folder: None,
        removes: vec!["DS2S Randomizer".to_string()],
        revert_arg: None,
        appdata_dirs: Vec::new(),
    });

    GameProfile::new("Dark Souls II", "DarkSoulsII.exe")
        .expected_dir_name("Game")
        .with_mod(randomizer)
}

pub fn sekiro(data_dir: &Utf8Path) -> GameProfile {
    let data = data_dir.join("Sekiro");

    let engine = EnginePolicy {
        standalone: FileDropMod {
            descriptor: ModDescriptor::new("Sekiro Mod Engine", data.join("ModEngine.zip")),
            payload: DropPayload::Archive { entries: None },
            target_subdir: None,
            removes: engine_files(),
        },
        bundled_with: None,
        bundled_entries: Vec::new(),
        required_by: vec!["Enemy and Item Randomizer".to_string()],
        config_file: ENGINE_CONFIG_FILE.to_string(),
        override_key: ENGINE_OVERRIDE_KEY.to_string(),
    };

    let randomizer = ModCapability::Automated(ConfigurableAutomatedMod {
        descriptor: ModDescriptor::new(
            "Enemy and Item Randomizer",
            data.join("Sekiro_Randomizer.zip"),
        ),
        payload: DropPayload::Archive { entries: None },
        work_dir: Some("randomizer".to_string()),
        executable: "SekiroRandomizer.exe".to_string(),
        window_title: Some("Sekiro Enemy and Item Randomizer".to_string()),
        steps: vec![
            AutomationStep::click_control(ControlQuery::by_texts(&[
                "Randomize new run!",
                "Run with fixed seed",
                "Reroll",
            ]))
            .with_completion(status_color_signal()),
        ],
        confirm_key: None,
        override_folder: Some("randomizer".to_string()),
        removes: vec![
            "randomizer".to_string(),
            "SekiroRandomizer.exe".to_string(),
            "RandomizerCommon.dll".to_string(),
        ],
        revert_arg: None,
        appdata_dirs: vec![
            "SekiroRandomizer".to_string(),
            "Sekiro_Randomizer".to_string(),
            "RandomizerCommon".to_string(),
        ],
    });

    // The randomizer reads shared sound and texture packs out of its own
    // folder, so these land after it has unpacked.
    let combined_sfx = ModCapability::FileDrop(FileDropMod {
        descriptor: ModDescriptor::new("Combined SFX", data.join("Combined_SFX.zip")),
        payload: DropPayload::Archive { entries: None },
        target_subdir: Some("randomizer".to_string()),
        removes: vec!["sound".to_string(), "sfx".to_string()],
    });
    let dragon_textures = ModCapability::FileDrop(FileDropMod {
        descriptor: ModDescriptor::new(
            "Divine Dragon Textures",
            data.join("Divine_Dragon_Textures.zip"),
        ),
        payload: DropPayload::Archive { entries: None },
        target_subdir: Some("randomizer".to_string()),
        removes: vec![
            "parts".to_string(),
            "chr".to_string(),
            "textures".to_string(),
        ],
    });

    GameProfile::new("Sekiro: Shadows Die Twice", "sekiro.exe")
        .engine_policy(engine)
        .with_mod(randomizer)
        .with_companion(combined_sfx)
        .with_companion(dragon_textures)
}

/// All supported games, sources under `data_dir`.
pub fn all_games(data_dir: &Utf8Path) -> Vec<GameProfile> {
    vec![
        dark_souls_remastered(data_dir),
        dark_souls_2(data_dir),
        dark_souls_3(data_dir),
        sekiro(data_dir),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn test_all_games_have_distinct_names() {
        let games = all_games(Utf8Path::new("Data"));
        let mut names: Vec<_> = games.iter().map(|g| g.name().to_string()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), games.len());
    }

    #[test]
    fn test_ds3_engine_policy_covers_both_automated_mods() {
        let profile = dark_souls_3(Utf8Path::new("Data"));
        let policy = profile.engine().unwrap();
        assert_eq!(policy.bundled_with.as_deref(), Some("Item & Enemy Randomizer"));
        assert_eq!(policy.required_by, vec!["Fog Gate Randomizer".to_string()]);
        assert_eq!(policy.config_file, "modengine.ini");
        for name in ["Item & Enemy Randomizer", "Fog Gate Randomizer"] {
            assert!(profile.find_mod(name).is_some());
        }
    }

    #[test]
    fn test_sources_live_under_per_game_folders() {
        let profile = dark_souls_3(Utf8Path::new("Data"));
        for unit in profile.mods() {
            assert!(
                unit.descriptor()
                    .source
                    .starts_with(Utf8PathBuf::from("Data/DS3")),
                "unexpected source {}",
                unit.descriptor().source
            );
        }
    }

    #[test]
    fn test_sekiro_asset_packs_land_in_the_randomizer_folder() {
        let profile = sekiro(Utf8Path::new("Data"));
        assert!(profile.find_mod("Enemy and Item Randomizer").is_some());
        let names: Vec<_> = profile.companions().iter().map(|u| u.name()).collect();
        assert_eq!(names, vec!["Combined SFX", "Divine Dragon Textures"]);
        for unit in profile.companions() {
            let ModCapability::FileDrop(drop) = unit else {
                panic!("companions are plain drops");
            };
            assert_eq!(drop.target_subdir.as_deref(), Some("randomizer"));
        }
    }

    #[test]
    fn test_ds1_randomizers_revert_on_removal() {
        let profile = dark_souls_remastered(Utf8Path::new("Data"));
        for name in ["Enemy Randomizer", "Item Randomizer"] {
            let Some(ModCapability::Automated(unit)) = profile.find_mod(name) else {
                panic!("missing {name}");
            };
            assert_eq!(unit.revert_arg.as_deref(), Some("--revert"), "{name}");
        }
        let Some(ModCapability::Automated(item)) = profile.find_mod("Item Randomizer") else {
            panic!("missing item randomizer");
        };
        assert!(item.removes.iter().any(|r| r.ends_with('*')));
    }
}
