//! Domain model: mod descriptors, payloads, and capabilities.

pub mod mods;

pub use mods::{
    ConfigurableAutomatedMod, DropPayload, FileDropMod, InstallContext, ModCapability,
    ModDescriptor, StatusSink, backup_variant, extract_archive,
};
