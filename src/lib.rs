// Souls Configurator - mod installation orchestration for FromSoftware games
//
// This is the library crate containing the installation orchestration engine
// and the external-process automation engine. The presentation layer (mod
// lists, progress UI) and the download service are external collaborators.

pub mod automation;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;

// Re-export commonly used types for convenience
pub use automation::{ProcessAutomationEngine, WindowService};
pub use config::{ConfigManager, Settings};
pub use error::{AutomationError, InstallError};
pub use models::{ModCapability, ModDescriptor};
pub use services::{GameProfile, InstallationOrchestrator};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
