//! Installation services: game profiles, plan building, and run
//! orchestration.

pub mod games;
pub mod orchestrator;
pub mod profile;

pub use games::{all_games, dark_souls_2, dark_souls_3, dark_souls_remastered};
pub use orchestrator::InstallationOrchestrator;
pub use profile::{EnginePolicy, GameProfile, InstallationPlan, PlanStep};
