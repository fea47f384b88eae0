//! External-process window automation: launching a configurator tool,
//! finding its controls, scripting its UI, and watching for completion.

pub mod color;
pub mod engine;
pub mod locator;
pub mod window;

pub use color::{Channel, ColorClassifier, ColorRule, ColorVerdict, Rgb};
pub use engine::{
    AutomationStep, AutomationTask, AutomationTuning, ColorRegion, CompletionSignal,
    ProcessAutomationEngine, StepAction, max_polls,
};
pub use locator::ControlQuery;
pub use window::{Rect, VK_RETURN, WindowId, WindowService};
