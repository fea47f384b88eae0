//! Drives an external configurator executable through its own UI.
//!
//! A task launches the tool, waits for its window, performs a scripted step
//! sequence (button clicks, proportional coordinate clicks, pauses), and
//! polls a completion signal on a fixed cadence until it reports success,
//! failure, or the budget lapses. Teardown always runs, even when a step
//! fails: the window gets a close request, an optional confirmation keypress,
//! a grace period to exit, and a kill if it is still alive, followed by
//! best-effort deletion of the tool's scratch files.
//!
//! Synthetic input is global, so callers must not run two sessions at once.

use crate::automation::color::{ColorClassifier, ColorVerdict};
use crate::automation::locator::{self, ControlQuery};
use crate::automation::window::{WindowId, WindowService};
use crate::error::AutomationError;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Timing knobs for a session, loaded from settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationTuning {
    /// Cadence of completion-signal polls.
    pub poll_interval: Duration,
    /// Total time a completion signal may stay pending.
    pub completion_budget: Duration,
    /// Pause after launch before touching the window.
    pub settle_delay: Duration,
    /// Time the tool gets to exit after a close request before being killed.
    pub close_grace: Duration,
    /// Window lookup attempts after the settle delay.
    pub window_attempts: u32,
    /// Delay between window lookup attempts.
    pub window_retry: Duration,
}

impl Default for AutomationTuning {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            completion_budget: Duration::from_secs(30),
            settle_delay: Duration::from_secs(2),
            close_grace: Duration::from_secs(2),
            window_attempts: 30,
            window_retry: Duration::from_millis(100),
        }
    }
}

/// Number of completion polls a budget allows at the given cadence.
pub fn max_polls(budget: Duration, interval: Duration) -> u32 {
    let interval = interval.as_millis().max(1);
    (budget.as_millis() / interval) as u32
}

/// Where to look for a status color.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorRegion {
    /// Background of a located status control.
    StatusControl(ControlQuery),
    /// Strided scan of the window's bottom band for the success color.
    BottomBand {
        height: i32,
        max_width: i32,
        stride: u32,
    },
}

/// How a step announces completion.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionSignal {
    /// Last non-blank line of the newest `.txt` log in `directory` starts
    /// with `prefix`. A relative directory is resolved against the
    /// executable's folder at launch.
    LogMarker {
        directory: Utf8PathBuf,
        prefix: String,
    },
    /// A status region repaints with the success or failure color.
    ColorMatch {
        region: ColorRegion,
        classifier: ColorClassifier,
    },
    /// The control clicked by this step becomes disabled.
    ControlDisabled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Locate a control and activate it.
    ClickControl(ControlQuery),
    /// Click at a position proportional to the window size.
    ClickAt { x_frac: f64, y_frac: f64 },
    /// Let the tool's UI catch up.
    Pause(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutomationStep {
    pub action: StepAction,
    pub completion: Option<CompletionSignal>,
}

impl AutomationStep {
    pub fn click_control(query: ControlQuery) -> Self {
        Self {
            action: StepAction::ClickControl(query),
            completion: None,
        }
    }

    pub fn click_at(x_frac: f64, y_frac: f64) -> Self {
        Self {
            action: StepAction::ClickAt { x_frac, y_frac },
            completion: None,
        }
    }

    pub fn pause(duration: Duration) -> Self {
        Self {
            action: StepAction::Pause(duration),
            completion: None,
        }
    }

    pub fn with_completion(mut self, signal: CompletionSignal) -> Self {
        self.completion = Some(signal);
        self
    }
}

/// One scripted run of an external executable.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationTask {
    pub executable: Utf8PathBuf,
    /// Find the window by exact title instead of by process id. Needed for
    /// tools whose main window belongs to a child process.
    pub window_title: Option<String>,
    pub steps: Vec<AutomationStep>,
    /// Virtual key sent after the close request to dismiss a confirmation
    /// prompt.
    pub confirm_key: Option<u16>,
    /// Scratch files and directories deleted after the run.
    pub cleanup_paths: Vec<Utf8PathBuf>,
}

impl AutomationTask {
    pub fn new(executable: Utf8PathBuf) -> Self {
        Self {
            executable,
            window_title: None,
            steps: Vec::new(),
            confirm_key: None,
            cleanup_paths: Vec::new(),
        }
    }
}

enum SignalState {
    Pending,
    Success,
    Failed(String),
}

struct AutomationSession {
    child: Child,
    window: Option<WindowId>,
    /// Control activated by the most recent click step, for
    /// [`CompletionSignal::ControlDisabled`].
    last_control: Option<WindowId>,
}

/// Runs [`AutomationTask`]s against an injected [`WindowService`].
pub struct ProcessAutomationEngine {
    ws: Arc<dyn WindowService>,
    tuning: AutomationTuning,
}

impl ProcessAutomationEngine {
    pub fn new(ws: Arc<dyn WindowService>) -> Self {
        Self::with_tuning(ws, AutomationTuning::default())
    }

    pub fn with_tuning(ws: Arc<dyn WindowService>, tuning: AutomationTuning) -> Self {
        Self { ws, tuning }
    }

    pub fn tuning(&self) -> &AutomationTuning {
        &self.tuning
    }

    /// Run a task to completion. Teardown runs whether or not the steps
    /// succeeded; the step error (if any) is what the caller sees.
    pub async fn run(&self, task: &AutomationTask) -> Result<(), AutomationError> {
        info!(executable = %task.executable, "starting automation session");
        let mut session = self.launch(task)?;
        let result = self.drive(&mut session, task).await;
        self.shutdown(&mut session, task).await;
        match &result {
            Ok(()) => info!(executable = %task.executable, "automation session finished"),
            Err(e) => warn!(executable = %task.executable, error = %e, "automation session failed"),
        }
        result
    }

    fn launch(&self, task: &AutomationTask) -> Result<AutomationSession, AutomationError> {
        let workdir = task
            .executable
            .parent()
            .unwrap_or_else(|| Utf8Path::new("."));
        let child = Command::new(task.executable.as_std_path())
            .current_dir(workdir)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AutomationError::ProcessLaunchFailure {
                executable: task.executable.clone(),
                source,
            })?;
        Ok(AutomationSession {
            child,
            window: None,
            last_control: None,
        })
    }

    async fn drive(
        &self,
        session: &mut AutomationSession,
        task: &AutomationTask,
    ) -> Result<(), AutomationError> {
        let window = self.await_window(session, task).await?;
        session.window = Some(window);
        debug!(window = window.0, "tool window acquired");

        for step in &task.steps {
            match &step.action {
                StepAction::ClickControl(query) => {
                    let control = locator::locate(self.ws.as_ref(), window, query).ok_or_else(
                        || AutomationError::ControlNotFound {
                            query: query.to_string(),
                        },
                    )?;
                    debug!(control = control.0, %query, "clicking control");
                    session.last_control = Some(control);
                    self.ws.click_button(control);
                }
                StepAction::ClickAt { x_frac, y_frac } => {
                    let rect = self.ws.window_rect(window).ok_or_else(|| {
                        AutomationError::UnexpectedProcessExit {
                            context: "tool window vanished before a click".to_string(),
                        }
                    })?;
                    let x = (rect.width() as f64 * x_frac) as i32;
                    let y = (rect.height() as f64 * y_frac) as i32;
                    debug!(x, y, "clicking at proportional position");
                    self.ws.click_at(window, x, y);
                }
                StepAction::Pause(duration) => sleep(*duration).await,
            }

            if let Some(signal) = &step.completion {
                self.await_completion(session, window, signal).await?;
            }
        }
        Ok(())
    }

    async fn await_window(
        &self,
        session: &mut AutomationSession,
        task: &AutomationTask,
    ) -> Result<WindowId, AutomationError> {
        if let Some(pid) = session.child.id() {
            self.ws.wait_input_idle(pid, self.tuning.settle_delay);
        }
        sleep(self.tuning.settle_delay).await;

        for _ in 0..self.tuning.window_attempts {
            if let Some(status) = self.try_wait(session)? {
                return Err(AutomationError::UnexpectedProcessExit {
                    context: format!("tool exited with {status} before its window appeared"),
                });
            }
            let found = match &task.window_title {
                Some(title) => self.ws.find_window_titled(title),
                None => session
                    .child
                    .id()
                    .and_then(|pid| self.ws.find_main_window(pid)),
            };
            if let Some(window) = found {
                return Ok(window);
            }
            sleep(self.tuning.window_retry).await;
        }
        Err(AutomationError::WindowNotFound {
            executable: task.executable.clone(),
        })
    }

    async fn await_completion(
        &self,
        session: &mut AutomationSession,
        window: WindowId,
        signal: &CompletionSignal,
    ) -> Result<(), AutomationError> {
        let polls = max_polls(self.tuning.completion_budget, self.tuning.poll_interval);
        for _ in 0..polls {
            match self.evaluate(session, window, signal) {
                SignalState::Success => return Ok(()),
                SignalState::Failed(context) => {
                    return Err(AutomationError::TaskFailed { context });
                }
                SignalState::Pending => {}
            }
            sleep(self.tuning.poll_interval).await;
        }
        Err(AutomationError::Timeout {
            budget: self.tuning.completion_budget,
        })
    }

    fn evaluate(
        &self,
        session: &AutomationSession,
        window: WindowId,
        signal: &CompletionSignal,
    ) -> SignalState {
        match signal {
            CompletionSignal::LogMarker { directory, prefix } => {
                if log_tail_matches(directory, prefix) {
                    SignalState::Success
                } else {
                    SignalState::Pending
                }
            }
            CompletionSignal::ControlDisabled => match session.last_control {
                Some(control) if !self.ws.is_enabled(control) => SignalState::Success,
                _ => SignalState::Pending,
            },
            CompletionSignal::ColorMatch { region, classifier } => match region {
                ColorRegion::StatusControl(query) => {
                    let Some(control) = locator::locate(self.ws.as_ref(), window, query) else {
                        return SignalState::Pending;
                    };
                    match classifier.classify_window(self.ws.as_ref(), control) {
                        Some(ColorVerdict::Success) => SignalState::Success,
                        Some(ColorVerdict::Failure) => SignalState::Failed(
                            "status control shows the failure color".to_string(),
                        ),
                        None => SignalState::Pending,
                    }
                }
                ColorRegion::BottomBand {
                    height,
                    max_width,
                    stride,
                } => {
                    if ColorClassifier::scan_band(
                        self.ws.as_ref(),
                        window,
                        &classifier.success,
                        *height,
                        *max_width,
                        *stride,
                    ) {
                        SignalState::Success
                    } else {
                        SignalState::Pending
                    }
                }
            },
        }
    }

    async fn shutdown(&self, session: &mut AutomationSession, task: &AutomationTask) {
        if let Some(window) = session.window {
            self.ws.request_close(window);
            if let Some(key) = task.confirm_key {
                // The save-confirmation prompt needs a moment to appear.
                sleep(Duration::from_millis(300)).await;
                self.ws.press_key(key);
            }
        }

        let _ = tokio::time::timeout(self.tuning.close_grace, session.child.wait()).await;
        if matches!(session.child.try_wait(), Ok(None)) {
            warn!(executable = %task.executable, "tool ignored close request, killing it");
            let _ = session.child.kill().await;
        }

        for path in &task.cleanup_paths {
            let removed = if path.is_dir() {
                fs::remove_dir_all(path)
            } else if path.is_file() {
                fs::remove_file(path)
            } else {
                continue;
            };
            match removed {
                Ok(()) => debug!(%path, "removed tool scratch path"),
                Err(e) => debug!(%path, error = %e, "leaving tool scratch path behind"),
            }
        }
    }

    fn try_wait(
        &self,
        session: &mut AutomationSession,
    ) -> Result<Option<std::process::ExitStatus>, AutomationError> {
        session
            .child
            .try_wait()
            .map_err(|e| AutomationError::UnexpectedProcessExit {
                context: format!("could not query tool process state: {e}"),
            })
    }
}

/// Check the most recently modified `.txt` file in a log directory for a
/// final line starting with the marker prefix. Tools that stream their
/// progress log end the run by announcing where messages were written.
pub fn log_tail_matches(directory: &Utf8Path, prefix: &str) -> bool {
    let Ok(entries) = directory.read_dir_utf8() else {
        return false;
    };

    let mut newest: Option<(std::time::SystemTime, Utf8PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension() != Some("txt") {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if newest.as_ref().is_none_or(|(stamp, _)| modified > *stamp) {
            newest = Some((modified, path.to_path_buf()));
        }
    }

    let Some((_, path)) = newest else {
        return false;
    };
    let Ok(contents) = fs::read_to_string(&path) else {
        return false;
    };
    contents
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .is_some_and(|line| {
            line.trim()
                .to_lowercase()
                .starts_with(&prefix.to_lowercase())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::color::Rgb;
    use crate::automation::window::Rect;
    use crate::automation::window::fake::FakeWindowService;
    use tempfile::TempDir;

    fn fast_tuning() -> AutomationTuning {
        AutomationTuning {
            poll_interval: Duration::from_millis(5),
            completion_budget: Duration::from_millis(50),
            settle_delay: Duration::from_millis(5),
            close_grace: Duration::from_millis(50),
            window_attempts: 5,
            window_retry: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_max_polls_matches_budget() {
        assert_eq!(
            max_polls(Duration::from_secs(30), Duration::from_millis(500)),
            60
        );
        assert_eq!(
            max_polls(Duration::from_millis(50), Duration::from_millis(5)),
            10
        );
    }

    #[test]
    fn test_log_tail_marker() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        assert!(!log_tail_matches(&root, "Writing messages to "));

        std::fs::write(root.join("ignored.log"), "Writing messages to spoiler.txt\n").unwrap();
        assert!(!log_tail_matches(&root, "Writing messages to "));

        std::fs::write(
            root.join("run1.txt"),
            "seed 12345\nshuffling entrances\nWriting messages to spoiler_logs\n\n",
        )
        .unwrap();
        assert!(log_tail_matches(&root, "Writing messages to "));
    }

    #[test]
    fn test_log_tail_wants_marker_on_last_line() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::write(
            root.join("run1.txt"),
            "Writing messages to spoiler_logs\nstill shuffling\n",
        )
        .unwrap();
        assert!(!log_tail_matches(&root, "Writing messages to "));
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let ws = Arc::new(FakeWindowService::new());
        let engine = ProcessAutomationEngine::with_tuning(ws, fast_tuning());
        let task = AutomationTask::new(Utf8PathBuf::from("/nonexistent/DS3Randomizer.exe"));

        let err = engine.run(&task).await.unwrap_err();
        assert!(matches!(err, AutomationError::ProcessLaunchFailure { .. }));
    }

    #[cfg(unix)]
    fn write_script(dir: &Utf8Path, name: &str, body: &str) -> Utf8PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_is_unexpected() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let exe = write_script(&root, "flaky.sh", "exit 3");

        let ws = Arc::new(FakeWindowService::new());
        let engine = ProcessAutomationEngine::with_tuning(ws, fast_tuning());
        let task = AutomationTask::new(exe);

        let err = engine.run(&task).await.unwrap_err();
        assert!(matches!(
            err,
            AutomationError::UnexpectedProcessExit { .. } | AutomationError::WindowNotFound { .. }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_full_session_with_fake_window() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let exe = write_script(&root, "tool.sh", "sleep 30");
        let scratch = root.join("tool.sh.config");
        std::fs::write(&scratch, "settings").unwrap();

        let ws = Arc::new(FakeWindowService::new());
        let main = ws.add_window(None, "Fake Randomizer", Rect::new(0, 0, 800, 600));
        let button = ws.add_child(main, "Button", "Randomize!", Rect::new(10, 10, 120, 40));
        // Disabled from the first completion poll onward.
        ws.disable_after_queries(button, 1);

        let engine = ProcessAutomationEngine::with_tuning(ws.clone(), fast_tuning());
        let mut task = AutomationTask::new(exe);
        task.window_title = Some("Fake Randomizer".to_string());
        task.confirm_key = Some(crate::automation::window::VK_RETURN);
        task.cleanup_paths = vec![scratch.clone()];
        task.steps = vec![
            AutomationStep::click_control(ControlQuery::by_text("Randomize!"))
                .with_completion(CompletionSignal::ControlDisabled),
        ];

        engine.run(&task).await.unwrap();

        assert_eq!(ws.clicks(), vec![button]);
        assert_eq!(ws.close_requests(), vec![main]);
        assert_eq!(
            ws.pressed_keys(),
            vec![crate::automation::window::VK_RETURN]
        );
        assert!(!scratch.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_status_failure_color_fails_task() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let exe = write_script(&root, "tool.sh", "sleep 30");

        let ws = Arc::new(FakeWindowService::new());
        let main = ws.add_window(None, "Fake Randomizer", Rect::new(0, 0, 800, 600));
        let button = ws.add_child(main, "Button", "Randomize!", Rect::new(10, 10, 120, 40));
        let status = ws.add_child(main, "msctls_statusbar32", "", Rect::new(0, 578, 800, 600));
        ws.set_background(status, Rgb::new(205, 92, 92));
        let _ = button;

        let engine = ProcessAutomationEngine::with_tuning(ws, fast_tuning());
        let mut task = AutomationTask::new(exe);
        task.window_title = Some("Fake Randomizer".to_string());
        task.steps = vec![
            AutomationStep::click_control(ControlQuery::by_text("Randomize!")).with_completion(
                CompletionSignal::ColorMatch {
                    region: ColorRegion::StatusControl(ControlQuery::by_class(
                        "msctls_statusbar32",
                    )),
                    classifier: ColorClassifier::default(),
                },
            ),
        ];

        let err = engine.run(&task).await.unwrap_err();
        assert!(matches!(err, AutomationError::TaskFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pending_signal_times_out() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let exe = write_script(&root, "tool.sh", "sleep 30");

        let ws = Arc::new(FakeWindowService::new());
        let main = ws.add_window(None, "Fake Randomizer", Rect::new(0, 0, 800, 600));
        ws.add_child(main, "Button", "Randomize!", Rect::new(10, 10, 120, 40));

        let engine = ProcessAutomationEngine::with_tuning(ws.clone(), fast_tuning());
        let mut task = AutomationTask::new(exe);
        task.window_title = Some("Fake Randomizer".to_string());
        task.steps = vec![
            AutomationStep::click_control(ControlQuery::by_text("Randomize!"))
                .with_completion(CompletionSignal::ControlDisabled),
        ];

        let err = engine.run(&task).await.unwrap_err();
        assert!(matches!(err, AutomationError::Timeout { .. }));
        // Teardown still asked the window to close.
        assert_eq!(ws.close_requests(), vec![main]);
    }
}
