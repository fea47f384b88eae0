use camino::Utf8PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while driving a foreign configurator executable.
///
/// Timeouts are ordinary failures, not panics: the automation session still
/// runs its terminate/cleanup states before the error is returned.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("failed to launch {executable}")]
    ProcessLaunchFailure {
        executable: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no main window appeared for {executable}")]
    WindowNotFound { executable: Utf8PathBuf },

    #[error("control not found: {query}")]
    ControlNotFound { query: String },

    #[error("completion signal did not fire within {budget:?}")]
    Timeout { budget: Duration },

    #[error("process exited unexpectedly: {context}")]
    UnexpectedProcessExit { context: String },

    #[error("tool reported failure: {context}")]
    TaskFailed { context: String },
}

/// Errors raised by installation and removal operations.
///
/// Each variant carries enough context to tell a missing archive apart from
/// a timed-out automation run without consulting the logs.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("install path is not set for {game}")]
    InstallPathNotSet { game: String },

    #[error("mod source missing: {path}")]
    SourceUnavailable { path: Utf8PathBuf },

    #[error("prerequisite missing: {name}")]
    PrerequisiteMissing { name: String },

    #[error("failed to extract {archive}: {context}")]
    ExtractionFailure { archive: Utf8PathBuf, context: String },

    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error("i/o error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl InstallError {
    /// Attach an operation description to a raw i/o error.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = InstallError::SourceUnavailable {
            path: Utf8PathBuf::from("Data/DS3/ModEngine.zip"),
        };
        assert!(err.to_string().contains("ModEngine.zip"));

        let err = InstallError::from(AutomationError::Timeout {
            budget: Duration::from_secs(30),
        });
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_io_constructor_keeps_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = InstallError::io("renaming backup", inner);
        assert!(err.to_string().contains("renaming backup"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
