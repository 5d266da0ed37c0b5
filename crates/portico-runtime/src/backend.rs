use crate::RuntimeError;
use std::sync::Arc;
use std::time::Duration;

/// How a command's stdout/stderr are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Inherit the terminal; nothing is captured.
    Stream,
    /// Capture stdout and stderr for the caller.
    Capture,
}

/// One external command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub mode: OutputMode,
    /// `None` waits indefinitely (log streaming, foreground `up`).
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn captured(argv: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            argv,
            mode: OutputMode::Capture,
            timeout,
        }
    }

    pub fn streamed(argv: Vec<String>) -> Self {
        Self {
            argv,
            mode: OutputMode::Stream,
            timeout: None,
        }
    }

    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Exit code clamped into the range a process can return.
    pub fn exit_code(&self) -> u8 {
        match self.code {
            0 => 0,
            c if (1..=255).contains(&c) => c as u8,
            _ => 1,
        }
    }
}

/// Executes external commands on behalf of the orchestrator.
///
/// Implementations must enforce `Invocation::timeout` so that a hung tool
/// cannot block a bounded wait past its ceiling.
pub trait CommandBackend: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, invocation: &Invocation) -> Result<CommandOutcome, RuntimeError>;
}

pub fn select_backend(name: &str) -> Result<Arc<dyn CommandBackend>, RuntimeError> {
    match name {
        "docker" | "process" => Ok(Arc::new(crate::process::ProcessBackend::new())),
        "mock" => Ok(Arc::new(crate::mock::MockBackend::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_backends() {
        assert!(select_backend("docker").is_ok());
        assert!(select_backend("mock").is_ok());
    }

    #[test]
    fn select_invalid_backend_fails() {
        assert!(select_backend("podman-machine").is_err());
    }

    #[test]
    fn exit_code_clamps() {
        let ok = CommandOutcome::default();
        assert!(ok.success());
        assert_eq!(ok.exit_code(), 0);

        let failed = CommandOutcome {
            code: 17,
            ..CommandOutcome::default()
        };
        assert_eq!(failed.exit_code(), 17);

        let weird = CommandOutcome {
            code: -9,
            ..CommandOutcome::default()
        };
        assert_eq!(weird.exit_code(), 1);
    }

    #[test]
    fn invocation_display_joins_argv() {
        let inv = Invocation::streamed(vec!["docker".into(), "compose".into(), "up".into()]);
        assert_eq!(inv.display(), "docker compose up");
        assert_eq!(inv.mode, OutputMode::Stream);
        assert!(inv.timeout.is_none());
    }
}
