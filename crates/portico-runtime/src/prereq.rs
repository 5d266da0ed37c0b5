use crate::backend::{CommandBackend, Invocation};
use crate::compose::ComposeExecutable;
use crate::process::ProcessBackend;
use crate::RuntimeError;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Ceiling for each host check; a daemon that does not answer in time
/// counts as not running.
pub const PREREQ_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (fix: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolCheck {
    Ok,
    Failed,
    NotInstalled,
}

fn run_check(backend: &dyn CommandBackend, argv: &[&str]) -> ToolCheck {
    let invocation = Invocation::captured(
        argv.iter().map(|a| (*a).to_owned()).collect(),
        Some(PREREQ_CHECK_TIMEOUT),
    );
    match backend.execute(&invocation) {
        Ok(outcome) if outcome.success() => ToolCheck::Ok,
        Ok(outcome) => {
            debug!("{} exited with {}", invocation.display(), outcome.code);
            ToolCheck::Failed
        }
        Err(RuntimeError::ToolNotFound(_)) => ToolCheck::NotInstalled,
        Err(e) => {
            debug!("{}: {e}", invocation.display());
            ToolCheck::Failed
        }
    }
}

fn docker_install_hint() -> &'static str {
    if cfg!(target_os = "macos") {
        "brew install --cask docker, then launch Docker Desktop"
    } else if cfg!(target_os = "windows") {
        "install Docker Desktop from https://docs.docker.com/desktop/"
    } else {
        "apt install docker.io | dnf install docker-ce | pacman -S docker | zypper install docker"
    }
}

fn daemon_hint() -> &'static str {
    if cfg!(target_os = "macos") {
        "open -a Docker and wait for the whale icon to settle"
    } else if cfg!(target_os = "windows") {
        "start Docker Desktop from the Start menu"
    } else {
        "sudo systemctl start docker (and add your user to the 'docker' group)"
    }
}

fn compose_hint() -> &'static str {
    if cfg!(target_os = "linux") {
        "apt install docker-compose-plugin | dnf install docker-compose-plugin"
    } else {
        "update Docker Desktop; it bundles the compose plugin"
    }
}

/// Prefer the v2 plugin, fall back to the standalone v1 binary.
pub fn detect_compose_executable() -> Option<ComposeExecutable> {
    detect_compose_executable_with(&ProcessBackend::new())
}

pub fn detect_compose_executable_with(backend: &dyn CommandBackend) -> Option<ComposeExecutable> {
    if run_check(backend, &["docker", "compose", "version"]) == ToolCheck::Ok {
        return Some(ComposeExecutable::plugin());
    }
    if run_check(backend, &["docker-compose", "version"]) == ToolCheck::Ok {
        return Some(ComposeExecutable::standalone());
    }
    None
}

/// Check everything the orchestrator needs from the host.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_compose_prereqs() -> Vec<MissingPrereq> {
    check_compose_prereqs_with(&ProcessBackend::new())
}

/// [`check_compose_prereqs`] over `backend`. Every check is bounded by
/// [`PREREQ_CHECK_TIMEOUT`].
pub fn check_compose_prereqs_with(backend: &dyn CommandBackend) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if run_check(backend, &["docker", "--version"]) == ToolCheck::NotInstalled {
        missing.push(MissingPrereq {
            name: "docker",
            purpose: "container runtime CLI",
            install_hint: docker_install_hint(),
        });
        return missing;
    }

    if run_check(backend, &["docker", "info"]) != ToolCheck::Ok {
        missing.push(MissingPrereq {
            name: "docker daemon",
            purpose: "running container engine",
            install_hint: daemon_hint(),
        });
    }

    if detect_compose_executable_with(backend).is_none() {
        missing.push(MissingPrereq {
            name: "docker compose",
            purpose: "multi-service composition",
            install_hint: compose_hint(),
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nPortico drives services through docker compose; fix the items above and re-run.");
    msg
}
