pub mod clean;
pub mod completions;
pub mod doctor;
pub mod down;
pub mod generate;
pub mod logs;
pub mod restart;
pub mod status;
pub mod up;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use portico_core::{Orchestrator, ServiceSelection, UpRequest};
use portico_runtime::{CommandOutcome, ServiceRuntimeStatus};
use portico_schema::Environment;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_PREREQUISITE: u8 = 2;
/// Exit status once a signal teardown has run.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Error prefix `main` maps to [`EXIT_PREREQUISITE`].
pub const PREREQUISITE_PREFIX: &str = "prerequisite error:";

/// Raw command-line flags shared by every lifecycle action.
#[derive(Debug, Clone)]
pub struct ActionFlags {
    pub env: Environment,
    pub project_root: PathBuf,
    pub services: String,
    pub server_services: String,
    pub build: bool,
    pub detach: bool,
    pub follow_logs: bool,
    pub verbose: bool,
    pub json: bool,
}

/// Flags after validation.
#[derive(Debug, Clone)]
pub struct ActionConfig {
    pub selection: ServiceSelection,
    pub up: UpRequest,
    pub verbose: bool,
    pub json: bool,
}

impl ActionConfig {
    pub fn from_flags(flags: &ActionFlags) -> Result<Self, String> {
        let selection = ServiceSelection::parse(&flags.services, &flags.server_services)
            .map_err(|e| e.to_string())?;
        Ok(Self {
            up: UpRequest {
                selection: selection.clone(),
                build: flags.build,
                detach: flags.detach,
                follow_logs: flags.follow_logs,
            },
            selection,
            verbose: flags.verbose,
            json: flags.json,
        })
    }
}

/// One lifecycle action: validate flags, then run against an orchestrator.
pub trait ActionCommand: Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, flags: &ActionFlags) -> Result<ActionConfig, String> {
        ActionConfig::from_flags(flags)
    }

    fn run(&self, orch: &Orchestrator, config: &ActionConfig) -> Result<u8, String>;
}

pub static ACTIONS: &[&dyn ActionCommand] = &[
    &up::Up,
    &down::Down,
    &restart::Restart,
    &status::Status,
    &logs::Logs,
    &clean::Clean,
];

pub fn find_action(name: &str) -> Option<&'static dyn ActionCommand> {
    ACTIONS.iter().copied().find(|a| a.name() == name)
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn spin_warn(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("⚠ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    match state {
        "running" | "healthy" => Style::new().green().apply_to(state).to_string(),
        "starting" | "created" | "restarting" | "paused" => {
            Style::new().yellow().apply_to(state).to_string()
        }
        "unhealthy" | "dead" => Style::new().red().bold().apply_to(state).to_string(),
        "exited" | "removing" => Style::new().dim().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

/// Text table of service states; `verbose` adds port mappings.
pub fn render_status_table(statuses: &[ServiceRuntimeStatus], verbose: bool) -> String {
    if statuses.is_empty() {
        return "no services running\n".to_owned();
    }
    let width = statuses
        .iter()
        .map(|s| s.service_name.len())
        .max()
        .unwrap_or(0)
        .max("SERVICE".len());
    let mut out = String::new();
    let _ = writeln!(out, "{:<width$}  {:<10}  HEALTH", "SERVICE", "STATE");
    for s in statuses {
        let state = s.state.to_string();
        let health = s.health.to_string();
        // pad before styling so escape codes do not break alignment
        let _ = writeln!(
            out,
            "{:<width$}  {}{}  {}",
            s.service_name,
            colorize_state(&state),
            " ".repeat(10usize.saturating_sub(state.len())),
            colorize_state(&health)
        );
        if verbose {
            for port in &s.ports {
                let _ = writeln!(out, "{:<width$}    {port}", "");
            }
        }
    }
    out
}

/// Echo captured stderr when verbose, or always when the command failed.
pub fn echo_stderr(outcome: &CommandOutcome, verbose: bool) {
    let stderr = outcome.stderr.trim();
    if !stderr.is_empty() && (verbose || !outcome.success()) {
        eprintln!("{stderr}");
    }
}
