use super::{echo_stderr, spin_fail, spin_ok, spinner, ActionCommand, ActionConfig};
use portico_core::Orchestrator;

pub struct Clean;

impl ActionCommand for Clean {
    fn name(&self) -> &'static str {
        "clean"
    }

    fn run(&self, orch: &Orchestrator, config: &ActionConfig) -> Result<u8, String> {
        let pb = spinner("removing containers, volumes and networks...");
        let report = orch.clean().map_err(|e| {
            spin_fail(&pb, "clean failed");
            e.to_string()
        })?;
        echo_stderr(&report.down, config.verbose);
        for (_, outcome) in &report.prunes {
            echo_stderr(outcome, config.verbose);
        }
        match report.exit_code() {
            0 => spin_ok(&pb, "environment cleaned"),
            code => spin_fail(&pb, &format!("clean failed with exit {code}")),
        }
        Ok(report.exit_code())
    }
}
