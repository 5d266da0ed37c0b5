use super::{echo_stderr, json_pretty, render_status_table, ActionCommand, ActionConfig, EXIT_SUCCESS};
use portico_core::Orchestrator;

pub struct Status;

impl ActionCommand for Status {
    fn name(&self) -> &'static str {
        "status"
    }

    fn run(&self, orch: &Orchestrator, config: &ActionConfig) -> Result<u8, String> {
        let report = orch.status(&config.selection).map_err(|e| e.to_string())?;
        echo_stderr(&report.outcome, config.verbose);
        if !report.outcome.success() {
            return Ok(report.outcome.exit_code());
        }
        if config.json {
            println!("{}", json_pretty(&report.statuses)?);
        } else {
            print!("{}", render_status_table(&report.statuses, config.verbose));
        }
        Ok(EXIT_SUCCESS)
    }
}
