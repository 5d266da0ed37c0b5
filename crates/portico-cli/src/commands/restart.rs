use super::{
    echo_stderr, json_pretty, render_status_table, spin_fail, spin_ok, spinner, ActionCommand,
    ActionConfig,
};
use portico_core::Orchestrator;

pub struct Restart;

impl ActionCommand for Restart {
    fn name(&self) -> &'static str {
        "restart"
    }

    fn run(&self, orch: &Orchestrator, config: &ActionConfig) -> Result<u8, String> {
        let pb = (!config.json).then(|| spinner("restarting services..."));
        let report = orch.restart(&config.selection).map_err(|e| {
            if let Some(ref pb) = pb {
                spin_fail(pb, "restart failed");
            }
            e.to_string()
        })?;
        echo_stderr(&report.outcome, config.verbose);

        if config.json {
            println!("{}", json_pretty(&report.statuses)?);
            return Ok(report.outcome.exit_code());
        }
        if let Some(pb) = pb {
            if report.outcome.success() {
                spin_ok(&pb, "services restarted");
            } else {
                spin_fail(&pb, &format!("compose restart exited with {}", report.outcome.code));
            }
        }
        for warning in &report.prepare.warnings {
            eprintln!("warning: {warning}");
        }
        if report.outcome.success() {
            print!("{}", render_status_table(&report.statuses, config.verbose));
        }
        Ok(report.outcome.exit_code())
    }
}
