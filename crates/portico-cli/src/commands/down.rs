use super::{echo_stderr, spin_fail, spin_ok, spinner, ActionCommand, ActionConfig};
use portico_core::Orchestrator;

pub struct Down;

impl ActionCommand for Down {
    fn name(&self) -> &'static str {
        "down"
    }

    fn run(&self, orch: &Orchestrator, config: &ActionConfig) -> Result<u8, String> {
        let pb = spinner("stopping services...");
        let outcome = orch.down().map_err(|e| {
            spin_fail(&pb, "stop failed");
            e.to_string()
        })?;
        if outcome.success() {
            spin_ok(&pb, "services stopped");
        } else {
            spin_fail(&pb, &format!("compose down exited with {}", outcome.code));
        }
        echo_stderr(&outcome, config.verbose);
        Ok(outcome.exit_code())
    }
}
