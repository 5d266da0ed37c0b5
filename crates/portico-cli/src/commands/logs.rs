use super::{ActionCommand, ActionConfig};
use portico_core::Orchestrator;

pub struct Logs;

impl ActionCommand for Logs {
    fn name(&self) -> &'static str {
        "logs"
    }

    fn run(&self, orch: &Orchestrator, config: &ActionConfig) -> Result<u8, String> {
        let outcome = orch.logs(&config.selection).map_err(|e| e.to_string())?;
        Ok(outcome.exit_code())
    }
}
