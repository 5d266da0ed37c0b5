use super::{json_pretty, EXIT_SUCCESS};
use portico_core::Orchestrator;

/// Discovery and config synthesis only; no container calls.
pub fn run(orch: &Orchestrator, json_output: bool) -> Result<u8, String> {
    let report = orch.generate().map_err(|e| e.to_string())?;
    if json_output {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }
    for skipped in &report.discovery.skipped {
        eprintln!("warning: skipped {}: {}", skipped.dir.display(), skipped.reason);
    }
    println!(
        "{} service(s): {}",
        report.discovery.services.len(),
        report.discovery.names().join(", ")
    );
    println!("{}", report.paths.proxy_config.display());
    println!("{}", report.paths.compose_override.display());
    println!("{}", report.paths.url_map.display());
    Ok(EXIT_SUCCESS)
}
