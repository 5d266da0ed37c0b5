use super::{
    echo_stderr, json_pretty, render_status_table, spin_fail, spin_ok, spin_warn, spinner,
    ActionCommand, ActionConfig,
};
use console::Style;
use indicatif::ProgressBar;
use portico_core::{GatewayStep, HealthOutcome, Orchestrator, ServiceUrlMap, UpReport, UpRequest};

pub struct Up;

impl ActionCommand for Up {
    fn name(&self) -> &'static str {
        "up"
    }

    fn run(&self, orch: &Orchestrator, config: &ActionConfig) -> Result<u8, String> {
        // follow after the summary is printed, not inside `up`
        let request = UpRequest {
            follow_logs: false,
            ..config.up.clone()
        };
        let pb = (request.detach && !config.json).then(|| spinner("starting services..."));
        let report = match orch.up(&request) {
            Ok(report) => report,
            Err(e) => {
                if let Some(pb) = pb {
                    spin_fail(&pb, "start failed");
                }
                return Err(e.to_string());
            }
        };
        echo_stderr(&report.outcome, config.verbose);

        if config.json {
            println!("{}", json_pretty(&report)?);
            return Ok(report.exit_code());
        }

        for warning in &report.prepare.warnings {
            eprintln!("warning: {warning}");
        }
        if let Some(pb) = pb {
            if report.outcome.success() {
                finish_spinner(&pb, report.health.as_ref());
            } else {
                spin_fail(&pb, &format!("compose up exited with {}", report.outcome.code));
            }
        }
        if report.outcome.success() && request.detach {
            print_summary(&report, config.verbose);
            if config.up.follow_logs {
                println!();
                orch.logs(&config.selection).map_err(|e| e.to_string())?;
            }
        }
        Ok(report.exit_code())
    }
}

fn finish_spinner(pb: &ProgressBar, health: Option<&HealthOutcome>) {
    match health {
        Some(HealthOutcome::Ready { services }) => {
            spin_ok(pb, &format!("{} service(s) ready", services.len()));
        }
        Some(HealthOutcome::TimedOut { pending, .. }) => {
            spin_warn(pb, &format!("still waiting for: {}", pending.join(", ")));
        }
        Some(HealthOutcome::Cancelled { .. }) => spin_warn(pb, "interrupted"),
        None => spin_ok(pb, "services started"),
    }
}

fn print_summary(report: &UpReport, verbose: bool) {
    if !report.statuses.is_empty() {
        println!();
        print!("{}", render_status_table(&report.statuses, verbose));
    }
    match &report.gateway {
        GatewayStep::NotRequested => {}
        GatewayStep::Unreachable => eprintln!("warning: API emulator not reachable, routes not synced"),
        GatewayStep::Failed { error } => eprintln!("warning: gateway sync failed: {error}"),
        GatewayStep::Synced { report } => {
            println!(
                "\ngateway: {} service(s), {} route(s) wired, {} error(s)",
                report.services_wired,
                report.wired.len(),
                report.errors.len()
            );
            for err in &report.errors {
                eprintln!("  {err}");
            }
        }
    }
    print_urls(&report.prepare.generate.url_map);
}

fn print_urls(urls: &ServiceUrlMap) {
    let bold = Style::new().bold();
    println!();
    println!("{} {}", bold.apply_to("website:"), urls.website.url);
    println!("{} {}", bold.apply_to("api:    "), urls.api_gateway.base);
    for (name, service) in &urls.api_gateway.services {
        println!("  {name:<16} {} [{}]", service.base, service.methods.join(", "));
    }
}
