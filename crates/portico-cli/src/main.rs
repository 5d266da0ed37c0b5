mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{ActionFlags, EXIT_FAILURE, EXIT_PREREQUISITE, PREREQUISITE_PREFIX};
use portico_core::Orchestrator;
use portico_runtime::{CommandBackend, ComposeExecutable, MockBackend};
use portico_schema::Environment;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "portico",
    version,
    about = "Local multi-service environments behind a single gateway port"
)]
struct Cli {
    /// Target environment: local, test, dev, release, prod.
    #[arg(long, default_value = "local", value_parser = parse_env, global = true)]
    env: Environment,

    /// Service groups: website, server, db, gateway, all (comma separated).
    #[arg(long, default_value = "all", global = true)]
    services: String,

    /// Function services covered by the `server` group (comma separated, or all).
    #[arg(long, default_value = "all", global = true)]
    server_services: String,

    /// Rebuild images before starting.
    #[arg(long, default_value_t = false, global = true)]
    build: bool,

    /// Run in the foreground instead of detaching.
    #[arg(long, default_value_t = false, global = true)]
    no_detach: bool,

    /// Follow service logs once the stack is up.
    #[arg(long, default_value_t = false, global = true)]
    follow_logs: bool,

    /// Project directory containing docker-compose.yml and services/.
    #[arg(long, default_value = ".", global = true)]
    project_root: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Generate config, start services, wait for health, and sync gateway routes.
    Up,
    /// Stop and remove the stack.
    Down,
    /// Restart services with freshly generated config.
    Restart,
    /// Show service states.
    Status,
    /// Stream service logs.
    Logs,
    /// Remove containers, volumes, and networks.
    Clean,
    /// Write nginx.conf, the compose override, and service-urls.json without starting anything.
    Generate,
    /// Run diagnostic checks on the host and project.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn parse_env(raw: &str) -> Result<Environment, String> {
    raw.parse().map_err(|e: portico_schema::EnvironmentError| e.to_string())
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PORTICO_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let result = dispatch(&cli);

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with(PREREQUISITE_PREFIX) {
                EXIT_PREREQUISITE
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn dispatch(cli: &Cli) -> Result<u8, String> {
    let command = cli.command.clone().unwrap_or(Commands::Up);
    let project_root = absolute(&cli.project_root)?;

    let name = match command {
        Commands::Completions { shell } => return commands::completions::run::<Cli>(shell),
        Commands::Doctor => return commands::doctor::run(&project_root, cli.env, cli.json),
        Commands::Generate => {
            let (backend, executable) = runtime(false)?;
            let orch = Orchestrator::open(&project_root, cli.env, backend, executable)
                .map_err(|e| e.to_string())?;
            return commands::generate::run(&orch, cli.json);
        }
        Commands::Up => "up",
        Commands::Down => "down",
        Commands::Restart => "restart",
        Commands::Status => "status",
        Commands::Logs => "logs",
        Commands::Clean => "clean",
    };
    let action = commands::find_action(name).ok_or_else(|| format!("unknown action '{name}'"))?;
    let flags = ActionFlags {
        env: cli.env,
        project_root: project_root.clone(),
        services: cli.services.clone(),
        server_services: cli.server_services.clone(),
        build: cli.build,
        detach: !cli.no_detach,
        follow_logs: cli.follow_logs,
        verbose: cli.verbose || cli.trace,
        json: cli.json,
    };
    let config = action.validate(&flags)?;

    let (backend, executable) = runtime(true)?;
    let orch = Orchestrator::open(&project_root, cli.env, backend, executable)
        .map_err(|e| e.to_string())?;
    orch.cleanup()
        .install_signal_handler()
        .map_err(|e| e.to_string())?;
    let result = action.run(&orch, &config);
    if orch.cleanup().wait_for_teardown() {
        return Ok(commands::EXIT_INTERRUPTED);
    }
    result
}

/// Backend from `PORTICO_COMPOSE_BACKEND`, and the compose executable this
/// host provides. The mock backend takes forced failures from
/// `PORTICO_MOCK_FAIL` (`verb=code,...`). Prerequisites are checked for the docker backend unless
/// `PORTICO_SKIP_PREREQS=1`.
fn runtime(check_prereqs: bool) -> Result<(Arc<dyn CommandBackend>, ComposeExecutable), String> {
    let backend_name =
        std::env::var("PORTICO_COMPOSE_BACKEND").unwrap_or_else(|_| "docker".to_owned());
    let backend: Arc<dyn CommandBackend> = if backend_name == "mock" {
        let mock = MockBackend::new();
        if let Ok(spec) = std::env::var("PORTICO_MOCK_FAIL") {
            mock.fail_on_spec(&spec).map_err(|e| e.to_string())?;
        }
        Arc::new(mock)
    } else {
        portico_runtime::select_backend(&backend_name).map_err(|e| e.to_string())?
    };
    let skip = !check_prereqs
        || backend_name == "mock"
        || std::env::var("PORTICO_SKIP_PREREQS").as_deref() == Ok("1");
    if skip {
        return Ok((backend, ComposeExecutable::plugin()));
    }

    let missing = portico_runtime::check_compose_prereqs();
    if !missing.is_empty() {
        return Err(format!(
            "{PREREQUISITE_PREFIX} {}",
            portico_runtime::format_missing(&missing)
        ));
    }
    let executable = portico_runtime::detect_compose_executable().ok_or_else(|| {
        format!("{PREREQUISITE_PREFIX} neither `docker compose` nor `docker-compose` works")
    })?;
    Ok((backend, executable))
}

fn absolute(path: &Path) -> Result<PathBuf, String> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| format!("cannot read current directory: {e}"))?;
    Ok(cwd.join(path))
}
