use crate::backend::{CommandBackend, CommandOutcome, Invocation};
use crate::RuntimeError;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

/// In-memory compose stand-in that records every invocation.
///
/// `up` marks the named services as running and `ps` reports them, so the
/// whole orchestrator can run without a container engine. Tests can script
/// `ps` output and force failures per subcommand.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    invocations: Vec<Vec<String>>,
    running: BTreeSet<String>,
    ps_script: VecDeque<String>,
    sticky_ps: Option<String>,
    failures: HashMap<String, i32>,
}

const VERBS: &[&str] = &[
    "up", "down", "restart", "stop", "rm", "logs", "ps", "prune", "info", "version",
];

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every argv executed so far, in order.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.state
            .lock()
            .map(|s| s.invocations.clone())
            .unwrap_or_default()
    }

    /// Queue raw `ps --format json` output. The last queued value keeps being
    /// returned once the queue drains.
    pub fn push_ps_output(&self, output: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.ps_script.push_back(output.to_owned());
        }
    }

    /// Make every invocation whose verb is `verb` exit with `code`.
    pub fn fail_on(&self, verb: &str, code: i32) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(verb.to_owned(), code);
        }
    }

    /// Apply `fail_on` for each `verb=code` pair in a comma-separated list,
    /// e.g. `ps=3,down=1`.
    pub fn fail_on_spec(&self, spec: &str) -> Result<(), RuntimeError> {
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parsed = entry
                .split_once('=')
                .and_then(|(verb, code)| Some((verb.trim(), code.trim().parse::<i32>().ok()?)));
            match parsed {
                Some((verb, code)) if VERBS.contains(&verb) => self.fail_on(verb, code),
                _ => {
                    return Err(RuntimeError::BackendUnavailable(format!(
                        "mock (bad failure entry '{entry}')"
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn running_services(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.running.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn verb_position(argv: &[String]) -> Option<usize> {
    argv.iter().position(|arg| VERBS.contains(&arg.as_str()))
}

fn service_args(argv: &[String], verb_at: usize) -> Vec<String> {
    argv[verb_at + 1..]
        .iter()
        .filter(|a| !a.starts_with('-') && a.parse::<u64>().is_err() && *a != "json")
        .cloned()
        .collect()
}

fn render_running(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!(r#"{{"Service":"{n}","State":"running","Health":""}}"#))
        .collect::<Vec<_>>()
        .join("\n")
}

impl CommandBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn execute(&self, invocation: &Invocation) -> Result<CommandOutcome, RuntimeError> {
        if invocation.argv.is_empty() {
            return Err(RuntimeError::EmptyCommand);
        }
        let mut state = self
            .state
            .lock()
            .map_err(|e| RuntimeError::Io(std::io::Error::other(format!("mutex poisoned: {e}"))))?;
        state.invocations.push(invocation.argv.clone());

        let Some(at) = verb_position(&invocation.argv) else {
            return Ok(CommandOutcome::default());
        };
        let verb = invocation.argv[at].as_str();

        if let Some(code) = state.failures.get(verb).copied() {
            return Ok(CommandOutcome {
                code,
                stdout: String::new(),
                stderr: format!("mock: {verb} failed"),
            });
        }

        let services = service_args(&invocation.argv, at);
        let stdout = match verb {
            "up" | "restart" => {
                state.running.extend(services);
                String::new()
            }
            "down" | "rm" => {
                state.running.clear();
                String::new()
            }
            "ps" => {
                if let Some(next) = state.ps_script.pop_front() {
                    state.sticky_ps = Some(next.clone());
                    next
                } else if let Some(ref sticky) = state.sticky_ps {
                    sticky.clone()
                } else {
                    let names: Vec<String> = if services.is_empty() {
                        state.running.iter().cloned().collect()
                    } else {
                        services
                            .into_iter()
                            .filter(|s| state.running.contains(s))
                            .collect()
                    };
                    render_running(&names)
                }
            }
            _ => String::new(),
        };

        Ok(CommandOutcome {
            code: 0,
            stdout,
            stderr: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::parse_ps_output;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn failure_spec_forces_exit_codes() {
        let backend = MockBackend::new();
        backend.fail_on_spec("ps=3, down=1").unwrap();
        let ps = backend
            .execute(&Invocation::captured(argv(&["docker", "compose", "ps"]), None))
            .unwrap();
        assert_eq!(ps.code, 3);
        assert_eq!(ps.stderr, "mock: ps failed");
        assert!(backend.fail_on_spec("ps").is_err());
        assert!(backend.fail_on_spec("launch=2").is_err());
    }

    #[test]
    fn mock_lifecycle() {
        let backend = MockBackend::new();
        backend
            .execute(&Invocation::captured(
                argv(&["docker", "compose", "-f", "dc.yml", "up", "-d", "db", "gateway"]),
                None,
            ))
            .unwrap();
        assert_eq!(backend.running_services(), vec!["db", "gateway"]);

        let ps = backend
            .execute(&Invocation::captured(
                argv(&["docker", "compose", "-f", "dc.yml", "ps", "--all", "--format", "json"]),
                None,
            ))
            .unwrap();
        let statuses = parse_ps_output(&ps.stdout).unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.is_ready()));

        backend
            .execute(&Invocation::captured(
                argv(&["docker", "compose", "-f", "dc.yml", "down", "--remove-orphans"]),
                None,
            ))
            .unwrap();
        assert!(backend.running_services().is_empty());
        assert_eq!(backend.invocations().len(), 3);
    }

    #[test]
    fn scripted_ps_output_is_sticky() {
        let backend = MockBackend::new();
        backend.push_ps_output("first");
        backend.push_ps_output("second");
        let ps = Invocation::captured(argv(&["docker", "compose", "ps"]), None);
        assert_eq!(backend.execute(&ps).unwrap().stdout, "first");
        assert_eq!(backend.execute(&ps).unwrap().stdout, "second");
        assert_eq!(backend.execute(&ps).unwrap().stdout, "second");
    }

    #[test]
    fn forced_failure() {
        let backend = MockBackend::new();
        backend.fail_on("down", 4);
        let outcome = backend
            .execute(&Invocation::captured(
                argv(&["docker", "compose", "down"]),
                None,
            ))
            .unwrap();
        assert_eq!(outcome.code, 4);
        assert!(!outcome.stderr.is_empty());
    }

    #[test]
    fn restart_keeps_services_running() {
        let backend = MockBackend::new();
        backend
            .execute(&Invocation::captured(
                argv(&["docker", "compose", "up", "-d", "web"]),
                None,
            ))
            .unwrap();
        backend
            .execute(&Invocation::captured(
                argv(&["docker", "compose", "restart", "web"]),
                None,
            ))
            .unwrap();
        assert_eq!(backend.running_services(), vec!["web"]);
    }
}
