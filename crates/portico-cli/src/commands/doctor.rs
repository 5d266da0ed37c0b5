use super::{json_pretty, EXIT_FAILURE, EXIT_SUCCESS};
use portico_core::discover_services;
use portico_schema::{Environment, EnvironmentContext, ProjectConfig, PROJECT_CONFIG_FILE};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub fn run(project_root: &Path, env: Environment, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_prereqs(&mut checks, &mut all_pass);
    check_project(project_root, env, &mut checks, &mut all_pass);

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = portico_runtime::check_compose_prereqs();
    if missing.is_empty() {
        let flavor = match portico_runtime::detect_compose_executable() {
            Some(exe) => exe.tokens().join(" "),
            None => "docker compose".to_owned(),
        };
        checks.push(Check::pass(
            "compose_prereqs",
            &format!("Container prerequisites satisfied ({flavor})"),
        ));
    } else {
        *all_pass = false;
        for m in &missing {
            checks.push(Check::fail("compose_prereqs", &m.to_string()));
        }
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn check_project(root: &Path, env: Environment, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let config = match ProjectConfig::load(root) {
        Ok(config) => {
            if root.join(PROJECT_CONFIG_FILE).exists() {
                checks.push(Check::pass("project_config", &format!("{PROJECT_CONFIG_FILE} is valid")));
            } else {
                checks.push(Check::info(
                    "project_config",
                    &format!("No {PROJECT_CONFIG_FILE}, using defaults"),
                ));
            }
            config
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("project_config", &e.to_string()));
            return;
        }
    };

    let compose_file = resolve(root, &config.paths.compose_file);
    if compose_file.is_file() {
        checks.push(Check::pass(
            "compose_file",
            &format!("Base compose file {}", compose_file.display()),
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "compose_file",
            &format!("Base compose file {} not found", compose_file.display()),
        ));
    }

    let template = resolve(root, &config.paths.templates_dir)
        .join(config.paths.template_variant.file_name());
    if template.is_file() {
        checks.push(Check::pass("template", &format!("Build template {}", template.display())));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "template",
            &format!("Build template {} not found", template.display()),
        ));
    }

    let env_file = root.join(env.env_file_name());
    match EnvironmentContext::load(env, root) {
        Ok(ctx) if env_file.exists() => checks.push(Check::pass(
            "env_file",
            &format!("{} (port {})", env.env_file_name(), ctx.unified_port),
        )),
        Ok(ctx) => checks.push(Check::warn(
            "env_file",
            &format!("{} not found, using port {}", env.env_file_name(), ctx.unified_port),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("env_file", &e.to_string()));
        }
    }

    match discover_services(&resolve(root, &config.paths.services_dir)) {
        Ok(report) if report.services.is_empty() => {
            checks.push(Check::warn("services", "No services discovered"));
        }
        Ok(report) => {
            checks.push(Check::pass(
                "services",
                &format!("{} service(s): {}", report.services.len(), report.names().join(", ")),
            ));
            for skipped in &report.skipped {
                checks.push(Check::warn(
                    "services",
                    &format!("Skipped {}: {}", skipped.dir.display(), skipped.reason),
                ));
            }
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("services", &e.to_string()));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks,
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("Portico Doctor\n");
        for check in checks {
            let icon = match check.status {
                CheckStatus::Pass => "✓",
                CheckStatus::Fail => "✗",
                CheckStatus::Warn => "⚠",
                CheckStatus::Info => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

#[derive(Debug, Serialize)]
struct Check {
    name: String,
    status: CheckStatus,
    message: String,
}

impl Check {
    fn new(name: &str, status: CheckStatus, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Pass, message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Warn, message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Info, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn statuses(checks: &[Check], name: &str) -> Vec<CheckStatus> {
        checks.iter().filter(|c| c.name == name).map(|c| c.status).collect()
    }

    #[test]
    fn empty_project_fails_file_checks() {
        let dir = tempfile::tempdir().unwrap();
        let mut checks = Vec::new();
        let mut all_pass = true;
        check_project(dir.path(), Environment::Local, &mut checks, &mut all_pass);
        assert!(!all_pass);
        assert_eq!(statuses(&checks, "project_config"), [CheckStatus::Info]);
        assert_eq!(statuses(&checks, "compose_file"), [CheckStatus::Fail]);
        assert_eq!(statuses(&checks, "template"), [CheckStatus::Fail]);
        assert_eq!(statuses(&checks, "env_file"), [CheckStatus::Warn]);
        assert_eq!(statuses(&checks, "services"), [CheckStatus::Warn]);
    }

    #[test]
    fn complete_project_passes_and_reports_skips() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("docker-compose.yml"), "services: {}\n").unwrap();
        fs::create_dir_all(root.join("templates")).unwrap();
        fs::write(root.join("templates/Dockerfile.compose.template"), "FROM scratch\n").unwrap();
        fs::write(root.join(".env.test"), "UNIFIED_PORT=8088\n").unwrap();
        fs::create_dir_all(root.join("services/skills")).unwrap();
        fs::write(
            root.join("services/skills/service.toml"),
            "[lambda_function]\nname = \"skills\"\n[api_gateway]\npath = \"/skills\"\n",
        )
        .unwrap();
        fs::create_dir_all(root.join("services/empty")).unwrap();

        let mut checks = Vec::new();
        let mut all_pass = true;
        check_project(root, Environment::Test, &mut checks, &mut all_pass);
        assert!(all_pass);
        assert_eq!(
            statuses(&checks, "services"),
            [CheckStatus::Pass, CheckStatus::Warn]
        );
        assert!(checks.iter().any(|c| c.message.contains("port 8088")));
    }

    #[test]
    fn invalid_config_stops_project_checks() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PROJECT_CONFIG_FILE), "[paths]\nbogus = 1\n").unwrap();
        let mut checks = Vec::new();
        let mut all_pass = true;
        check_project(dir.path(), Environment::Local, &mut checks, &mut all_pass);
        assert!(!all_pass);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, CheckStatus::Fail);
    }
}
