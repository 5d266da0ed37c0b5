//! CLI subprocess integration tests.
//!
//! These run the `portico` binary against a temporary project with the mock
//! compose backend and check exit codes, stdout, and generated files.

use std::fs;
use std::path::Path;
use std::process::Command;

fn portico_bin(project: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_portico"));
    cmd.env("PORTICO_COMPOSE_BACKEND", "mock")
        .env("PORTICO_SKIP_PREREQS", "1")
        .env_remove("PORTICO_LOG")
        .arg("--project-root")
        .arg(project);
    cmd
}

fn write_project(root: &Path) {
    for (name, methods) in [("skills", r#"["GET", "POST"]"#), ("notes", r#"["GET"]"#)] {
        let dir = root.join("services").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("service.toml"),
            format!(
                "[lambda_function]\nname = \"{name}\"\n\n[api_gateway]\npath = \"/{name}\"\nmethods = {methods}\n"
            ),
        )
        .unwrap();
    }
    fs::create_dir_all(root.join("templates")).unwrap();
    fs::write(
        root.join("templates/Dockerfile.compose.template"),
        "FROM scratch\nENV SERVICE_NAME={{SERVICE_NAME}}\n",
    )
    .unwrap();
    fs::write(root.join("docker-compose.yml"), "services: {}\n").unwrap();
    fs::write(root.join(".env.local"), "UNIFIED_PORT=4321\n").unwrap();
    fs::write(root.join("portico.toml"), "[health]\ntimeout_secs = 2\ninterval_secs = 1\n").unwrap();
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path());
    dir
}

fn no_dockerfiles_left(root: &Path) -> bool {
    ["skills", "notes"].iter().all(|name| {
        fs::read_dir(root.join("services").join(name))
            .unwrap()
            .all(|e| !e.unwrap().file_name().to_string_lossy().starts_with("Dockerfile."))
    })
}

#[test]
fn cli_version_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let output = portico_bin(dir.path()).arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("portico"));
}

#[test]
fn cli_help_lists_actions() {
    let dir = tempfile::tempdir().unwrap();
    let output = portico_bin(dir.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for action in ["up", "down", "restart", "status", "logs", "clean", "generate", "doctor"] {
        assert!(stdout.contains(action), "help must list '{action}'");
    }
}

#[test]
fn cli_unknown_env_is_rejected() {
    let dir = project();
    let output = portico_bin(dir.path())
        .args(["--env", "staging", "status"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("staging"));
}

#[test]
fn cli_unknown_service_group_exits_one() {
    let dir = project();
    let output = portico_bin(dir.path())
        .args(["--services", "cache", "up"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cache"));
}

#[test]
fn cli_generate_writes_files_only() {
    let dir = project();
    let output = portico_bin(dir.path()).arg("generate").output().unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 service(s): notes, skills"));

    let out = dir.path().join(".portico/generated");
    assert!(out.join("nginx.conf").is_file());
    assert!(out.join("docker-compose.override.yml").is_file());
    let urls: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("service-urls.json")).unwrap()).unwrap();
    assert_eq!(
        urls["api_gateway"]["services"]["skills"]["base"],
        "http://localhost:4321/api/skills"
    );
    assert!(no_dockerfiles_left(dir.path()));
}

#[test]
fn cli_up_json_reports_ready_services() {
    let dir = project();
    let output = portico_bin(dir.path())
        .args(["--services", "server,db", "--json", "up"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["health"]["outcome"], "ready");
    assert_eq!(report["gateway"]["status"], "not_requested");
    assert_eq!(report["statuses"].as_array().unwrap().len(), 3);
    assert_eq!(report["prepare"]["artifacts"].as_array().unwrap().len(), 2);
    assert!(no_dockerfiles_left(dir.path()));
}

#[test]
fn cli_up_is_the_default_action() {
    let dir = project();
    let output = portico_bin(dir.path())
        .args(["--services", "db", "--server-services", "skills"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("db"));
    assert!(stdout.contains("http://localhost:4321/api/skills"));
}

#[test]
fn cli_status_json_is_an_array() {
    let dir = project();
    let output = portico_bin(dir.path())
        .args(["--json", "status"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let statuses: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(statuses.is_array());
}

#[test]
fn cli_status_propagates_tool_exit_code() {
    let dir = project();
    let output = portico_bin(dir.path())
        .env("PORTICO_MOCK_FAIL", "ps=3")
        .args(["-v", "status"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("mock: ps failed"));
    assert!(output.stdout.is_empty());
}

#[test]
fn cli_down_and_clean_exit_zero() {
    let dir = project();
    for action in ["down", "clean"] {
        let output = portico_bin(dir.path()).arg(action).output().unwrap();
        assert!(
            output.status.success(),
            "{action}: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

#[test]
fn cli_restart_leaves_no_build_files() {
    let dir = project();
    let output = portico_bin(dir.path())
        .args(["--services", "server", "restart"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(no_dockerfiles_left(dir.path()));
}

#[test]
fn cli_missing_prerequisites_exit_two() {
    let dir = project();
    let output = Command::new(env!("CARGO_BIN_EXE_portico"))
        .env("PORTICO_COMPOSE_BACKEND", "docker")
        .env_remove("PORTICO_SKIP_PREREQS")
        .env("PATH", "")
        .arg("--project-root")
        .arg(dir.path())
        .arg("down")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("prerequisite error"));
    assert!(stderr.contains("docker"));
}

#[test]
fn cli_doctor_json_lists_checks() {
    let dir = project();
    let output = portico_bin(dir.path())
        .args(["--json", "doctor"])
        .output()
        .unwrap();
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let checks = report["checks"].as_array().unwrap();
    let passed = |name: &str| {
        checks
            .iter()
            .any(|c| c["name"] == name && c["status"] == "pass")
    };
    assert!(passed("compose_file"));
    assert!(passed("template"));
    assert!(passed("env_file"));
    assert!(passed("services"));
}

#[test]
fn cli_completions_for_bash() {
    let dir = tempfile::tempdir().unwrap();
    let output = portico_bin(dir.path())
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("portico"));
}
