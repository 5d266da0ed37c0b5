use portico_core::{
    GatewayStep, HealthOutcome, Orchestrator, ServiceSelection, ServiceUrlMap, UpRequest,
};
use portico_emulator::TestServer;
use portico_gateway::MockGateway;
use portico_runtime::{ComposeExecutable, MockBackend};
use portico_schema::Environment;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TEMPLATE: &str = "FROM public.ecr.aws/lambda/python:3.12\n\
ENV SERVICE_NAME={{SERVICE_NAME}} LOG_LEVEL={{LOG_LEVEL}}\n";

fn write_service(root: &Path, name: &str, path: &str, methods: &str) {
    let dir = root.join("services").join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("service.toml"),
        format!(
            "[lambda_function]\nname = \"{name}\"\n\n[api_gateway]\npath = \"{path}\"\nmethods = {methods}\ncors_enabled = true\n"
        ),
    )
    .unwrap();
}

/// Project with one `skills` service on port 4321 and fast health settings.
fn skills_project(extra_config: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_service(root, "skills", "/skills", r#"["GET", "POST"]"#);
    fs::create_dir_all(root.join("templates")).unwrap();
    fs::write(root.join("templates/Dockerfile.compose.template"), TEMPLATE).unwrap();
    fs::write(root.join("docker-compose.yml"), "services: {}\n").unwrap();
    fs::write(root.join(".env.dev"), "UNIFIED_PORT=4321\n").unwrap();
    fs::write(
        root.join("portico.toml"),
        format!("[health]\ntimeout_secs = 1\ninterval_secs = 1\n{extra_config}"),
    )
    .unwrap();
    dir
}

fn open(root: &Path, mock: &Arc<MockBackend>) -> Orchestrator {
    Orchestrator::open(root, Environment::Dev, mock.clone(), ComposeExecutable::plugin())
        .unwrap()
        .with_gateway(Arc::new(MockGateway::new()))
}

fn rendered_dockerfiles(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for entry in fs::read_dir(root.join("services")).unwrap() {
        let dir = entry.unwrap().path();
        if !dir.is_dir() {
            continue;
        }
        for file in fs::read_dir(&dir).unwrap() {
            let path = file.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            if name.starts_with("Dockerfile.") {
                found.push(path);
            }
        }
    }
    found
}

#[test]
fn single_public_port_and_service_url_map() {
    let project = skills_project("");
    let mock = Arc::new(MockBackend::new());
    let orch = open(project.path(), &mock);

    let report = orch.generate().unwrap();
    assert_eq!(report.discovery.names(), vec!["skills"]);

    let compose: serde_yaml::Value =
        serde_yaml::from_str(&fs::read_to_string(&report.paths.compose_override).unwrap()).unwrap();
    assert_eq!(compose["services"]["gateway"]["ports"][0].as_str(), Some("4321:80"));
    assert!(compose["services"]["skills-lambda"].get("ports").is_none());

    let proxy = fs::read_to_string(&report.paths.proxy_config).unwrap();
    assert!(proxy.contains("location /api/skills"));
    assert!(proxy.contains("server skills-service:8080;"));

    let urls: ServiceUrlMap =
        serde_json::from_str(&fs::read_to_string(&report.paths.url_map).unwrap()).unwrap();
    assert_eq!(urls.unified_port, 4321);
    assert_eq!(
        urls.api_gateway.services["skills"].base,
        "http://localhost:4321/api/skills"
    );
    assert_eq!(urls.api_gateway.services["skills"].methods, vec!["GET", "POST"]);
}

#[test]
fn local_env_without_env_file_uses_default_port() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_service(root, "skills", "/skills", r#"["GET"]"#);
    fs::write(root.join("docker-compose.yml"), "services: {}\n").unwrap();

    let mock = Arc::new(MockBackend::new());
    let orch = Orchestrator::open(root, Environment::Local, mock, ComposeExecutable::plugin())
        .unwrap()
        .with_gateway(Arc::new(MockGateway::new()));
    assert_eq!(orch.context().unified_port, 4321);
    let report = orch.generate().unwrap();

    let compose: serde_yaml::Value =
        serde_yaml::from_str(&fs::read_to_string(&report.paths.compose_override).unwrap()).unwrap();
    let services = compose["services"].as_mapping().unwrap();
    let published: Vec<&str> = services
        .iter()
        .filter(|(_, svc)| svc.get("ports").is_some())
        .filter_map(|(name, _)| name.as_str())
        .collect();
    assert_eq!(published, ["gateway"]);
    assert_eq!(compose["services"]["gateway"]["ports"][0].as_str(), Some("4321:80"));
    assert!(compose["services"]["skills-lambda"].get("ports").is_none());
    assert_eq!(
        report.url_map.api_gateway.services["skills"].base,
        "http://localhost:4321/api/skills"
    );
}

#[test]
fn gateway_only_up_renders_every_build_file_and_removes_them() {
    let project = skills_project("");
    let root = project.path();
    write_service(root, "notes", "/notes", r#"["GET"]"#);
    let mock = Arc::new(MockBackend::new());
    let orch = open(root, &mock);

    let request = UpRequest {
        selection: ServiceSelection::parse("gateway", "all").unwrap(),
        ..UpRequest::default()
    };
    let report = orch.up(&request).unwrap();
    let mut owners: Vec<String> = report
        .prepare
        .artifacts
        .iter()
        .map(|a| a.owning_service.to_string())
        .collect();
    owners.sort();
    assert_eq!(owners, ["notes", "skills"]);
    assert!(rendered_dockerfiles(root).is_empty());
    let calls = mock.invocations();
    assert_eq!(calls[0][calls[0].len() - 2..], ["-d", "gateway"]);
}

#[test]
fn broken_manifest_is_skipped_and_run_proceeds() {
    let project = skills_project("");
    let root = project.path();
    write_service(root, "notes", "/notes", r#"["GET"]"#);
    let broken = root.join("services/admin");
    fs::create_dir_all(&broken).unwrap();
    fs::write(broken.join("service.toml"), "[lambda_function\nname = ").unwrap();

    let mock = Arc::new(MockBackend::new());
    let orch = open(root, &mock);
    let request = UpRequest {
        selection: ServiceSelection::parse("server,db", "all").unwrap(),
        ..UpRequest::default()
    };
    let report = orch.up(&request).unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.prepare.generate.discovery.names(), vec!["notes", "skills"]);
    assert_eq!(report.prepare.generate.discovery.skipped.len(), 1);
    assert!(report.prepare.warnings.iter().any(|w| w.contains("admin")));
    assert_eq!(report.prepare.artifacts.len(), 2);
    assert_eq!(
        mock.running_services(),
        vec!["db", "notes-lambda", "skills-lambda"]
    );
    assert!(report.health.as_ref().is_some_and(HealthOutcome::is_ready));
    assert_eq!(report.gateway, GatewayStep::NotRequested);
}

#[test]
fn rendered_build_files_never_outlive_an_action() {
    let project = skills_project("");
    let mock = Arc::new(MockBackend::new());
    let orch = open(project.path(), &mock);
    let selection = ServiceSelection::parse("server", "skills").unwrap();

    let report = orch
        .up(&UpRequest {
            selection: selection.clone(),
            ..UpRequest::default()
        })
        .unwrap();
    assert_eq!(report.prepare.artifacts.len(), 1);
    assert!(rendered_dockerfiles(project.path()).is_empty());
    assert!(orch.cleanup().registered().is_empty());

    orch.restart(&selection).unwrap();
    assert!(rendered_dockerfiles(project.path()).is_empty());

    orch.down().unwrap();
    orch.clean().unwrap();
    assert!(rendered_dockerfiles(project.path()).is_empty());
}

#[test]
fn failed_up_still_removes_build_files() {
    let project = skills_project("");
    let mock = Arc::new(MockBackend::new());
    mock.fail_on("up", 1);
    let orch = open(project.path(), &mock);

    let report = orch
        .up(&UpRequest {
            selection: ServiceSelection::parse("server", "all").unwrap(),
            ..UpRequest::default()
        })
        .unwrap();
    assert_eq!(report.exit_code(), 1);
    assert!(report.health.is_none());
    assert!(rendered_dockerfiles(project.path()).is_empty());
}

#[test]
fn interrupt_tears_down_and_removes_build_files() {
    let project = skills_project("[cleanup]\nprune_volumes = true\n");
    let mock = Arc::new(MockBackend::new());
    let orch = open(project.path(), &mock);

    let prepared = orch.prepare(&ServiceSelection::all()).unwrap();
    assert_eq!(rendered_dockerfiles(project.path()).len(), 1);
    assert_eq!(prepared.artifacts.len(), 1);
    orch.cleanup().arm(orch.teardown_plan());

    let report = orch.cleanup().handle_signal().unwrap();
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.artifacts_removed, 1);
    assert!(rendered_dockerfiles(project.path()).is_empty());
    assert!(orch.cleanup().token().is_cancelled());

    let calls = mock.invocations();
    let stop = calls.iter().position(|c| c.contains(&"stop".to_owned())).unwrap();
    let rm = calls.iter().position(|c| c.contains(&"rm".to_owned())).unwrap();
    let down = calls.iter().position(|c| c.contains(&"down".to_owned())).unwrap();
    let prune = calls
        .iter()
        .position(|c| c == &["docker", "volume", "prune", "-f"])
        .unwrap();
    assert!(stop < rm && rm < down && down < prune);

    // a second signal is a no-op
    assert!(orch.cleanup().handle_signal().is_none());
}

#[test]
fn clean_runs_down_with_volumes_before_prunes() {
    let project = skills_project("");
    let mock = Arc::new(MockBackend::new());
    let orch = open(project.path(), &mock);

    let report = orch.clean().unwrap();
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.prunes.len(), 3);

    let calls = mock.invocations();
    assert_eq!(calls.len(), 4);
    assert_eq!(
        calls[0][calls[0].len() - 3..],
        ["down", "--remove-orphans", "--volumes"]
    );
    assert_eq!(calls[1], ["docker", "container", "prune", "-f"]);
    assert_eq!(calls[2], ["docker", "volume", "prune", "-f"]);
    assert_eq!(calls[3], ["docker", "network", "prune", "-f"]);
    assert!(!orch.cleanup().is_armed());
}

#[test]
fn health_timeout_is_reported_not_raised() {
    let project = skills_project("");
    let mock = Arc::new(MockBackend::new());
    mock.push_ps_output(
        "{\"Service\":\"db\",\"State\":\"running\",\"Health\":\"starting\"}",
    );
    let orch = open(project.path(), &mock);

    let report = orch
        .up(&UpRequest {
            selection: ServiceSelection::parse("db", "all").unwrap(),
            ..UpRequest::default()
        })
        .unwrap();
    assert_eq!(report.exit_code(), 0);
    match report.health {
        Some(HealthOutcome::TimedOut { ref pending, .. }) => assert_eq!(pending, &["db"]),
        ref other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(report.statuses.len(), 1);
}

#[test]
fn up_with_gateway_syncs_routes_into_emulator_once() {
    let server = TestServer::start().unwrap();
    let project = skills_project(&format!(
        "[gateway]\nendpoint = \"{}\"\nreadiness_timeout_secs = 5\n",
        server.url
    ));
    let mock = Arc::new(MockBackend::new());
    let orch = Orchestrator::open(
        project.path(),
        Environment::Dev,
        mock.clone(),
        ComposeExecutable::plugin(),
    )
    .unwrap();
    assert_eq!(orch.emulator().endpoint, server.url);

    let request = UpRequest {
        selection: ServiceSelection::parse("server,gateway", "all").unwrap(),
        ..UpRequest::default()
    };
    for _ in 0..2 {
        let report = orch.up(&request).unwrap();
        match report.gateway {
            GatewayStep::Synced { ref report } => {
                assert_eq!(report.services_wired, 1);
                assert_eq!(report.wired, vec!["GET /skills", "POST /skills", "OPTIONS /skills"]);
                assert!(report.errors.is_empty(), "{:?}", report.errors);
                assert!(report.deployment_id.is_some());
            }
            ref other => panic!("expected sync, got {other:?}"),
        }
    }

    let apis = server.store().list_apis();
    let items = apis["item"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], "portico-dev");
}

#[test]
fn unreachable_emulator_does_not_fail_up() {
    let project = skills_project(
        "[gateway]\nendpoint = \"http://127.0.0.1:9\"\nreadiness_timeout_secs = 1\n",
    );
    let mock = Arc::new(MockBackend::new());
    let orch = Orchestrator::open(
        project.path(),
        Environment::Dev,
        mock.clone(),
        ComposeExecutable::plugin(),
    )
    .unwrap();
    let report = orch
        .up(&UpRequest {
            selection: ServiceSelection::parse("server,gateway", "all").unwrap(),
            ..UpRequest::default()
        })
        .unwrap();
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.gateway, GatewayStep::Unreachable);
}

#[test]
fn status_and_logs_use_selected_services() {
    let project = skills_project("");
    let mock = Arc::new(MockBackend::new());
    let orch = open(project.path(), &mock);
    orch.up(&UpRequest {
        selection: ServiceSelection::parse("server,db", "all").unwrap(),
        ..UpRequest::default()
    })
    .unwrap();

    let report = orch
        .status(&ServiceSelection::parse("server", "all").unwrap())
        .unwrap();
    assert!(report.outcome.success());
    assert_eq!(report.statuses.len(), 1);
    assert_eq!(report.statuses[0].service_name, "skills-lambda");

    mock.fail_on("ps", 3);
    let failed = orch.status(&ServiceSelection::all()).unwrap();
    assert_eq!(failed.outcome.exit_code(), 3);
    assert!(failed.statuses.is_empty());

    let before = mock.invocations().len();
    let outcome = orch
        .logs(&ServiceSelection::parse("db", "all").unwrap())
        .unwrap();
    assert!(outcome.success());
    let calls = mock.invocations();
    assert_eq!(calls.len(), before + 1);
    assert_eq!(calls[before][calls[before].len() - 4..], ["logs", "-f", "--timestamps", "db"]);
}
