use crate::cleanup::{CleanupManager, TeardownPlan};
use crate::discovery::{discover_services, DiscoveryReport};
use crate::gateway_sync::{GatewayStep, GatewaySync};
use crate::health::{HealthGate, HealthGateConfig, HealthOutcome};
use crate::selection::ServiceSelection;
use crate::synth::{synthesize, GeneratedPaths, ServiceUrlMap, OVERRIDE_FILE};
use crate::template::{render_dockerfile, TempArtifact, TemplateVariant};
use crate::CoreError;
use portico_gateway::{EmulatorConfig, GatewayApi, HttpGateway};
use portico_runtime::{
    CommandBackend, CommandOutcome, ComposeClient, ComposeExecutable, ComposeFileSet, OutputMode,
    PruneTarget, ServiceRuntimeStatus, UpOptions,
};
use portico_schema::{Environment, EnvironmentContext, ProjectConfig, ServiceDescriptor};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound for compose verbs that should finish on their own.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const GATEWAY_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpRequest {
    pub selection: ServiceSelection,
    pub build: bool,
    pub detach: bool,
    pub follow_logs: bool,
}

impl Default for UpRequest {
    fn default() -> Self {
        Self {
            selection: ServiceSelection::all(),
            build: false,
            detach: true,
            follow_logs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateReport {
    pub discovery: DiscoveryReport,
    pub paths: GeneratedPaths,
    pub url_map: ServiceUrlMap,
}

/// Generated config plus the build files rendered for this run.
#[derive(Debug, Clone, Serialize)]
pub struct PrepareReport {
    pub generate: GenerateReport,
    pub artifacts: Vec<TempArtifact>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpReport {
    pub prepare: PrepareReport,
    #[serde(skip)]
    pub outcome: CommandOutcome,
    pub health: Option<HealthOutcome>,
    pub statuses: Vec<ServiceRuntimeStatus>,
    pub gateway: GatewayStep,
    #[serde(skip)]
    pub follow: Option<CommandOutcome>,
}

impl UpReport {
    pub fn exit_code(&self) -> u8 {
        self.outcome.exit_code()
    }
}

#[derive(Debug, Clone)]
pub struct RestartReport {
    pub prepare: PrepareReport,
    pub outcome: CommandOutcome,
    pub statuses: Vec<ServiceRuntimeStatus>,
}

/// One `ps` run: the tool's outcome and, when it succeeded, the statuses.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub outcome: CommandOutcome,
    pub statuses: Vec<ServiceRuntimeStatus>,
}

/// `down --volumes` followed by host-level prunes, in execution order.
#[derive(Debug, Clone)]
pub struct CleanReport {
    pub down: CommandOutcome,
    pub prunes: Vec<(PruneTarget, CommandOutcome)>,
}

impl CleanReport {
    /// First failing step's exit code, or 0.
    pub fn exit_code(&self) -> u8 {
        std::iter::once(&self.down)
            .chain(self.prunes.iter().map(|(_, o)| o))
            .map(CommandOutcome::exit_code)
            .find(|code| *code != 0)
            .unwrap_or(0)
    }
}

/// Per-invocation handle over one project in one environment.
///
/// Holds every collaborator explicitly: the command backend, the gateway
/// client, and the cleanup manager shared with the signal handler.
pub struct Orchestrator {
    project: ProjectConfig,
    ctx: EnvironmentContext,
    backend: Arc<dyn CommandBackend>,
    executable: ComposeExecutable,
    emulator: EmulatorConfig,
    gateway: Arc<dyn GatewayApi>,
    cleanup: CleanupManager,
    variant: TemplateVariant,
}

impl Orchestrator {
    /// Load `portico.toml` and `.env.<env>` from `project_root`.
    pub fn open(
        project_root: &Path,
        env: Environment,
        backend: Arc<dyn CommandBackend>,
        executable: ComposeExecutable,
    ) -> Result<Self, CoreError> {
        let project = ProjectConfig::load(project_root)?;
        let ctx = EnvironmentContext::load(env, project_root)?;
        let endpoint = ctx
            .gateway_endpoint
            .clone()
            .unwrap_or_else(|| project.gateway.endpoint.clone());
        let emulator = EmulatorConfig::new(&endpoint)
            .with_region(&project.gateway.region)
            .with_account_id(&project.gateway.account_id);
        let gateway: Arc<dyn GatewayApi> = Arc::new(HttpGateway::new(emulator.clone()));
        debug!(
            "opened {} for {env} (port {}, emulator {})",
            project_root.display(),
            ctx.unified_port,
            emulator.endpoint
        );
        Ok(Self {
            ctx,
            backend,
            executable,
            emulator,
            gateway,
            cleanup: CleanupManager::new(),
            variant: project.paths.template_variant,
            project,
        })
    }

    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn GatewayApi>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    pub fn context(&self) -> &EnvironmentContext {
        &self.ctx
    }

    pub fn emulator(&self) -> &EmulatorConfig {
        &self.emulator
    }

    pub fn cleanup(&self) -> &CleanupManager {
        &self.cleanup
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.ctx.project_root.join(path)
        }
    }

    pub fn services_dir(&self) -> PathBuf {
        self.resolve(&self.project.paths.services_dir)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.resolve(&self.project.paths.templates_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.project.paths.output_dir)
    }

    pub fn compose_file(&self) -> PathBuf {
        self.resolve(&self.project.paths.compose_file)
    }

    /// REST API the routes are mirrored into, e.g. `portico-dev`.
    pub fn gateway_api_name(&self) -> String {
        format!("{}-{}", self.project.project.name, self.ctx.env)
    }

    pub fn gateway_stage(&self) -> String {
        self.project
            .gateway
            .stage
            .clone()
            .unwrap_or_else(|| self.ctx.env.to_string())
    }

    /// Compose client over the file set as it exists right now.
    pub fn compose(&self) -> ComposeClient {
        let files = ComposeFileSet::discover(
            &self.compose_file(),
            &self.output_dir().join(OVERRIDE_FILE),
            self.ctx.env.as_str(),
        );
        ComposeClient::new(Arc::clone(&self.backend), &files, &self.executable)
            .with_probe_timeout(Duration::from_secs(self.project.health.probe_timeout_secs))
    }

    pub fn teardown_plan(&self) -> TeardownPlan {
        TeardownPlan {
            compose: self.compose(),
            stop_timeout: Duration::from_secs(self.project.cleanup.stop_timeout_secs),
            prune_volumes: self.project.cleanup.prune_volumes,
            prune_images: self.project.cleanup.prune_images,
        }
    }

    pub fn discover(&self) -> Result<DiscoveryReport, CoreError> {
        discover_services(&self.services_dir())
    }

    /// Discovery and config synthesis, written to the output directory.
    pub fn generate(&self) -> Result<GenerateReport, CoreError> {
        let discovery = self.discover()?;
        let output_dir = self.output_dir();
        let generated = synthesize(&discovery.services, &self.ctx, &output_dir)?;
        let paths = generated.write_to(&output_dir)?;
        Ok(GenerateReport {
            discovery,
            paths,
            url_map: generated.url_map,
        })
    }

    /// `generate` plus one rendered build file per function service compose
    /// will build for `selection`. Rendering failures become warnings; the
    /// other services go ahead.
    pub fn prepare(&self, selection: &ServiceSelection) -> Result<PrepareReport, CoreError> {
        self.cleanup.ensure_running()?;
        let generate = self.generate()?;
        let templates_dir = self.templates_dir();
        let mut artifacts = Vec::new();
        let mut warnings: Vec<String> = generate
            .discovery
            .skipped
            .iter()
            .map(|s| format!("skipped {}: {}", s.dir.display(), s.reason))
            .collect();

        for descriptor in selection.build_targets(&generate.discovery.services) {
            let rendered = self.cleanup.track(|| {
                render_dockerfile(&templates_dir, descriptor, self.ctx.env, self.variant)
            });
            match rendered {
                Ok(Some(artifact)) => artifacts.push(artifact),
                Ok(None) => return Err(CoreError::Cancelled),
                Err(e) => {
                    warn!("{}: {e}", descriptor.name);
                    warnings.push(format!("{}: {e}", descriptor.name));
                }
            }
        }
        Ok(PrepareReport {
            generate,
            artifacts,
            warnings,
        })
    }

    fn selected_services(&self, selection: &ServiceSelection) -> Result<Vec<String>, CoreError> {
        Ok(selection.compose_services(&self.discover()?.services))
    }

    fn gateway_step(
        &self,
        selection: &ServiceSelection,
        descriptors: &[ServiceDescriptor],
    ) -> GatewayStep {
        if !selection.gateway_requested() {
            return GatewayStep::NotRequested;
        }
        let sync = GatewaySync::new(self.gateway.as_ref(), &self.emulator, self.cleanup.token())
            .with_readiness(
                Duration::from_secs(self.project.gateway.readiness_timeout_secs),
                GATEWAY_POLL_INTERVAL,
            );
        if !sync.wait_ready() {
            warn!(
                "API emulator at {} is not reachable, skipping route sync",
                self.emulator.endpoint
            );
            return GatewayStep::Unreachable;
        }
        match sync.sync(&self.gateway_api_name(), &self.gateway_stage(), descriptors) {
            Ok(report) => GatewayStep::Synced { report },
            Err(e) => {
                warn!("gateway sync failed: {e}");
                GatewayStep::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    pub fn up(&self, request: &UpRequest) -> Result<UpReport, CoreError> {
        let _guard = self.cleanup.guard();
        let prepare = self.prepare(&request.selection)?;
        let compose = self.compose();
        self.cleanup.arm(self.teardown_plan());

        let services = request
            .selection
            .compose_services(&prepare.generate.discovery.services);
        let mode = if request.detach {
            OutputMode::Capture
        } else {
            OutputMode::Stream
        };
        if services.is_empty() {
            info!("starting all services");
        } else {
            info!("starting {}", services.join(", "));
        }
        self.cleanup.ensure_running()?;
        let outcome = compose.up(
            UpOptions {
                build: request.build,
                detach: request.detach,
            },
            &services,
            mode,
        )?;

        let mut report = UpReport {
            prepare,
            outcome,
            health: None,
            statuses: Vec::new(),
            gateway: GatewayStep::NotRequested,
            follow: None,
        };
        if !report.outcome.success() || !request.detach {
            return Ok(report);
        }

        let gate_config = HealthGateConfig::from(&self.project.health);
        let health = HealthGate::new(&compose, gate_config, self.cleanup.token()).wait(&services);
        let cancelled = matches!(health, HealthOutcome::Cancelled { .. });
        report.health = Some(health);
        if cancelled {
            return Ok(report);
        }

        self.cleanup.ensure_running()?;
        report.statuses = compose.ps(&services).unwrap_or_else(|e| {
            warn!("status unavailable: {e}");
            Vec::new()
        });
        self.cleanup.ensure_running()?;
        report.gateway =
            self.gateway_step(&request.selection, &report.prepare.generate.discovery.services);

        // the stack is up; interrupting the log stream must not tear it down
        self.cleanup.disarm();
        if request.follow_logs && !self.cleanup.token().is_cancelled() {
            report.follow = Some(compose.logs(&services)?);
        }
        Ok(report)
    }

    pub fn down(&self) -> Result<CommandOutcome, CoreError> {
        let compose = self.compose();
        self.cleanup.ensure_running()?;
        self.cleanup.arm(self.teardown_plan());
        let outcome = compose.down(false, Some(COMMAND_TIMEOUT))?;
        self.cleanup.disarm();
        Ok(outcome)
    }

    pub fn restart(&self, selection: &ServiceSelection) -> Result<RestartReport, CoreError> {
        let _guard = self.cleanup.guard();
        let prepare = self.prepare(selection)?;
        let compose = self.compose();
        self.cleanup.arm(self.teardown_plan());
        let services = selection.compose_services(&prepare.generate.discovery.services);
        self.cleanup.ensure_running()?;
        let outcome = compose.restart(&services)?;
        self.cleanup.disarm();
        let statuses = if outcome.success() && self.cleanup.ensure_running().is_ok() {
            compose.ps(&services).unwrap_or_else(|e| {
                warn!("status unavailable: {e}");
                Vec::new()
            })
        } else {
            Vec::new()
        };
        Ok(RestartReport {
            prepare,
            outcome,
            statuses,
        })
    }

    /// Non-zero `ps` exits come back in the report, not as errors.
    pub fn status(&self, selection: &ServiceSelection) -> Result<StatusReport, CoreError> {
        let services = self.selected_services(selection)?;
        let (outcome, statuses) = self.compose().ps_outcome(&services)?;
        Ok(StatusReport { outcome, statuses })
    }

    /// Stream logs until the tool exits or the user interrupts.
    pub fn logs(&self, selection: &ServiceSelection) -> Result<CommandOutcome, CoreError> {
        let services = self.selected_services(selection)?;
        Ok(self.compose().logs(&services)?)
    }

    /// `down --remove-orphans --volumes`, then container, volume and network
    /// prunes. Prunes only run after a successful `down`.
    pub fn clean(&self) -> Result<CleanReport, CoreError> {
        let compose = self.compose();
        self.cleanup.ensure_running()?;
        self.cleanup.arm(self.teardown_plan());
        let down = compose.down(true, Some(COMMAND_TIMEOUT))?;
        let mut prunes = Vec::new();
        if down.success() {
            for target in [PruneTarget::Containers, PruneTarget::Volumes, PruneTarget::Networks] {
                self.cleanup.ensure_running()?;
                prunes.push((target, compose.prune(target, Some(COMMAND_TIMEOUT))?));
            }
        } else {
            warn!("down failed with exit {}, skipping prune", down.code);
        }
        self.cleanup.disarm();
        Ok(CleanReport { down, prunes })
    }
}
