use crate::backend::{CommandBackend, CommandOutcome, Invocation, OutputMode};
use crate::status::{parse_ps_output, ServiceRuntimeStatus};
use crate::RuntimeError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Ordered compose configuration files; later files override earlier keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeFileSet {
    pub base: PathBuf,
    pub generated_override: Option<PathBuf>,
    pub env_override: Option<PathBuf>,
}

impl ComposeFileSet {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            generated_override: None,
            env_override: None,
        }
    }

    /// Resolve the file set for `env_name`, keeping only overrides that exist.
    ///
    /// The environment override is `<base stem>.<env>.yml` next to the base
    /// file, e.g. `docker-compose.dev.yml`.
    pub fn discover(base: &Path, generated_override: &Path, env_name: &str) -> Self {
        let env_override = base.parent().map(|dir| {
            let stem = base
                .file_stem()
                .map_or_else(|| "docker-compose".to_owned(), |s| s.to_string_lossy().into_owned());
            dir.join(format!("{stem}.{env_name}.yml"))
        });
        Self {
            base: base.to_path_buf(),
            generated_override: Some(generated_override.to_path_buf()).filter(|p| p.exists()),
            env_override: env_override.filter(|p| p.exists()),
        }
    }

    pub fn files(&self) -> Vec<&Path> {
        let mut files = vec![self.base.as_path()];
        if let Some(ref p) = self.generated_override {
            files.push(p);
        }
        if let Some(ref p) = self.env_override {
            files.push(p);
        }
        files
    }
}

/// How the compose tool is invoked on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeExecutable {
    tokens: Vec<String>,
}

impl ComposeExecutable {
    /// `docker compose` (v2 plugin).
    pub fn plugin() -> Self {
        Self {
            tokens: vec!["docker".to_owned(), "compose".to_owned()],
        }
    }

    /// `docker-compose` (v1 standalone).
    pub fn standalone() -> Self {
        Self {
            tokens: vec!["docker-compose".to_owned()],
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

impl Default for ComposeExecutable {
    fn default() -> Self {
        Self::plugin()
    }
}

/// Executable tokens followed by `-f <file>` for every file in set order.
pub fn build_compose_command(files: &ComposeFileSet, executable: &ComposeExecutable) -> Vec<String> {
    let mut argv: Vec<String> = executable.tokens().to_vec();
    for file in files.files() {
        argv.push("-f".to_owned());
        argv.push(file.to_string_lossy().into_owned());
    }
    argv
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpOptions {
    pub build: bool,
    pub detach: bool,
}

/// Host-level `docker <kind> prune -f` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneTarget {
    Containers,
    Volumes,
    Networks,
    Images,
}

impl PruneTarget {
    fn noun(self) -> &'static str {
        match self {
            PruneTarget::Containers => "container",
            PruneTarget::Volumes => "volume",
            PruneTarget::Networks => "network",
            PruneTarget::Images => "image",
        }
    }
}

/// Typed access to the compose verbs the orchestrator uses.
///
/// The client only builds argv vectors and hands them to its backend, so the
/// same code path runs against docker and against the recording mock.
#[derive(Clone)]
pub struct ComposeClient {
    backend: Arc<dyn CommandBackend>,
    base_argv: Vec<String>,
    probe_timeout: Duration,
}

impl ComposeClient {
    pub fn new(
        backend: Arc<dyn CommandBackend>,
        files: &ComposeFileSet,
        executable: &ComposeExecutable,
    ) -> Self {
        Self {
            backend,
            base_argv: build_compose_command(files, executable),
            probe_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn base_argv(&self) -> &[String] {
        &self.base_argv
    }

    pub fn backend(&self) -> &Arc<dyn CommandBackend> {
        &self.backend
    }

    fn argv(&self, args: &[&str], services: &[String]) -> Vec<String> {
        let mut argv = self.base_argv.clone();
        argv.extend(args.iter().map(|a| (*a).to_owned()));
        argv.extend(services.iter().cloned());
        argv
    }

    fn run(&self, invocation: &Invocation) -> Result<CommandOutcome, RuntimeError> {
        debug!("compose: {}", invocation.display());
        self.backend.execute(invocation)
    }

    pub fn up(
        &self,
        options: UpOptions,
        services: &[String],
        mode: OutputMode,
    ) -> Result<CommandOutcome, RuntimeError> {
        let mut args = vec!["up"];
        if options.build {
            args.push("--build");
        }
        if options.detach {
            args.push("-d");
        }
        let argv = self.argv(&args, services);
        let invocation = match mode {
            OutputMode::Stream => Invocation::streamed(argv),
            OutputMode::Capture => Invocation::captured(argv, None),
        };
        self.run(&invocation)
    }

    pub fn down(&self, volumes: bool, timeout: Option<Duration>) -> Result<CommandOutcome, RuntimeError> {
        let mut args = vec!["down", "--remove-orphans"];
        if volumes {
            args.push("--volumes");
        }
        self.run(&Invocation::captured(self.argv(&args, &[]), timeout))
    }

    pub fn restart(&self, services: &[String]) -> Result<CommandOutcome, RuntimeError> {
        self.run(&Invocation::captured(self.argv(&["restart"], services), None))
    }

    /// `stop -t <secs>`; the invocation itself gets a little headroom on top.
    pub fn stop(&self, grace: Duration) -> Result<CommandOutcome, RuntimeError> {
        let secs = grace.as_secs().to_string();
        self.run(&Invocation::captured(
            self.argv(&["stop", "-t", &secs], &[]),
            Some(grace + Duration::from_secs(30)),
        ))
    }

    pub fn remove(&self, timeout: Option<Duration>) -> Result<CommandOutcome, RuntimeError> {
        self.run(&Invocation::captured(self.argv(&["rm", "-f", "-s"], &[]), timeout))
    }

    /// Stream `logs -f --timestamps`. Blocks until the tool exits or is interrupted.
    pub fn logs(&self, services: &[String]) -> Result<CommandOutcome, RuntimeError> {
        self.run(&Invocation::streamed(
            self.argv(&["logs", "-f", "--timestamps"], services),
        ))
    }

    /// Run `ps` for `services` and hand back the raw outcome. Statuses are
    /// parsed only when the tool succeeded.
    pub fn ps_outcome(
        &self,
        services: &[String],
    ) -> Result<(CommandOutcome, Vec<ServiceRuntimeStatus>), RuntimeError> {
        let outcome = self.run(&Invocation::captured(
            self.argv(&["ps", "--all", "--format", "json"], services),
            Some(self.probe_timeout),
        ))?;
        let statuses = if outcome.success() {
            parse_ps_output(&outcome.stdout)?
        } else {
            Vec::new()
        };
        Ok((outcome, statuses))
    }

    /// Current state of `services` (all services when empty).
    pub fn ps(&self, services: &[String]) -> Result<Vec<ServiceRuntimeStatus>, RuntimeError> {
        let (outcome, statuses) = self.ps_outcome(services)?;
        if !outcome.success() {
            return Err(RuntimeError::StatusParse(format!(
                "ps exited with {}: {}",
                outcome.code,
                outcome.stderr.trim()
            )));
        }
        Ok(statuses)
    }

    /// `docker <target> prune -f`, outside of the compose project scope.
    pub fn prune(&self, target: PruneTarget, timeout: Option<Duration>) -> Result<CommandOutcome, RuntimeError> {
        let docker = self
            .base_argv
            .first()
            .map_or("docker", |program| {
                if program == "docker-compose" {
                    "docker"
                } else {
                    program.as_str()
                }
            })
            .to_owned();
        let argv = vec![docker, target.noun().to_owned(), "prune".to_owned(), "-f".to_owned()];
        self.run(&Invocation::captured(argv, timeout))
    }
}
