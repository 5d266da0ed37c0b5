use crate::template::TempArtifact;
use crate::CoreError;
use portico_runtime::{ComposeClient, PruneTarget};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exit status after a signal-driven teardown.
pub const SIGNAL_EXIT_CODE: i32 = 130;

/// Shared flag the signal handler sets and long-running loops watch.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a signal teardown does to the running stack.
#[derive(Clone)]
pub struct TeardownPlan {
    pub compose: ComposeClient,
    pub stop_timeout: Duration,
    pub prune_volumes: bool,
    pub prune_images: bool,
}

/// Outcome of one teardown, folded over every step.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub steps: Vec<String>,
    pub artifacts_removed: usize,
    pub errors: Vec<String>,
}

#[derive(Default)]
struct Shared {
    token: CancellationToken,
    started: AtomicBool,
    teardown: Mutex<()>,
    artifacts: Mutex<Vec<TempArtifact>>,
    plan: Mutex<Option<TeardownPlan>>,
}

/// Tracks transient artifacts and owns teardown for one invocation.
///
/// Clones share state, so the signal handler and the main flow see the same
/// token, artifact list, and "cleanup started" flag.
#[derive(Clone, Default)]
pub struct CleanupManager {
    shared: Arc<Shared>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl CleanupManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.shared.token
    }

    /// Track `artifact` for removal. Once a teardown has started the file is
    /// deleted right away instead.
    pub fn register(&self, artifact: TempArtifact) {
        let mut artifacts = lock(&self.shared.artifacts);
        if self.cleanup_started() {
            drop(artifacts);
            remove_artifact(&artifact);
            return;
        }
        debug!("registered transient artifact {}", artifact.path.display());
        artifacts.push(artifact);
    }

    /// Run `render` and register what it writes, holding the artifact list so
    /// a concurrent teardown waits for the file to be tracked. Returns
    /// `Ok(None)` without rendering once a teardown has started.
    pub fn track<F>(&self, render: F) -> Result<Option<TempArtifact>, CoreError>
    where
        F: FnOnce() -> Result<TempArtifact, CoreError>,
    {
        let mut artifacts = lock(&self.shared.artifacts);
        if self.cleanup_started() {
            return Ok(None);
        }
        let artifact = render()?;
        debug!("registered transient artifact {}", artifact.path.display());
        artifacts.push(artifact.clone());
        Ok(Some(artifact))
    }

    /// `Err(CoreError::Cancelled)` once a signal teardown has begun.
    pub fn ensure_running(&self) -> Result<(), CoreError> {
        if self.shared.token.is_cancelled() || self.cleanup_started() {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }

    pub fn registered(&self) -> Vec<TempArtifact> {
        lock(&self.shared.artifacts).clone()
    }

    /// Have a signal stop and remove the stack described by `plan`.
    pub fn arm(&self, plan: TeardownPlan) {
        *lock(&self.shared.plan) = Some(plan);
    }

    /// A signal from here on only removes artifacts.
    pub fn disarm(&self) {
        *lock(&self.shared.plan) = None;
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.shared.plan).is_some()
    }

    pub fn cleanup_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    /// Delete every registered artifact and forget it. Missing files count as removed.
    pub fn remove_artifacts(&self) -> (usize, Vec<String>) {
        let artifacts: Vec<TempArtifact> = std::mem::take(&mut *lock(&self.shared.artifacts));
        let mut removed = 0;
        let mut errors = Vec::new();
        for artifact in artifacts {
            match remove_artifact(&artifact) {
                Ok(()) => removed += 1,
                Err(e) => errors.push(e),
            }
        }
        (removed, errors)
    }

    /// Run the signal teardown. Returns `None` when a teardown already started.
    pub fn handle_signal(&self) -> Option<TeardownReport> {
        let _running = lock(&self.shared.teardown);
        if self
            .shared
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("cleanup already in progress, ignoring signal");
            return None;
        }
        self.shared.token.cancel();
        info!("interrupted, tearing down");

        let mut report = TeardownReport::default();
        let plan = lock(&self.shared.plan).clone();
        if let Some(plan) = plan {
            run_teardown(&plan, &mut report);
        }
        let (removed, errors) = self.remove_artifacts();
        report.artifacts_removed = removed;
        report.errors.extend(errors);
        Some(report)
    }

    /// Block until a signal teardown in progress has finished. Returns
    /// whether one ran, in which case the caller should exit with
    /// [`SIGNAL_EXIT_CODE`].
    pub fn wait_for_teardown(&self) -> bool {
        if !self.cleanup_started() {
            return false;
        }
        drop(lock(&self.shared.teardown));
        true
    }

    /// Route SIGINT/SIGTERM into `handle_signal`, then exit with 130.
    ///
    /// A second registration in the same process is reported, not fatal.
    pub fn install_signal_handler(&self) -> Result<(), CoreError> {
        let manager = self.clone();
        match ctrlc::set_handler(move || {
            if let Some(report) = manager.handle_signal() {
                for err in &report.errors {
                    eprintln!("cleanup: {err}");
                }
                std::process::exit(SIGNAL_EXIT_CODE);
            }
        }) {
            Ok(()) => Ok(()),
            Err(ctrlc::Error::MultipleHandlers) => {
                debug!("signal handler already installed");
                Ok(())
            }
            Err(e) => Err(CoreError::Signal(e.to_string())),
        }
    }

    /// Guard that removes registered artifacts when dropped. A signal teardown
    /// that already ran has removed them.
    pub fn guard(&self) -> ArtifactGuard {
        ArtifactGuard {
            manager: self.clone(),
        }
    }
}

/// Missing files count as removed.
fn remove_artifact(artifact: &TempArtifact) -> Result<(), String> {
    match std::fs::remove_file(&artifact.path) {
        Ok(()) => {
            debug!("removed {}", artifact.path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!("failed to remove {}: {e}", artifact.path.display());
            Err(format!("{}: {e}", artifact.path.display()))
        }
    }
}

fn run_teardown(plan: &TeardownPlan, report: &mut TeardownReport) {
    let timeout = Some(plan.stop_timeout + Duration::from_secs(30));
    let mut step = |name: &str, result: Result<portico_runtime::CommandOutcome, portico_runtime::RuntimeError>| {
        report.steps.push(name.to_owned());
        match result {
            Ok(outcome) if outcome.success() => {}
            Ok(outcome) => report
                .errors
                .push(format!("{name}: exit {} {}", outcome.code, outcome.stderr.trim())),
            Err(e) => report.errors.push(format!("{name}: {e}")),
        }
    };

    step("stop", plan.compose.stop(plan.stop_timeout));
    step("rm", plan.compose.remove(timeout));
    step("down", plan.compose.down(false, timeout));
    if plan.prune_volumes {
        step("volume prune", plan.compose.prune(PruneTarget::Volumes, timeout));
    }
    if plan.prune_images {
        step("image prune", plan.compose.prune(PruneTarget::Images, timeout));
    }
}

/// Normal-path cleanup around one action.
pub struct ArtifactGuard {
    manager: CleanupManager,
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if self.manager.cleanup_started() {
            return;
        }
        let (removed, errors) = self.manager.remove_artifacts();
        if removed > 0 {
            debug!("removed {removed} transient artifact(s)");
        }
        for err in errors {
            warn!("cleanup: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_runtime::{ComposeExecutable, ComposeFileSet, MockBackend};
    use portico_schema::{Environment, ServiceName};
    use std::path::Path;

    fn artifact(path: &Path) -> TempArtifact {
        std::fs::write(path, "FROM scratch\n").unwrap();
        TempArtifact {
            path: path.to_path_buf(),
            owning_service: ServiceName::new("skills"),
            environment: Environment::Dev,
        }
    }

    fn plan(mock: &Arc<MockBackend>) -> TeardownPlan {
        TeardownPlan {
            compose: ComposeClient::new(
                mock.clone(),
                &ComposeFileSet::new("dc.yml"),
                &ComposeExecutable::plugin(),
            ),
            stop_timeout: Duration::from_secs(3),
            prune_volumes: true,
            prune_images: false,
        }
    }

    #[test]
    fn guard_removes_exactly_registered_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("Dockerfile");
        std::fs::write(&keep, "FROM scratch\n").unwrap();
        let manager = CleanupManager::new();
        {
            let _guard = manager.guard();
            manager.register(artifact(&dir.path().join("Dockerfile.dev")));
        }
        assert!(!dir.path().join("Dockerfile.dev").exists());
        assert!(keep.exists());
        assert!(manager.registered().is_empty());
    }

    #[test]
    fn signal_teardown_runs_steps_in_order_and_once() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new());
        let manager = CleanupManager::new();
        manager.arm(plan(&mock));
        manager.register(artifact(&dir.path().join("Dockerfile.local")));

        let report = manager.handle_signal().unwrap();
        assert_eq!(report.steps, vec!["stop", "rm", "down", "volume prune"]);
        assert_eq!(report.artifacts_removed, 1);
        assert!(report.errors.is_empty());
        assert!(manager.token().is_cancelled());
        assert!(!dir.path().join("Dockerfile.local").exists());

        let calls = mock.invocations();
        assert_eq!(calls[0][4..], ["stop", "-t", "3"]);
        assert_eq!(calls[1][4..], ["rm", "-f", "-s"]);
        assert_eq!(calls[2][4..], ["down", "--remove-orphans"]);
        assert_eq!(calls[3], vec!["docker", "volume", "prune", "-f"]);

        assert!(manager.handle_signal().is_none());
        assert_eq!(mock.invocations().len(), 4);
    }

    #[test]
    fn disarmed_signal_only_removes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::new());
        let manager = CleanupManager::new();
        manager.arm(plan(&mock));
        manager.disarm();
        manager.register(artifact(&dir.path().join("Dockerfile.test")));

        let report = manager.handle_signal().unwrap();
        assert!(report.steps.is_empty());
        assert_eq!(report.artifacts_removed, 1);
        assert!(mock.invocations().is_empty());
    }

    #[test]
    fn failing_steps_are_collected_not_fatal() {
        let mock = Arc::new(MockBackend::new());
        mock.fail_on("stop", 1);
        let manager = CleanupManager::new();
        manager.arm(plan(&mock));
        let report = manager.handle_signal().unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("stop:"));
        assert_eq!(report.steps.len(), 4);
    }

    #[test]
    fn artifact_registered_after_teardown_is_removed_at_once() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CleanupManager::new();
        let guard = manager.guard();
        manager.handle_signal();
        let late = dir.path().join("Dockerfile.prod");
        manager.register(artifact(&late));
        assert!(!late.exists());
        assert!(manager.registered().is_empty());
        drop(guard);
    }

    #[test]
    fn track_skips_rendering_after_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CleanupManager::new();
        let path = dir.path().join("Dockerfile.dev");
        let tracked = manager.track(|| Ok(artifact(&path))).unwrap();
        assert_eq!(tracked.map(|a| a.path), Some(path.clone()));
        assert!(manager.ensure_running().is_ok());

        manager.handle_signal();
        assert!(!path.exists());
        let late = dir.path().join("Dockerfile.test");
        let tracked = manager.track(|| Ok(artifact(&late))).unwrap();
        assert!(tracked.is_none());
        assert!(!late.exists());
        assert!(matches!(manager.ensure_running(), Err(CoreError::Cancelled)));
    }

    #[test]
    fn wait_for_teardown_blocks_until_signal_path_finishes() {
        let mock = Arc::new(MockBackend::new());
        let manager = CleanupManager::new();
        assert!(!manager.wait_for_teardown());
        manager.arm(plan(&mock));
        let handler = manager.clone();
        let thread = std::thread::spawn(move || handler.handle_signal());
        while !manager.cleanup_started() {
            std::thread::yield_now();
        }
        assert!(manager.wait_for_teardown());
        assert_eq!(mock.invocations().len(), 4);
        assert!(thread.join().unwrap().is_some());
    }

    #[test]
    fn clones_share_state() {
        let manager = CleanupManager::new();
        let other = manager.clone();
        other.token().cancel();
        assert!(manager.token().is_cancelled());
    }
}
