use crate::cleanup::CancellationToken;
use crate::poll::{poll_until, PollOutcome};
use portico_gateway::{EmulatorConfig, GatewayApi, GatewayConfig, GatewayError, Integration, Resource};
use portico_schema::ServiceDescriptor;
use serde::Serialize;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Folded result of one synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Services whose every method was wired this run.
    pub services_wired: usize,
    /// `"<METHOD> <path>"` for the methods of those services.
    pub wired: Vec<String>,
    pub errors: Vec<String>,
    pub deployment_id: Option<String>,
}

/// What happened to the gateway step of `up`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatewayStep {
    NotRequested,
    Unreachable,
    Failed { error: String },
    Synced { report: SyncReport },
}

/// Mirrors service routes into the API emulator.
pub struct GatewaySync<'a> {
    api: &'a dyn GatewayApi,
    emulator: &'a EmulatorConfig,
    token: &'a CancellationToken,
    readiness_timeout: Duration,
    interval: Duration,
}

/// Resource ids by full path, seeded from the emulator.
struct ResourceIndex {
    by_path: HashMap<String, String>,
}

impl ResourceIndex {
    fn new(resources: Vec<Resource>) -> Self {
        Self {
            by_path: resources.into_iter().map(|r| (r.path, r.id)).collect(),
        }
    }
}

fn join_path(parent: &str, part: &str) -> String {
    if parent == "/" {
        format!("/{part}")
    } else {
        format!("{parent}/{part}")
    }
}

fn tolerate_conflict(result: Result<(), GatewayError>) -> Result<(), GatewayError> {
    match result {
        Err(e) if e.is_conflict() => Ok(()),
        other => other,
    }
}

impl<'a> GatewaySync<'a> {
    pub fn new(api: &'a dyn GatewayApi, emulator: &'a EmulatorConfig, token: &'a CancellationToken) -> Self {
        Self {
            api,
            emulator,
            token,
            readiness_timeout: Duration::from_secs(30),
            interval: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_readiness(mut self, timeout: Duration, interval: Duration) -> Self {
        self.readiness_timeout = timeout;
        self.interval = interval;
        self
    }

    /// Poll the emulator health endpoint until it answers or the bound elapses.
    pub fn wait_ready(&self) -> bool {
        let outcome = poll_until(self.interval, self.readiness_timeout, self.token, || {
            match self.api.health() {
                Ok(()) => ControlFlow::Break(()),
                Err(e) => ControlFlow::Continue(e.to_string()),
            }
        });
        match outcome {
            PollOutcome::Ready(()) => true,
            PollOutcome::TimedOut(last) | PollOutcome::Cancelled(last) => {
                debug!("emulator not ready: {}", last.unwrap_or_default());
                false
            }
        }
    }

    /// Look up the REST API named `name`, creating it when absent.
    pub fn ensure_rest_api(&self, name: &str, stage_name: &str) -> Result<GatewayConfig, GatewayError> {
        let api = match self.api.list_rest_apis()?.into_iter().find(|a| a.name == name) {
            Some(api) => {
                debug!("reusing REST API {name} ({})", api.id);
                api
            }
            None => {
                info!("creating REST API {name}");
                self.api.create_rest_api(name)?
            }
        };
        let root = self
            .api
            .list_resources(&api.id)?
            .into_iter()
            .find(|r| r.path == "/")
            .ok_or_else(|| GatewayError::NotFound(format!("root resource of {}", api.id)))?;
        Ok(GatewayConfig {
            api_id: api.id,
            root_resource_id: root.id,
            stage_name: stage_name.to_owned(),
        })
    }

    fn ensure_resource(
        &self,
        config: &GatewayConfig,
        index: &mut ResourceIndex,
        descriptor: &ServiceDescriptor,
    ) -> Result<String, GatewayError> {
        let mut parent_id = config.root_resource_id.clone();
        let mut parent_path = "/".to_owned();
        for part in descriptor.path_parts() {
            let path = join_path(&parent_path, part);
            let id = if let Some(id) = index.by_path.get(&path) {
                id.clone()
            } else {
                match self.api.create_resource(&config.api_id, &parent_id, part) {
                    Ok(resource) => resource.id,
                    Err(e) if e.is_conflict() => {
                        // created behind our back; re-read
                        *index = ResourceIndex::new(self.api.list_resources(&config.api_id)?);
                        index
                            .by_path
                            .get(&path)
                            .cloned()
                            .ok_or_else(|| GatewayError::NotFound(path.clone()))?
                    }
                    Err(e) => return Err(e),
                }
            };
            index.by_path.insert(path.clone(), id.clone());
            parent_id = id;
            parent_path = path;
        }
        Ok(parent_id)
    }

    fn wire_service(
        &self,
        config: &GatewayConfig,
        index: &mut ResourceIndex,
        descriptor: &ServiceDescriptor,
    ) -> Result<Vec<String>, GatewayError> {
        let resource_id = self.ensure_resource(config, index, descriptor)?;
        let uri = self.emulator.lambda_invocation_uri(descriptor.function_name.as_str());
        let proxy = Integration::AwsProxy { uri };
        let mut wired = Vec::new();

        for method in &descriptor.http_methods {
            tolerate_conflict(self.api.put_method(&config.api_id, &resource_id, method))?;
            self.api
                .put_integration(&config.api_id, &resource_id, method, &proxy)?;
            wired.push(format!("{method} {}", descriptor.route_path));
        }

        if descriptor.cors_enabled && !descriptor.http_methods.iter().any(|m| m == "OPTIONS") {
            tolerate_conflict(self.api.put_method(&config.api_id, &resource_id, "OPTIONS"))?;
            self.api
                .put_integration(&config.api_id, &resource_id, "OPTIONS", &Integration::Mock)?;
            wired.push(format!("OPTIONS {}", descriptor.route_path));
        }
        Ok(wired)
    }

    /// Wire every descriptor into the REST API `api_name` and deploy once.
    ///
    /// Fails only when the REST API itself cannot be resolved; per-service
    /// failures are collected in the report.
    pub fn sync(
        &self,
        api_name: &str,
        stage_name: &str,
        descriptors: &[ServiceDescriptor],
    ) -> Result<SyncReport, GatewayError> {
        let config = self.ensure_rest_api(api_name, stage_name)?;
        let mut index = ResourceIndex::new(self.api.list_resources(&config.api_id)?);
        let mut report = SyncReport::default();

        for descriptor in descriptors {
            match self.wire_service(&config, &mut index, descriptor) {
                Ok(wired) => {
                    report.services_wired += 1;
                    report.wired.extend(wired);
                }
                Err(e) => {
                    warn!("gateway: {}: {e}", descriptor.name);
                    report.errors.push(format!("{}: {e}", descriptor.name));
                }
            }
        }

        match self.api.create_deployment(&config.api_id, &config.stage_name) {
            Ok(id) => {
                info!(
                    "deployed {} service(s), {} route(s) to stage {}",
                    report.services_wired,
                    report.wired.len(),
                    config.stage_name
                );
                report.deployment_id = Some(id);
            }
            Err(e) => report.errors.push(format!("deployment: {e}")),
        }
        Ok(report)
    }
}
