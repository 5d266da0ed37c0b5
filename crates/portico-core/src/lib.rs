//! Orchestration core for Portico local environments.
//!
//! This crate ties the schema, runtime, and gateway layers together into the
//! `Orchestrator`: manifest discovery, config synthesis (reverse proxy,
//! compose override, service-URL map), Dockerfile rendering, the lifecycle
//! actions, the health gate, gateway route synchronization, and the cleanup
//! manager that guarantees transient artifacts and containers are torn down.

pub mod cleanup;
pub mod discovery;
pub mod gateway_sync;
pub mod health;
pub mod orchestrator;
pub mod poll;
pub mod selection;
pub mod synth;
pub mod template;

pub use cleanup::{ArtifactGuard, CancellationToken, CleanupManager, TeardownPlan, TeardownReport};
pub use discovery::{discover_services, DiscoveryReport, SkippedService};
pub use gateway_sync::{GatewayStep, GatewaySync, SyncReport};
pub use health::{HealthGate, HealthGateConfig, HealthOutcome};
pub use orchestrator::{
    CleanReport, GenerateReport, Orchestrator, PrepareReport, RestartReport, StatusReport,
    UpReport, UpRequest,
};
pub use poll::{poll_until, PollOutcome};
pub use selection::{ServerServices, ServiceGroup, ServiceSelection};
pub use synth::{
    synthesize, GeneratedConfig, GeneratedPaths, ServiceUrlMap, OVERRIDE_FILE, PROXY_CONFIG_FILE,
    URL_MAP_FILE,
};
pub use template::{dockerfile_name, render_dockerfile, render_template, TempArtifact, TemplateVariant};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] portico_schema::ManifestError),
    #[error("environment error: {0}")]
    Environment(#[from] portico_schema::EnvironmentError),
    #[error("project config error: {0}")]
    Config(#[from] portico_schema::ConfigError),
    #[error("runtime error: {0}")]
    Runtime(#[from] portico_runtime::RuntimeError),
    #[error("gateway error: {0}")]
    Gateway(#[from] portico_gateway::GatewayError),
    #[error("template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),
    #[error("invalid service selection: {0}")]
    Selection(String),
    #[error("signal handler error: {0}")]
    Signal(String),
    #[error("interrupted, teardown in progress")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("compose override serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
