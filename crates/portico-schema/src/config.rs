//! Optional project-level configuration (`portico.toml`).
//!
//! Every key has a default, so a project without the file behaves exactly like
//! one with an empty file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PROJECT_CONFIG_FILE: &str = "portico.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read project config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse project config: {0}")]
    ParseToml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub cleanup: CleanupSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    #[serde(default = "default_project_name")]
    pub name: String,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: default_project_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    #[serde(default = "default_services_dir")]
    pub services_dir: PathBuf,
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_compose_file")]
    pub compose_file: PathBuf,
    /// Which Dockerfile template services are rendered from.
    #[serde(default)]
    pub template_variant: TemplateVariant,
}

/// Which template a service image is built from.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TemplateVariant {
    /// Self-contained function image.
    Standalone,
    /// Image built as part of the compose stack.
    #[default]
    Compose,
}

impl TemplateVariant {
    pub fn file_name(self) -> &'static str {
        match self {
            TemplateVariant::Standalone => "Dockerfile.lambda.template",
            TemplateVariant::Compose => "Dockerfile.compose.template",
        }
    }
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            services_dir: default_services_dir(),
            templates_dir: default_templates_dir(),
            output_dir: default_output_dir(),
            compose_file: default_compose_file(),
            template_variant: TemplateVariant::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HealthSection {
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_health_timeout(),
            interval_secs: default_health_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_gateway_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Stage name; defaults to the environment name when unset.
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default = "default_gateway_readiness")]
    pub readiness_timeout_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            endpoint: default_gateway_endpoint(),
            region: default_region(),
            account_id: default_account_id(),
            stage: None,
            readiness_timeout_secs: default_gateway_readiness(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CleanupSection {
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    #[serde(default)]
    pub prune_volumes: bool,
    #[serde(default)]
    pub prune_images: bool,
}

impl Default for CleanupSection {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout(),
            prune_volumes: false,
            prune_images: false,
        }
    }
}

fn default_project_name() -> String {
    "portico".to_owned()
}

fn default_services_dir() -> PathBuf {
    PathBuf::from("services")
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".portico/generated")
}

fn default_compose_file() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

fn default_health_timeout() -> u64 {
    60
}

fn default_health_interval() -> u64 {
    2
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_gateway_endpoint() -> String {
    "http://localhost:4566".to_owned()
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

fn default_account_id() -> String {
    "000000000000".to_owned()
}

fn default_gateway_readiness() -> u64 {
    30
}

fn default_stop_timeout() -> u64 {
    10
}

impl ProjectConfig {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Load `portico.toml` from `project_root`, or defaults when it is absent.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let path = project_root.join(PROJECT_CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content)
    }
}
