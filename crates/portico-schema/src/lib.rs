//! Service manifests, environment context, and project configuration for Portico.
//!
//! This crate defines the schema layer: TOML service manifests (`service.toml`)
//! validated into `ServiceDescriptor`s, the per-invocation `EnvironmentContext`
//! loaded from `.env.<env>` files, and the optional `portico.toml` project
//! configuration.

pub mod config;
pub mod environment;
pub mod manifest;
pub mod types;

pub use config::{ConfigError, ProjectConfig, TemplateVariant, PROJECT_CONFIG_FILE};
pub use environment::{
    BuildProfile, Environment, EnvironmentContext, EnvironmentError, DEFAULT_UNIFIED_PORT,
};
pub use manifest::{
    load_descriptor, parse_manifest_file, parse_manifest_str, ManifestError, ServiceDescriptor,
    ServiceManifest, MANIFEST_FILE_NAME,
};
pub use types::{FunctionName, ServiceName};
