//! API-gateway emulator client for Portico.
//!
//! This crate provides the REST-API management calls the route synchronizer
//! needs (REST APIs, resources, methods, integrations, deployments) behind the
//! `GatewayApi` trait, an HTTP implementation over `ureq`, an in-memory mock,
//! and the emulator endpoint configuration.

pub mod config;
pub mod http;
pub mod mock;

pub use config::EmulatorConfig;
pub use http::HttpGateway;
pub use mock::{MockCounts, MockGateway};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("emulator unreachable: {0}")]
    Unreachable(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    Conflict(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GatewayError {
    /// Whether a create call failed only because the target already exists.
    pub fn is_conflict(&self) -> bool {
        matches!(self, GatewayError::Conflict(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestApi {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub path_part: Option<String>,
    pub path: String,
}

/// Emulator-side identity of the REST API a project is mirrored into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub api_id: String,
    pub root_resource_id: String,
    pub stage_name: String,
}

/// Backend wiring of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integration {
    /// Proxy the whole request to a function invocation URI.
    AwsProxy { uri: String },
    /// Answer locally; used for CORS preflight.
    Mock,
}

impl Integration {
    pub fn kind(&self) -> &'static str {
        match self {
            Integration::AwsProxy { .. } => "AWS_PROXY",
            Integration::Mock => "MOCK",
        }
    }
}

/// REST-API management surface of the emulator.
pub trait GatewayApi: Send + Sync {
    /// Cheap liveness probe.
    fn health(&self) -> Result<(), GatewayError>;

    fn list_rest_apis(&self) -> Result<Vec<RestApi>, GatewayError>;

    fn create_rest_api(&self, name: &str) -> Result<RestApi, GatewayError>;

    fn list_resources(&self, api_id: &str) -> Result<Vec<Resource>, GatewayError>;

    /// Fails with `GatewayError::Conflict` when the path part already exists.
    fn create_resource(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<Resource, GatewayError>;

    /// Fails with `GatewayError::Conflict` when the method already exists.
    fn put_method(
        &self,
        api_id: &str,
        resource_id: &str,
        http_method: &str,
    ) -> Result<(), GatewayError>;

    /// Creates or replaces the integration of a method.
    fn put_integration(
        &self,
        api_id: &str,
        resource_id: &str,
        http_method: &str,
        integration: &Integration,
    ) -> Result<(), GatewayError>;

    /// Returns the deployment id.
    fn create_deployment(&self, api_id: &str, stage_name: &str) -> Result<String, GatewayError>;
}
