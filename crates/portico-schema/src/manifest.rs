use crate::types::{is_valid_service_name, FunctionName, ServiceName};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the per-service declaration inside each service directory.
pub const MANIFEST_FILE_NAME: &str = "service.toml";

pub const DEFAULT_HEALTH_ENDPOINT: &str = "/health";

const ALLOWED_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "ANY",
];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("lambda_function.name must not be empty")]
    EmptyName,
    #[error("invalid service name '{0}': expected lowercase letters, digits, '-' or '_'")]
    InvalidName(String),
    #[error("api_gateway.path must start with '/': '{0}'")]
    InvalidRoutePath(String),
    #[error("api_gateway.path segment '{segment}' in '{path}' is not allowed: use letters, digits, '-', '_', '.', '~' or a {{param}}")]
    InvalidRouteSegment { path: String, segment: String },
    #[error("api_gateway.methods must not be empty")]
    NoMethods,
    #[error("unsupported HTTP method '{0}'")]
    UnsupportedMethod(String),
    #[error("health_check.endpoint must start with '/': '{0}'")]
    InvalidHealthEndpoint(String),
}

/// On-disk shape of `service.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceManifest {
    pub lambda_function: LambdaFunctionSection,
    pub api_gateway: ApiGatewaySection,
    #[serde(default)]
    pub health_check: HealthCheckSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LambdaFunctionSection {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApiGatewaySection {
    pub path: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub cors_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckSection {
    #[serde(default = "default_health_endpoint")]
    pub endpoint: String,
}

impl Default for HealthCheckSection {
    fn default() -> Self {
        Self {
            endpoint: default_health_endpoint(),
        }
    }
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_owned()]
}

fn default_health_endpoint() -> String {
    DEFAULT_HEALTH_ENDPOINT.to_owned()
}

/// Validated, immutable description of one service for the current run.
///
/// Identity is `name`; two descriptors with the same name describe the same
/// service regardless of the other fields.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: ServiceName,
    pub function_name: FunctionName,
    pub description: String,
    pub route_path: String,
    pub http_methods: Vec<String>,
    pub cors_enabled: bool,
    pub health_endpoint: String,
    pub source_dir: PathBuf,
}

impl ServiceDescriptor {
    /// Route segments below the API root, e.g. `/skills/v1` -> `["skills", "v1"]`.
    pub fn path_parts(&self) -> Vec<&str> {
        self.route_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect()
    }

    /// Static part of the route, up to the first `{param}` segment. This is
    /// what the reverse proxy matches on.
    pub fn proxy_prefix(&self) -> String {
        self.path_parts()
            .into_iter()
            .take_while(|segment| !segment.starts_with('{'))
            .fold(String::new(), |mut prefix, segment| {
                prefix.push('/');
                prefix.push_str(segment);
                prefix
            })
    }
}

impl ServiceManifest {
    /// Validate the manifest and turn it into a descriptor rooted at `source_dir`.
    pub fn into_descriptor(self, source_dir: &Path) -> Result<ServiceDescriptor, ManifestError> {
        let name = self.lambda_function.name.trim().to_owned();
        if name.is_empty() {
            return Err(ManifestError::EmptyName);
        }
        if !is_valid_service_name(&name) {
            return Err(ManifestError::InvalidName(name));
        }

        let route_path = normalize_route(&self.api_gateway.path)?;

        if self.api_gateway.methods.is_empty() {
            return Err(ManifestError::NoMethods);
        }
        let mut http_methods = Vec::with_capacity(self.api_gateway.methods.len());
        for method in &self.api_gateway.methods {
            let upper = method.trim().to_ascii_uppercase();
            if !ALLOWED_METHODS.contains(&upper.as_str()) {
                return Err(ManifestError::UnsupportedMethod(method.clone()));
            }
            if !http_methods.contains(&upper) {
                http_methods.push(upper);
            }
        }

        let health_endpoint = self.health_check.endpoint.trim().to_owned();
        if !health_endpoint.starts_with('/') {
            return Err(ManifestError::InvalidHealthEndpoint(health_endpoint));
        }

        Ok(ServiceDescriptor {
            function_name: FunctionName::new(name.clone()),
            name: ServiceName::new(name),
            description: self.lambda_function.description,
            route_path,
            http_methods,
            cors_enabled: self.api_gateway.cors_enabled,
            health_endpoint,
            source_dir: source_dir.to_path_buf(),
        })
    }
}

fn is_route_param(segment: &str) -> bool {
    let Some(inner) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) else {
        return false;
    };
    let inner = inner.strip_suffix('+').unwrap_or(inner);
    !inner.is_empty() && inner.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_route_literal(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
}

/// Trim, drop a trailing `/`, and check every segment. The first segment
/// must be literal so the proxy has a prefix to match.
fn normalize_route(raw: &str) -> Result<String, ManifestError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('/') || trimmed.len() < 2 {
        return Err(ManifestError::InvalidRoutePath(raw.to_owned()));
    }
    let route = trimmed.trim_end_matches('/');
    for (i, segment) in route[1..].split('/').enumerate() {
        let ok = is_route_literal(segment) || (i > 0 && is_route_param(segment));
        if !ok {
            return Err(ManifestError::InvalidRouteSegment {
                path: raw.to_owned(),
                segment: segment.to_owned(),
            });
        }
    }
    Ok(route.to_owned())
}

pub fn parse_manifest_str(input: &str) -> Result<ServiceManifest, ManifestError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<ServiceManifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}

/// Parse and validate the manifest inside `service_dir`.
pub fn load_descriptor(service_dir: &Path) -> Result<ServiceDescriptor, ManifestError> {
    parse_manifest_file(service_dir.join(MANIFEST_FILE_NAME))?.into_descriptor(service_dir)
}
