use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// Externally exposed port when the environment file does not set one.
pub const DEFAULT_UNIFIED_PORT: u16 = 4321;

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("unknown environment '{0}', expected one of: local, test, dev, release, prod")]
    Unknown(String),
    #[error("failed to read environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid UNIFIED_PORT '{0}' in environment file")]
    InvalidPort(String),
}

/// Target environment of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Test,
    Dev,
    Release,
    Prod,
}

impl Environment {
    pub const ALL: [Environment; 5] = [
        Environment::Local,
        Environment::Test,
        Environment::Dev,
        Environment::Release,
        Environment::Prod,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Test => "test",
            Environment::Dev => "dev",
            Environment::Release => "release",
            Environment::Prod => "prod",
        }
    }

    /// Image build profile used by the Dockerfile templates.
    pub fn build_profile(self) -> BuildProfile {
        match self {
            Environment::Local | Environment::Dev => BuildProfile::Dev,
            Environment::Test => BuildProfile::Test,
            Environment::Release => BuildProfile::Staging,
            Environment::Prod => BuildProfile::Prod,
        }
    }

    /// Name of the `.env.<env>` file at the project root.
    pub fn env_file_name(self) -> String {
        format!(".env.{}", self.as_str())
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = EnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "test" => Ok(Environment::Test),
            "dev" => Ok(Environment::Dev),
            "release" => Ok(Environment::Release),
            "prod" => Ok(Environment::Prod),
            _ => Err(EnvironmentError::Unknown(s.to_owned())),
        }
    }
}

/// Build profile driving log level, debug flag and dev tooling in images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildProfile {
    Dev,
    Test,
    Staging,
    Prod,
}

impl BuildProfile {
    pub fn log_level(self) -> &'static str {
        match self {
            BuildProfile::Dev => "debug",
            BuildProfile::Test | BuildProfile::Staging => "info",
            BuildProfile::Prod => "warning",
        }
    }

    pub fn debug(self) -> bool {
        self == BuildProfile::Dev
    }
}

/// Per-invocation parameters every generated artifact is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentContext {
    pub env: Environment,
    pub unified_port: u16,
    pub project_root: PathBuf,
    /// `DATABASE_URL` from the environment file, if any.
    pub database_url: Option<String>,
    /// `GATEWAY_ENDPOINT` from the environment file, if any.
    pub gateway_endpoint: Option<String>,
}

impl EnvironmentContext {
    pub fn new(env: Environment, project_root: impl Into<PathBuf>) -> Self {
        Self {
            env,
            unified_port: DEFAULT_UNIFIED_PORT,
            project_root: project_root.into(),
            database_url: None,
            gateway_endpoint: None,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.unified_port = port;
        self
    }

    /// Load `.env.<env>` from the project root without touching the process
    /// environment. A missing file only produces a warning.
    pub fn load(env: Environment, project_root: &Path) -> Result<Self, EnvironmentError> {
        let mut ctx = Self::new(env, project_root);
        let path = project_root.join(env.env_file_name());
        if !path.exists() {
            warn!(
                "environment file {} not found, using default port {DEFAULT_UNIFIED_PORT}",
                path.display()
            );
            return Ok(ctx);
        }

        let iter = dotenvy::from_path_iter(&path).map_err(|source| EnvironmentError::EnvFile {
            path: path.clone(),
            source,
        })?;
        for item in iter {
            let (key, value) = item.map_err(|source| EnvironmentError::EnvFile {
                path: path.clone(),
                source,
            })?;
            match key.as_str() {
                "UNIFIED_PORT" => {
                    ctx.unified_port = value
                        .trim()
                        .parse()
                        .map_err(|_| EnvironmentError::InvalidPort(value.clone()))?;
                }
                "DATABASE_URL" if !value.is_empty() => ctx.database_url = Some(value),
                "GATEWAY_ENDPOINT" if !value.is_empty() => ctx.gateway_endpoint = Some(value),
                _ => {}
            }
        }
        debug!(
            "loaded {} (port {})",
            path.display(),
            ctx.unified_port
        );
        Ok(ctx)
    }

    /// Database URL handed to every service container, qualified by environment.
    pub fn service_database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!(
                "postgresql://postgres:postgres@db:5432/portico_{}",
                self.env
            ),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.unified_port)
    }
}
