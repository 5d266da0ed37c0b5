use crate::CoreError;
use portico_schema::{BuildProfile, Environment, ServiceDescriptor, ServiceName};
pub use portico_schema::TemplateVariant;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A rendered build file. Every artifact registered during a run is removed
/// before that run ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TempArtifact {
    pub path: PathBuf,
    pub owning_service: ServiceName,
    pub environment: Environment,
}

const DEV_TOOLING_BLOCK: &str = r#"
# Development tooling
RUN pip install --no-cache-dir debugpy watchdog ipdb || true
ENV PYTHONDONTWRITEBYTECODE=1 \
    PYTHONUNBUFFERED=1
"#;

const DEV_ALIASES_BLOCK: &str = r#"
# Shell aliases
RUN echo "alias ll='ls -la'" >> /root/.bashrc \
 && echo "alias logs='tail -f /tmp/*.log'" >> /root/.bashrc
"#;

/// `Dockerfile.<env>`, the rendered build file name inside a service directory.
pub fn dockerfile_name(env: Environment) -> String {
    format!("Dockerfile.{env}")
}

/// Substitute the service placeholders into `template`.
pub fn render_template(template: &str, descriptor: &ServiceDescriptor, env: Environment) -> String {
    let profile = env.build_profile();
    let mut out = template
        .replace("{{SERVICE_NAME}}", descriptor.name.as_str())
        .replace("{{ENVIRONMENT}}", env.as_str())
        .replace("{{LOG_LEVEL}}", profile.log_level())
        .replace("{{DEBUG}}", if profile.debug() { "true" } else { "false" })
        .replace("{{SERVICE_PATH}}", &descriptor.route_path);

    if profile == BuildProfile::Dev {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(DEV_TOOLING_BLOCK);
        out.push_str(DEV_ALIASES_BLOCK);
    }

    if out.contains("{{") {
        debug!("{}: template leaves unknown placeholders in place", descriptor.name);
    }
    out
}

/// Render the `variant` template for `descriptor` into
/// `<service_dir>/Dockerfile.<env>`.
pub fn render_dockerfile(
    templates_dir: &Path,
    descriptor: &ServiceDescriptor,
    env: Environment,
    variant: TemplateVariant,
) -> Result<TempArtifact, CoreError> {
    let template_path = templates_dir.join(variant.file_name());
    let template = match fs::read_to_string(&template_path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("{}: template {} not found", descriptor.name, template_path.display());
            return Err(CoreError::TemplateNotFound(template_path));
        }
        Err(e) => return Err(e.into()),
    };

    let rendered = render_template(&template, descriptor, env);
    let path = descriptor.source_dir.join(dockerfile_name(env));
    fs::write(&path, rendered)?;
    debug!("rendered {}", path.display());

    Ok(TempArtifact {
        path,
        owning_service: descriptor.name.clone(),
        environment: env,
    })
}
