//! Config synthesis: descriptors + environment → reverse-proxy config,
//! compose override, and the service-URL map.
//!
//! Rendering is pure and deterministic. The proxy config and the override
//! are byte-identical for identical inputs; the URL map differs only in
//! `generated_at`.

use crate::template::dockerfile_name;
use crate::CoreError;
use chrono::{DateTime, Utc};
use portico_schema::{EnvironmentContext, ServiceDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PROXY_CONFIG_FILE: &str = "nginx.conf";
pub const OVERRIDE_FILE: &str = "docker-compose.override.yml";
pub const URL_MAP_FILE: &str = "service-urls.json";

/// Path every function container serves invocations on.
const INVOCATION_PATH: &str = "/2015-03-31/functions/function/invocations";
const FUNCTION_PORT: u16 = 8080;
const WEBSITE_UPSTREAM: &str = "website:3000";
const GATEWAY_IMAGE: &str = "nginx:1.27-alpine";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteUrls {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUrls {
    pub base: String,
    pub health: String,
    pub docs: String,
    pub redoc: String,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiGatewayUrls {
    pub base: String,
    pub health: String,
    pub services: BTreeMap<String, ServiceUrls>,
}

/// Contents of `service-urls.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUrlMap {
    pub unified_port: u16,
    pub base_url: String,
    pub website: WebsiteUrls,
    pub api_gateway: ApiGatewayUrls,
    pub config_digest: String,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedConfig {
    pub proxy_config: String,
    pub compose_override: String,
    pub url_map: ServiceUrlMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedPaths {
    pub proxy_config: PathBuf,
    pub compose_override: PathBuf,
    pub url_map: PathBuf,
}

/// `path` relative to the project root when it lies inside it, so generated
/// files do not depend on where the project is checked out.
fn project_relative(ctx: &EnvironmentContext, path: &Path) -> String {
    match path.strip_prefix(&ctx.project_root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_owned(),
        Ok(rel) => format!("./{}", rel.to_string_lossy()),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

const GENERATED_HEADER: &str = "# Generated by portico. Do not edit; re-run `portico generate` instead.\n";

const PROXY_HEADER: &str = r#"worker_processes auto;

events {
    worker_connections 1024;
}

http {
    include       /etc/nginx/mime.types;
    default_type  application/octet-stream;
    sendfile      on;
    keepalive_timeout 65;
    client_max_body_size 10m;

    log_format portico '$remote_addr [$time_local] "$request" $status '
                       '$body_bytes_sent ${request_time}s upstream=$upstream_addr';
    access_log /var/log/nginx/access.log portico;
    error_log  /var/log/nginx/error.log warn;

"#;

const HEALTH_LOCATION: &str = r#"        location = /health {
            default_type application/json;
            return 200 '{"status":"healthy","service":"portico-gateway"}';
        }

"#;

const CATCH_ALL_LOCATION: &str = r#"        location / {
            proxy_pass http://website;
            proxy_http_version 1.1;
            proxy_set_header Host $host;
            proxy_set_header Upgrade $http_upgrade;
            proxy_set_header Connection "upgrade";
            proxy_set_header X-Real-IP $remote_addr;
            proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        }
    }
}
"#;

fn render_proxy_config(descriptors: &[ServiceDescriptor]) -> String {
    let mut out = format!("{GENERATED_HEADER}{PROXY_HEADER}");

    for d in descriptors {
        let _ = writeln!(out, "    upstream {} {{", d.name.upstream_name());
        let _ = writeln!(out, "        server {}:{FUNCTION_PORT};", d.name.network_alias());
        let _ = writeln!(out, "    }}\n");
    }
    let _ = writeln!(out, "    upstream website {{");
    let _ = writeln!(out, "        server {WEBSITE_UPSTREAM};");
    let _ = writeln!(out, "    }}\n");

    out.push_str("    server {\n        listen 80;\n        server_name localhost;\n\n");
    out.push_str(HEALTH_LOCATION);
    for d in descriptors {
        render_service_location(&mut out, d);
    }
    out.push_str(CATCH_ALL_LOCATION);
    out
}

fn cors_headers(out: &mut String, indent: &str, allow_methods: &str) {
    let _ = writeln!(out, "{indent}add_header Access-Control-Allow-Origin * always;");
    let _ = writeln!(out, "{indent}add_header Access-Control-Allow-Methods \"{allow_methods}\" always;");
    let _ = writeln!(
        out,
        "{indent}add_header Access-Control-Allow-Headers \"Content-Type, Authorization\" always;"
    );
}

fn render_service_location(out: &mut String, d: &ServiceDescriptor) {
    let _ = writeln!(out, "        # {} ({})", d.name, d.http_methods.join(", "));
    let _ = writeln!(out, "        location /api{} {{", d.proxy_prefix());
    if d.cors_enabled {
        let mut methods = d.http_methods.clone();
        if !methods.iter().any(|m| m == "OPTIONS") {
            methods.push("OPTIONS".to_owned());
        }
        let allow_methods = methods.join(", ");
        let _ = writeln!(out, "            if ($request_method = OPTIONS) {{");
        cors_headers(out, "                ", &allow_methods);
        let _ = writeln!(out, "                add_header Access-Control-Max-Age 86400 always;");
        let _ = writeln!(out, "                return 204;");
        let _ = writeln!(out, "            }}");
        cors_headers(out, "            ", &allow_methods);
    }
    let _ = writeln!(out, "            proxy_set_header X-Original-Path $uri;");
    let _ = writeln!(out, "            proxy_set_header X-Original-Method $request_method;");
    let _ = writeln!(out, "            proxy_set_header X-Original-Query $args;");
    let _ = writeln!(out, "            proxy_set_header X-Service-Name {};", d.name);
    let _ = writeln!(out, "            proxy_set_header Content-Type application/json;");
    let _ = writeln!(out, "            proxy_method POST;");
    let _ = writeln!(out, "            rewrite ^ {INVOCATION_PATH} break;");
    let _ = writeln!(out, "            proxy_pass http://{};", d.name.upstream_name());
    let _ = writeln!(out, "        }}\n");
}

/// Top level of `docker-compose.override.yml`.
#[derive(Debug, Default, Serialize)]
struct ComposeOverride {
    services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Default, Serialize)]
struct ComposeService {
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<ComposeBuild>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<&'static str, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    networks: BTreeMap<&'static str, NetworkAttachment>,
}

#[derive(Debug, Serialize)]
struct ComposeBuild {
    context: String,
    dockerfile: String,
}

#[derive(Debug, Serialize)]
struct NetworkAttachment {
    aliases: Vec<String>,
}

fn gateway_service(descriptors: &[ServiceDescriptor], ctx: &EnvironmentContext, output_dir: &Path) -> ComposeService {
    let proxy_mount = project_relative(ctx, &output_dir.join(PROXY_CONFIG_FILE));
    ComposeService {
        image: Some(GATEWAY_IMAGE.to_owned()),
        ports: vec![format!("{}:80", ctx.unified_port)],
        volumes: vec![format!("{proxy_mount}:/etc/nginx/nginx.conf:ro")],
        depends_on: descriptors.iter().map(|d| d.name.compose_service()).collect(),
        ..ComposeService::default()
    }
}

fn lambda_service(d: &ServiceDescriptor, ctx: &EnvironmentContext) -> ComposeService {
    let environment = BTreeMap::from([
        ("SERVICE_NAME", d.name.to_string()),
        ("SERVICE_PATH", d.route_path.clone()),
        ("DATABASE_URL", ctx.service_database_url()),
        ("LOG_LEVEL", ctx.env.build_profile().log_level().to_owned()),
        ("ENVIRONMENT", ctx.env.to_string()),
    ]);
    ComposeService {
        build: Some(ComposeBuild {
            context: project_relative(ctx, &d.source_dir),
            dockerfile: dockerfile_name(ctx.env),
        }),
        environment,
        networks: BTreeMap::from([(
            "default",
            NetworkAttachment {
                aliases: vec![d.name.network_alias()],
            },
        )]),
        ..ComposeService::default()
    }
}

fn render_compose_override(
    descriptors: &[ServiceDescriptor],
    ctx: &EnvironmentContext,
    output_dir: &Path,
) -> Result<String, CoreError> {
    let mut compose = ComposeOverride::default();
    compose
        .services
        .insert("gateway".to_owned(), gateway_service(descriptors, ctx, output_dir));
    for d in descriptors {
        compose
            .services
            .insert(d.name.compose_service(), lambda_service(d, ctx));
    }
    let yaml = serde_yaml::to_string(&compose)?;
    Ok(format!("{GENERATED_HEADER}{yaml}"))
}

fn config_digest(proxy_config: &str, compose_override: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(proxy_config.as_bytes());
    hasher.update(compose_override.as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn build_url_map(
    descriptors: &[ServiceDescriptor],
    ctx: &EnvironmentContext,
    config_digest: String,
    generated_at: DateTime<Utc>,
) -> ServiceUrlMap {
    let base_url = ctx.base_url();
    let api_base = format!("{base_url}/api");
    let services = descriptors
        .iter()
        .map(|d| {
            let base = format!("{api_base}{}", d.route_path);
            let urls = ServiceUrls {
                health: format!("{base}{}", d.health_endpoint),
                docs: format!("{base}/docs"),
                redoc: format!("{base}/redoc"),
                methods: d.http_methods.clone(),
                base,
            };
            (d.name.to_string(), urls)
        })
        .collect();

    ServiceUrlMap {
        unified_port: ctx.unified_port,
        website: WebsiteUrls {
            url: base_url.clone(),
        },
        api_gateway: ApiGatewayUrls {
            health: format!("{base_url}/health"),
            base: api_base,
            services,
        },
        base_url,
        config_digest,
        generated_at: generated_at.to_rfc3339(),
    }
}

/// Render all three artifacts for `descriptors`, stamped with `generated_at`.
pub fn synthesize_at(
    descriptors: &[ServiceDescriptor],
    ctx: &EnvironmentContext,
    output_dir: &Path,
    generated_at: DateTime<Utc>,
) -> Result<GeneratedConfig, CoreError> {
    let proxy_config = render_proxy_config(descriptors);
    let compose_override = render_compose_override(descriptors, ctx, output_dir)?;
    let digest = config_digest(&proxy_config, &compose_override);
    let url_map = build_url_map(descriptors, ctx, digest, generated_at);
    Ok(GeneratedConfig {
        proxy_config,
        compose_override,
        url_map,
    })
}

/// Render all three artifacts for `descriptors` now.
pub fn synthesize(
    descriptors: &[ServiceDescriptor],
    ctx: &EnvironmentContext,
    output_dir: &Path,
) -> Result<GeneratedConfig, CoreError> {
    synthesize_at(descriptors, ctx, output_dir, Utc::now())
}

impl GeneratedConfig {
    /// Write the artifacts into `dir`, replacing earlier output.
    pub fn write_to(&self, dir: &Path) -> Result<GeneratedPaths, CoreError> {
        fs::create_dir_all(dir)?;
        let paths = GeneratedPaths {
            proxy_config: dir.join(PROXY_CONFIG_FILE),
            compose_override: dir.join(OVERRIDE_FILE),
            url_map: dir.join(URL_MAP_FILE),
        };
        fs::write(&paths.proxy_config, &self.proxy_config)?;
        fs::write(&paths.compose_override, &self.compose_override)?;
        let mut json = serde_json::to_string_pretty(&self.url_map)?;
        json.push('\n');
        fs::write(&paths.url_map, json)?;
        debug!("wrote {}", paths.proxy_config.display());
        debug!("wrote {}", paths.compose_override.display());
        info!(
            "generated config for {} service(s) in {}",
            self.url_map.api_gateway.services.len(),
            dir.display()
        );
        Ok(paths)
    }
}
