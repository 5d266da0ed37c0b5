//! In-memory API Gateway emulator.
//!
//! Serves the subset of the API Gateway v1 REST management API that the
//! Portico route synchronizer uses, plus the `/_localstack/health` probe.
//! State lives in memory and can optionally be mirrored to a JSON file so a
//! restarted emulator keeps its REST APIs.
//!
//! The [`TestServer`] helper starts an emulator on a random port for integration testing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

pub const HEALTH_PATH: &str = "/_localstack/health";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodRecord {
    pub http_method: String,
    pub authorization_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_integration: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_part: Option<String>,
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_methods: BTreeMap<String, MethodRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub id: String,
    pub stage_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub resources: Vec<ResourceRecord>,
    #[serde(default)]
    pub deployments: Vec<DeploymentRecord>,
}

impl ApiRecord {
    fn summary(&self) -> Value {
        json!({ "id": self.id, "name": self.name, "description": self.description })
    }

    fn resource_mut(&mut self, id: &str) -> Result<&mut ResourceRecord, ApiFailure> {
        self.resources
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ApiFailure::NotFound(format!("Invalid Resource identifier specified: {id}")))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmulatorState {
    next_id: u64,
    pub apis: Vec<ApiRecord>,
}

impl EmulatorState {
    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:010x}", self.next_id.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 24)
    }

    fn api_mut(&mut self, id: &str) -> Result<&mut ApiRecord, ApiFailure> {
        self.apis
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| ApiFailure::NotFound(format!("Invalid API identifier specified: {id}")))
    }
}

/// An error answered to the client in AWS JSON error shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFailure {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
}

impl ApiFailure {
    pub fn status(&self) -> u16 {
        match self {
            ApiFailure::BadRequest(_) => 400,
            ApiFailure::NotFound(_) => 404,
            ApiFailure::Conflict(_) => 409,
        }
    }

    fn body(&self) -> String {
        let (kind, message) = match self {
            ApiFailure::BadRequest(m) => ("BadRequestException", m),
            ApiFailure::NotFound(m) => ("NotFoundException", m),
            ApiFailure::Conflict(m) => ("ConflictException", m),
        };
        json!({ "__type": kind, "message": message }).to_string()
    }
}

/// Shared emulator state, optionally mirrored to a JSON file.
pub struct Store {
    state: RwLock<EmulatorState>,
    state_file: Option<PathBuf>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(EmulatorState::default()),
            state_file: None,
        }
    }

    /// Load `path` when it exists and write every mutation back to it.
    pub fn persistent(path: PathBuf) -> Self {
        let state = fs::read(&path)
            .ok()
            .and_then(|data| match serde_json::from_slice(&data) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("ignoring unreadable state file {}: {e}", path.display());
                    None
                }
            })
            .unwrap_or_default();
        Self {
            state: RwLock::new(state),
            state_file: Some(path),
        }
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> EmulatorState {
        self.state
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn read<T>(&self, f: impl FnOnce(&EmulatorState) -> T) -> T {
        match self.state.read() {
            Ok(guard) => f(&guard),
            Err(e) => f(&e.into_inner()),
        }
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut EmulatorState) -> Result<T, ApiFailure>,
    ) -> Result<T, ApiFailure> {
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        };
        let out = f(&mut guard)?;
        if let Some(ref path) = self.state_file {
            let written = serde_json::to_vec_pretty(&*guard)
                .map_err(std::io::Error::other)
                .and_then(|data| {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(path, data)
                });
            if let Err(e) = written {
                warn!("failed to persist emulator state to {}: {e}", path.display());
            }
        }
        Ok(out)
    }

    pub fn list_apis(&self) -> Value {
        self.read(|s| json!({ "item": s.apis.iter().map(ApiRecord::summary).collect::<Vec<_>>() }))
    }

    pub fn get_api(&self, api_id: &str) -> Result<Value, ApiFailure> {
        self.read(|s| {
            s.apis
                .iter()
                .find(|a| a.id == api_id)
                .map(ApiRecord::summary)
                .ok_or_else(|| ApiFailure::NotFound(format!("Invalid API identifier specified: {api_id}")))
        })
    }

    pub fn create_api(&self, name: &str, description: &str) -> Result<Value, ApiFailure> {
        if name.is_empty() {
            return Err(ApiFailure::BadRequest("name must not be empty".to_owned()));
        }
        self.mutate(|s| {
            let id = s.fresh_id();
            let root = ResourceRecord {
                id: s.fresh_id(),
                parent_id: None,
                path_part: None,
                path: "/".to_owned(),
                resource_methods: BTreeMap::new(),
            };
            let api = ApiRecord {
                id,
                name: name.to_owned(),
                description: description.to_owned(),
                resources: vec![root],
                deployments: Vec::new(),
            };
            let summary = api.summary();
            info!("created REST API {} ({})", api.name, api.id);
            s.apis.push(api);
            Ok(summary)
        })
    }

    pub fn list_resources(&self, api_id: &str) -> Result<Value, ApiFailure> {
        self.read(|s| {
            let api = s
                .apis
                .iter()
                .find(|a| a.id == api_id)
                .ok_or_else(|| ApiFailure::NotFound(format!("Invalid API identifier specified: {api_id}")))?;
            Ok(json!({ "item": api.resources }))
        })
    }

    pub fn create_resource(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<Value, ApiFailure> {
        if path_part.is_empty() || path_part.contains('/') {
            return Err(ApiFailure::BadRequest(format!("invalid pathPart '{path_part}'")));
        }
        self.mutate(|s| {
            let id = s.fresh_id();
            let api = s.api_mut(api_id)?;
            let parent_path = api.resource_mut(parent_id)?.path.clone();
            let path = if parent_path == "/" {
                format!("/{path_part}")
            } else {
                format!("{parent_path}/{path_part}")
            };
            if api.resources.iter().any(|r| r.path == path) {
                return Err(ApiFailure::Conflict(format!(
                    "Another resource with the same parent already has this name: {path_part}"
                )));
            }
            let resource = ResourceRecord {
                id,
                parent_id: Some(parent_id.to_owned()),
                path_part: Some(path_part.to_owned()),
                path,
                resource_methods: BTreeMap::new(),
            };
            let out = serde_json::to_value(&resource)
                .map_err(|e| ApiFailure::BadRequest(e.to_string()))?;
            debug!("created resource {}", resource.path);
            api.resources.push(resource);
            Ok(out)
        })
    }

    pub fn put_method(
        &self,
        api_id: &str,
        resource_id: &str,
        verb: &str,
        authorization_type: &str,
    ) -> Result<Value, ApiFailure> {
        self.mutate(|s| {
            let resource = s.api_mut(api_id)?.resource_mut(resource_id)?;
            if resource.resource_methods.contains_key(verb) {
                return Err(ApiFailure::Conflict("Method already exists for this resource".to_owned()));
            }
            let method = MethodRecord {
                http_method: verb.to_owned(),
                authorization_type: authorization_type.to_owned(),
                method_integration: None,
            };
            let out = serde_json::to_value(&method)
                .map_err(|e| ApiFailure::BadRequest(e.to_string()))?;
            resource.resource_methods.insert(verb.to_owned(), method);
            Ok(out)
        })
    }

    pub fn get_method(&self, api_id: &str, resource_id: &str, verb: &str) -> Result<Value, ApiFailure> {
        self.read(|s| {
            s.apis
                .iter()
                .find(|a| a.id == api_id)
                .and_then(|a| a.resources.iter().find(|r| r.id == resource_id))
                .and_then(|r| r.resource_methods.get(verb))
                .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
                .ok_or_else(|| ApiFailure::NotFound("Invalid Method identifier specified".to_owned()))
        })
    }

    pub fn put_integration(
        &self,
        api_id: &str,
        resource_id: &str,
        verb: &str,
        integration: Value,
    ) -> Result<Value, ApiFailure> {
        if integration.get("type").and_then(Value::as_str).is_none() {
            return Err(ApiFailure::BadRequest("integration type is required".to_owned()));
        }
        self.mutate(|s| {
            let resource = s.api_mut(api_id)?.resource_mut(resource_id)?;
            let method = resource
                .resource_methods
                .get_mut(verb)
                .ok_or_else(|| ApiFailure::NotFound("Invalid Method identifier specified".to_owned()))?;
            method.method_integration = Some(integration.clone());
            Ok(integration)
        })
    }

    pub fn create_deployment(&self, api_id: &str, stage_name: &str) -> Result<Value, ApiFailure> {
        if stage_name.is_empty() {
            return Err(ApiFailure::BadRequest("stageName must not be empty".to_owned()));
        }
        self.mutate(|s| {
            let id = s.fresh_id();
            let api = s.api_mut(api_id)?;
            let deployment = DeploymentRecord {
                id,
                stage_name: stage_name.to_owned(),
            };
            info!("deployed {} to stage {stage_name}", api.name);
            api.deployments.push(deployment.clone());
            serde_json::to_value(&deployment).map_err(|e| ApiFailure::BadRequest(e.to_string()))
        })
    }

    pub fn list_deployments(&self, api_id: &str) -> Result<Value, ApiFailure> {
        self.read(|s| {
            s.apis
                .iter()
                .find(|a| a.id == api_id)
                .map(|a| json!({ "item": a.deployments }))
                .ok_or_else(|| ApiFailure::NotFound(format!("Invalid API identifier specified: {api_id}")))
        })
    }
}

/// A recognized management route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Health,
    RestApis,
    RestApi(&'a str),
    Resources(&'a str),
    Resource { api: &'a str, resource: &'a str },
    Method { api: &'a str, resource: &'a str, verb: &'a str },
    Integration { api: &'a str, resource: &'a str, verb: &'a str },
    Deployments(&'a str),
}

/// Parse a request URL (query string ignored) into a route.
pub fn parse_route(url: &str) -> Option<Route<'_>> {
    let path = url.split('?').next().unwrap_or_default().trim_matches('/');
    let segments: Vec<&str> = path.split('/').collect();
    let route = match segments.as_slice() {
        ["_localstack", "health"] | ["health"] => Route::Health,
        ["restapis"] => Route::RestApis,
        ["restapis", api] => Route::RestApi(api),
        ["restapis", api, "resources"] => Route::Resources(api),
        ["restapis", api, "resources", resource] => Route::Resource { api, resource },
        ["restapis", api, "resources", resource, "methods", verb] => Route::Method { api, resource, verb },
        ["restapis", api, "resources", resource, "methods", verb, "integration"] => {
            Route::Integration { api, resource, verb }
        }
        ["restapis", api, "deployments"] => Route::Deployments(api),
        _ => return None,
    };
    Some(route)
}

fn json_header() -> Option<Header> {
    Header::from_bytes("Content-Type", "application/json").ok()
}

fn respond_json(req: tiny_http::Request, code: u16, body: &Value) {
    let mut response = Response::from_string(body.to_string()).with_status_code(StatusCode(code));
    if let Some(header) = json_header() {
        response = response.with_header(header);
    }
    let _ = req.respond(response);
}

fn respond_err(req: tiny_http::Request, failure: &ApiFailure) {
    let mut response =
        Response::from_string(failure.body()).with_status_code(StatusCode(failure.status()));
    if let Some(header) = json_header() {
        response = response.with_header(header);
    }
    let _ = req.respond(response);
}

fn read_json(req: &mut tiny_http::Request) -> Result<Value, ApiFailure> {
    let mut body = String::new();
    req.as_reader()
        .read_to_string(&mut body)
        .map_err(|e| ApiFailure::BadRequest(format!("read error: {e}")))?;
    if body.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&body).map_err(|e| ApiFailure::BadRequest(format!("invalid JSON: {e}")))
}

fn str_field<'a>(body: &'a Value, field: &str) -> Result<&'a str, ApiFailure> {
    body.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ApiFailure::BadRequest(format!("missing field '{field}'")))
}

fn dispatch(store: &Store, req: &mut tiny_http::Request, route: Route<'_>) -> Result<(u16, Value), ApiFailure> {
    let method = req.method().clone();
    match (route, method) {
        (Route::Health, Method::Get) => Ok((200, json!({ "services": { "apigateway": "running" } }))),
        (Route::RestApis, Method::Get) => Ok((200, store.list_apis())),
        (Route::RestApis, Method::Post) => {
            let body = read_json(req)?;
            let name = str_field(&body, "name")?;
            let description = body.get("description").and_then(Value::as_str).unwrap_or_default();
            Ok((201, store.create_api(name, description)?))
        }
        (Route::RestApi(api), Method::Get) => Ok((200, store.get_api(api)?)),
        (Route::Resources(api), Method::Get) => Ok((200, store.list_resources(api)?)),
        (Route::Resource { api, resource }, Method::Post) => {
            let body = read_json(req)?;
            let part = str_field(&body, "pathPart")?;
            Ok((201, store.create_resource(api, resource, part)?))
        }
        (Route::Method { api, resource, verb }, Method::Put) => {
            let body = read_json(req)?;
            let auth = body
                .get("authorizationType")
                .and_then(Value::as_str)
                .unwrap_or("NONE");
            Ok((201, store.put_method(api, resource, verb, auth)?))
        }
        (Route::Method { api, resource, verb }, Method::Get) => Ok((200, store.get_method(api, resource, verb)?)),
        (Route::Integration { api, resource, verb }, Method::Put) => {
            let body = read_json(req)?;
            Ok((201, store.put_integration(api, resource, verb, body)?))
        }
        (Route::Deployments(api), Method::Post) => {
            let body = read_json(req)?;
            let stage = str_field(&body, "stageName")?;
            Ok((201, store.create_deployment(api, stage)?))
        }
        (Route::Deployments(api), Method::Get) => Ok((200, store.list_deployments(api)?)),
        (_, other) => Err(ApiFailure::BadRequest(format!("method {other} not allowed here"))),
    }
}

/// Handle a single HTTP request, dispatching to the matching route handler.
pub fn handle_request(store: &Store, mut req: tiny_http::Request) {
    let url = req.url().to_owned();
    debug!("{} {url}", req.method());

    let Some(route) = parse_route(&url) else {
        respond_err(req, &ApiFailure::NotFound(format!("no route for {url}")));
        return;
    };
    match dispatch(store, &mut req, route) {
        Ok((code, body)) => respond_json(req, code, &body),
        Err(failure) => {
            debug!("{url}: {failure:?}");
            respond_err(req, &failure);
        }
    }
}

/// Bind `addr` and serve requests, blocking the current thread.
pub fn run_server(store: &Arc<Store>, addr: &str) -> std::io::Result<()> {
    let server = Server::http(addr).map_err(std::io::Error::other)?;
    for request in server.incoming_requests() {
        handle_request(store, request);
    }
    Ok(())
}

/// An emulator on a random port in a background thread.
///
/// Drop the `TestServer` to stop it (via `Server::unblock`).
pub struct TestServer {
    pub url: String,
    pub port: u16,
    store: Arc<Store>,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    /// Start an in-memory emulator bound to `127.0.0.1:0`.
    pub fn start() -> std::io::Result<Self> {
        Self::with_store(Store::in_memory())
    }

    pub fn with_store(store: Store) -> std::io::Result<Self> {
        let server = Arc::new(Server::http("127.0.0.1:0").map_err(std::io::Error::other)?);
        let port = server
            .server_addr()
            .to_ip()
            .map(|a| a.port())
            .ok_or_else(|| std::io::Error::other("server is not bound to an IP address"))?;
        let url = format!("http://127.0.0.1:{port}");

        let store = Arc::new(store);
        let srv = Arc::clone(&server);
        let handler_store = Arc::clone(&store);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle_request(&handler_store, request);
            }
        });

        Ok(Self {
            url,
            port,
            store,
            server,
            _handle: handle,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_parse() {
        assert_eq!(parse_route("/_localstack/health"), Some(Route::Health));
        assert_eq!(parse_route("/restapis?limit=500"), Some(Route::RestApis));
        assert_eq!(
            parse_route("/restapis/a1/resources/r2/methods/GET/integration"),
            Some(Route::Integration {
                api: "a1",
                resource: "r2",
                verb: "GET"
            })
        );
        assert_eq!(parse_route("/restapis/a1/deployments"), Some(Route::Deployments("a1")));
        assert!(parse_route("/objects/abc").is_none());
    }

    #[test]
    fn resource_tree_and_conflicts() {
        let store = Store::in_memory();
        let api = store.create_api("portico-dev", "").unwrap();
        let api_id = api["id"].as_str().unwrap().to_owned();
        let resources = store.list_resources(&api_id).unwrap();
        let root_id = resources["item"][0]["id"].as_str().unwrap().to_owned();

        let skills = store.create_resource(&api_id, &root_id, "skills").unwrap();
        assert_eq!(skills["path"], "/skills");
        let err = store.create_resource(&api_id, &root_id, "skills").unwrap_err();
        assert_eq!(err.status(), 409);

        let skills_id = skills["id"].as_str().unwrap();
        store.put_method(&api_id, skills_id, "GET", "NONE").unwrap();
        assert_eq!(store.put_method(&api_id, skills_id, "GET", "NONE").unwrap_err().status(), 409);
    }

    #[test]
    fn integration_needs_existing_method() {
        let store = Store::in_memory();
        let api_id = store.create_api("portico-dev", "").unwrap()["id"]
            .as_str()
            .unwrap()
            .to_owned();
        let root_id = store.list_resources(&api_id).unwrap()["item"][0]["id"]
            .as_str()
            .unwrap()
            .to_owned();
        let err = store
            .put_integration(&api_id, &root_id, "GET", json!({ "type": "MOCK" }))
            .unwrap_err();
        assert_eq!(err.status(), 404);
        let err = store
            .put_integration(&api_id, &root_id, "GET", json!({}))
            .unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn unknown_api_is_not_found() {
        let store = Store::in_memory();
        assert_eq!(store.list_resources("nope").unwrap_err().status(), 404);
        assert_eq!(store.create_deployment("nope", "dev").unwrap_err().status(), 404);
    }

    #[test]
    fn state_file_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/emulator.json");
        {
            let store = Store::persistent(path.clone());
            store.create_api("portico-test", "").unwrap();
        }
        let store = Store::persistent(path);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.apis.len(), 1);
        assert_eq!(snapshot.apis[0].name, "portico-test");
        // ids keep advancing after a reload
        let second = store.create_api("portico-dev", "").unwrap();
        assert_ne!(second["id"], json!(snapshot.apis[0].id));
    }

    #[test]
    fn failure_body_uses_aws_error_shape() {
        let body: Value = serde_json::from_str(&ApiFailure::Conflict("dup".into()).body()).unwrap();
        assert_eq!(body["__type"], "ConflictException");
        assert_eq!(body["message"], "dup");
    }
}
