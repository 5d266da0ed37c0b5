use crate::{GatewayApi, GatewayError, Integration, Resource, RestApi};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// In-memory gateway with the same conflict semantics as the emulator.
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    unreachable_probes: usize,
    next_id: u64,
    apis: Vec<RestApi>,
    resources: HashMap<String, Vec<Resource>>,
    methods: BTreeMap<(String, String, String), Option<Integration>>,
    deployments: Vec<(String, String)>,
    creates: usize,
    failing_methods: Vec<String>,
}

impl MockState {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:06}", self.next_id)
    }
}

/// Counts of everything the mock has been asked to create.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCounts {
    pub apis: usize,
    pub resources: usize,
    pub methods: usize,
    pub integrations: usize,
    pub deployments: usize,
    pub create_calls: usize,
}

fn poisoned<E: std::fmt::Display>(e: E) -> GatewayError {
    GatewayError::Http(format!("mutex poisoned: {e}"))
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `probes` health checks with `Unreachable`.
    pub fn unreachable_for(&self, probes: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.unreachable_probes = probes;
        }
    }

    /// Make `put_method` fail for this HTTP verb.
    pub fn fail_method(&self, http_method: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_methods.push(http_method.to_owned());
        }
    }

    pub fn counts(&self) -> MockCounts {
        let Ok(state) = self.state.lock() else {
            return MockCounts::default();
        };
        MockCounts {
            apis: state.apis.len(),
            resources: state.resources.values().map(Vec::len).sum(),
            methods: state.methods.len(),
            integrations: state.methods.values().filter(|i| i.is_some()).count(),
            deployments: state.deployments.len(),
            create_calls: state.creates,
        }
    }

    /// Paths of every resource of `api_id`, sorted.
    pub fn resource_paths(&self, api_id: &str) -> Vec<String> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut paths: Vec<String> = state
            .resources
            .get(api_id)
            .map(|rs| rs.iter().map(|r| r.path.clone()).collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Integration wired on `(resource path, verb)`, if any.
    pub fn integration_at(&self, api_id: &str, path: &str, http_method: &str) -> Option<Integration> {
        let state = self.state.lock().ok()?;
        let resource = state
            .resources
            .get(api_id)?
            .iter()
            .find(|r| r.path == path)?;
        state
            .methods
            .get(&(api_id.to_owned(), resource.id.clone(), http_method.to_owned()))
            .cloned()
            .flatten()
    }
}

impl GatewayApi for MockGateway {
    fn health(&self) -> Result<(), GatewayError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if state.unreachable_probes > 0 {
            state.unreachable_probes -= 1;
            return Err(GatewayError::Unreachable("connection refused".to_owned()));
        }
        Ok(())
    }

    fn list_rest_apis(&self) -> Result<Vec<RestApi>, GatewayError> {
        Ok(self.state.lock().map_err(poisoned)?.apis.clone())
    }

    fn create_rest_api(&self, name: &str) -> Result<RestApi, GatewayError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.creates += 1;
        let api = RestApi {
            id: state.fresh_id("api"),
            name: name.to_owned(),
        };
        let root = Resource {
            id: state.fresh_id("root"),
            parent_id: None,
            path_part: None,
            path: "/".to_owned(),
        };
        state.resources.insert(api.id.clone(), vec![root]);
        state.apis.push(api.clone());
        Ok(api)
    }

    fn list_resources(&self, api_id: &str) -> Result<Vec<Resource>, GatewayError> {
        let state = self.state.lock().map_err(poisoned)?;
        state
            .resources
            .get(api_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("/restapis/{api_id}")))
    }

    fn create_resource(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<Resource, GatewayError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.creates += 1;
        let id = state.fresh_id("res");
        let resources = state
            .resources
            .get_mut(api_id)
            .ok_or_else(|| GatewayError::NotFound(format!("/restapis/{api_id}")))?;
        let parent = resources
            .iter()
            .find(|r| r.id == parent_id)
            .ok_or_else(|| GatewayError::NotFound(format!("resource {parent_id}")))?;
        let path = if parent.path == "/" {
            format!("/{path_part}")
        } else {
            format!("{}/{path_part}", parent.path)
        };
        if resources.iter().any(|r| r.path == path) {
            return Err(GatewayError::Conflict(path));
        }
        let resource = Resource {
            id,
            parent_id: Some(parent_id.to_owned()),
            path_part: Some(path_part.to_owned()),
            path,
        };
        resources.push(resource.clone());
        Ok(resource)
    }

    fn put_method(
        &self,
        api_id: &str,
        resource_id: &str,
        http_method: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.creates += 1;
        if state.failing_methods.iter().any(|m| m == http_method) {
            return Err(GatewayError::Http(format!("HTTP 500 for {http_method}")));
        }
        let key = (
            api_id.to_owned(),
            resource_id.to_owned(),
            http_method.to_owned(),
        );
        if state.methods.contains_key(&key) {
            return Err(GatewayError::Conflict(format!("{resource_id} {http_method}")));
        }
        state.methods.insert(key, None);
        Ok(())
    }

    fn put_integration(
        &self,
        api_id: &str,
        resource_id: &str,
        http_method: &str,
        integration: &Integration,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let key = (
            api_id.to_owned(),
            resource_id.to_owned(),
            http_method.to_owned(),
        );
        let slot = state
            .methods
            .get_mut(&key)
            .ok_or_else(|| GatewayError::NotFound(format!("{resource_id} {http_method}")))?;
        *slot = Some(integration.clone());
        Ok(())
    }

    fn create_deployment(&self, api_id: &str, stage_name: &str) -> Result<String, GatewayError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if !state.apis.iter().any(|a| a.id == api_id) {
            return Err(GatewayError::NotFound(format!("/restapis/{api_id}")));
        }
        let id = state.fresh_id("dep");
        state
            .deployments
            .push((api_id.to_owned(), stage_name.to_owned()));
        Ok(id)
    }
}
