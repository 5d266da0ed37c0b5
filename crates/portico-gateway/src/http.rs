use crate::{EmulatorConfig, GatewayApi, GatewayError, Integration, Resource, RestApi};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;

/// Emulator health route, shared with the bundled emulator.
pub const HEALTH_PATH: &str = "/_localstack/health";

/// Gateway client speaking the API Gateway v1 REST management API:
/// - `GET  /restapis` list REST APIs
/// - `POST /restapis` create REST API
/// - `GET  /restapis/<api>/resources` list resources
/// - `POST /restapis/<api>/resources/<parent>` create child resource
/// - `PUT  /restapis/<api>/resources/<res>/methods/<verb>` create method
/// - `PUT  /restapis/<api>/resources/<res>/methods/<verb>/integration`
/// - `POST /restapis/<api>/deployments` deploy to a stage
pub struct HttpGateway {
    config: EmulatorConfig,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    item: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    id: String,
}

fn map_error(err: ureq::Error, what: &str) -> GatewayError {
    match err {
        ureq::Error::StatusCode(404) => GatewayError::NotFound(what.to_owned()),
        ureq::Error::StatusCode(409) => GatewayError::Conflict(what.to_owned()),
        ureq::Error::StatusCode(code) => GatewayError::Http(format!("HTTP {code} for {what}")),
        e @ (ureq::Error::Io(_)
        | ureq::Error::Timeout(_)
        | ureq::Error::HostNotFound
        | ureq::Error::ConnectionFailed) => GatewayError::Unreachable(e.to_string()),
        e => GatewayError::Http(e.to_string()),
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|e| GatewayError::Serialization(e.to_string()))
}

enum Verb {
    Post,
    Put,
}

impl HttpGateway {
    pub fn new(config: EmulatorConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(config.request_timeout))
            .build();
        let agent = ureq::Agent::new_with_config(agent_config);
        Self { config, agent }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.endpoint)
    }

    fn read_body(resp: ureq::http::Response<ureq::Body>) -> Result<Vec<u8>, GatewayError> {
        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        Ok(body)
    }

    fn do_get(&self, path: &str) -> Result<Vec<u8>, GatewayError> {
        let url = self.url(path);
        tracing::debug!("GET {url}");
        let resp = self
            .agent
            .get(&url)
            .header("Authorization", &self.config.authorization_header())
            .call()
            .map_err(|e| map_error(e, path))?;
        Self::read_body(resp)
    }

    fn do_send(&self, verb: &Verb, path: &str, body: &Value) -> Result<Vec<u8>, GatewayError> {
        let url = self.url(path);
        let payload =
            serde_json::to_vec(body).map_err(|e| GatewayError::Serialization(e.to_string()))?;
        let builder = match verb {
            Verb::Post => {
                tracing::debug!("POST {url}");
                self.agent.post(&url)
            }
            Verb::Put => {
                tracing::debug!("PUT {url}");
                self.agent.put(&url)
            }
        };
        let resp = builder
            .header("Content-Type", "application/json")
            .header("Authorization", &self.config.authorization_header())
            .send(payload.as_slice())
            .map_err(|e| map_error(e, path))?;
        Self::read_body(resp)
    }
}

impl GatewayApi for HttpGateway {
    fn health(&self) -> Result<(), GatewayError> {
        self.do_get(HEALTH_PATH).map(|_| ())
    }

    fn list_rest_apis(&self) -> Result<Vec<RestApi>, GatewayError> {
        let body = self.do_get("/restapis?limit=500")?;
        Ok(decode::<ItemList<RestApi>>(&body)?.item)
    }

    fn create_rest_api(&self, name: &str) -> Result<RestApi, GatewayError> {
        let body = self.do_send(
            &Verb::Post,
            "/restapis",
            &json!({ "name": name, "description": "Portico local routes" }),
        )?;
        decode(&body)
    }

    fn list_resources(&self, api_id: &str) -> Result<Vec<Resource>, GatewayError> {
        let body = self.do_get(&format!("/restapis/{api_id}/resources?limit=500"))?;
        Ok(decode::<ItemList<Resource>>(&body)?.item)
    }

    fn create_resource(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<Resource, GatewayError> {
        let body = self.do_send(
            &Verb::Post,
            &format!("/restapis/{api_id}/resources/{parent_id}"),
            &json!({ "pathPart": path_part }),
        )?;
        decode(&body)
    }

    fn put_method(
        &self,
        api_id: &str,
        resource_id: &str,
        http_method: &str,
    ) -> Result<(), GatewayError> {
        self.do_send(
            &Verb::Put,
            &format!("/restapis/{api_id}/resources/{resource_id}/methods/{http_method}"),
            &json!({ "authorizationType": "NONE" }),
        )
        .map(|_| ())
    }

    fn put_integration(
        &self,
        api_id: &str,
        resource_id: &str,
        http_method: &str,
        integration: &Integration,
    ) -> Result<(), GatewayError> {
        let body = match integration {
            Integration::AwsProxy { uri } => json!({
                "type": integration.kind(),
                "integrationHttpMethod": "POST",
                "uri": uri,
            }),
            Integration::Mock => json!({
                "type": integration.kind(),
                "requestTemplates": { "application/json": "{\"statusCode\": 200}" },
            }),
        };
        self.do_send(
            &Verb::Put,
            &format!("/restapis/{api_id}/resources/{resource_id}/methods/{http_method}/integration"),
            &body,
        )
        .map(|_| ())
    }

    fn create_deployment(&self, api_id: &str, stage_name: &str) -> Result<String, GatewayError> {
        let body = self.do_send(
            &Verb::Post,
            &format!("/restapis/{api_id}/deployments"),
            &json!({ "stageName": stage_name }),
        )?;
        Ok(decode::<Deployment>(&body)?.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    fn closed_port_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    #[test]
    fn unreachable_emulator_is_reported_as_such() {
        let config = EmulatorConfig::new(&closed_port_endpoint())
            .with_request_timeout(Duration::from_secs(2));
        let gateway = HttpGateway::new(config);
        let err = gateway.health().unwrap_err();
        assert!(matches!(err, GatewayError::Unreachable(_)), "got {err:?}");
    }

    #[test]
    fn item_list_tolerates_missing_items() {
        let list: ItemList<RestApi> = decode(b"{}").unwrap();
        assert!(list.item.is_empty());
        let list: ItemList<RestApi> =
            decode(br#"{"item":[{"id":"a1","name":"portico-dev"}]}"#).unwrap();
        assert_eq!(list.item[0].name, "portico-dev");
    }

    #[test]
    fn decode_reports_serialization_errors() {
        let err = decode::<Deployment>(b"not json").unwrap_err();
        assert!(matches!(err, GatewayError::Serialization(_)));
    }

    #[test]
    fn url_joins_endpoint_and_path() {
        let gateway = HttpGateway::new(EmulatorConfig::new("http://localhost:4566/"));
        assert_eq!(
            gateway.url("/restapis"),
            "http://localhost:4566/restapis"
        );
    }
}
