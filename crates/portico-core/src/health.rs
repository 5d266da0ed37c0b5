use crate::cleanup::CancellationToken;
use crate::poll::{poll_until, PollOutcome};
use portico_runtime::{ComposeClient, ServiceRuntimeStatus};
use portico_schema::config::HealthSection;
use serde::Serialize;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthGateConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HealthGateConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }
}

impl From<&HealthSection> for HealthGateConfig {
    fn from(section: &HealthSection) -> Self {
        Self {
            interval: Duration::from_secs(section.interval_secs.max(1)),
            timeout: Duration::from_secs(section.timeout_secs),
        }
    }
}

/// How waiting for the stack ended. Only `Ready` means every requested
/// service is up; the other outcomes are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HealthOutcome {
    Ready { services: Vec<ServiceRuntimeStatus> },
    TimedOut { pending: Vec<String>, last: Vec<ServiceRuntimeStatus> },
    Cancelled { pending: Vec<String> },
}

impl HealthOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, HealthOutcome::Ready { .. })
    }
}

#[derive(Debug, Clone, Default)]
struct Pending {
    names: Vec<String>,
    last: Vec<ServiceRuntimeStatus>,
}

/// Requested services that are not ready in `statuses`. With no explicit
/// request every reported service counts.
fn pending_services(requested: &[String], statuses: &[ServiceRuntimeStatus]) -> Vec<String> {
    if requested.is_empty() {
        return statuses
            .iter()
            .filter(|s| !s.is_ready())
            .map(|s| s.service_name.clone())
            .collect();
    }
    requested
        .iter()
        .filter(|name| {
            !statuses
                .iter()
                .any(|s| &s.service_name == *name && s.is_ready())
        })
        .cloned()
        .collect()
}

/// Polls `compose ps` until the requested services are ready.
pub struct HealthGate<'a> {
    compose: &'a ComposeClient,
    config: HealthGateConfig,
    token: &'a CancellationToken,
}

impl<'a> HealthGate<'a> {
    pub fn new(compose: &'a ComposeClient, config: HealthGateConfig, token: &'a CancellationToken) -> Self {
        Self {
            compose,
            config,
            token,
        }
    }

    /// Wait for `services` (all services when empty).
    pub fn wait(&self, services: &[String]) -> HealthOutcome {
        let outcome = poll_until(self.config.interval, self.config.timeout, self.token, || {
            let statuses = match self.compose.ps(services) {
                Ok(statuses) => statuses,
                Err(e) => {
                    debug!("status probe failed: {e}");
                    return ControlFlow::Continue(Pending {
                        names: services.to_vec(),
                        last: Vec::new(),
                    });
                }
            };
            let pending = pending_services(services, &statuses);
            if pending.is_empty() && !statuses.is_empty() {
                ControlFlow::Break(statuses)
            } else {
                debug!("waiting for: {}", pending.join(", "));
                ControlFlow::Continue(Pending {
                    names: pending,
                    last: statuses,
                })
            }
        });

        match outcome {
            PollOutcome::Ready(services) => HealthOutcome::Ready { services },
            PollOutcome::TimedOut(last) => {
                let last = last.unwrap_or_default();
                warn!(
                    "services not ready after {}s: {}",
                    self.config.timeout.as_secs(),
                    last.names.join(", ")
                );
                HealthOutcome::TimedOut {
                    pending: last.names,
                    last: last.last,
                }
            }
            PollOutcome::Cancelled(last) => HealthOutcome::Cancelled {
                pending: last.map(|p| p.names).unwrap_or_default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_runtime::{ComposeExecutable, ComposeFileSet, MockBackend};
    use std::sync::Arc;

    const FAST: HealthGateConfig = HealthGateConfig {
        interval: Duration::from_millis(5),
        timeout: Duration::from_millis(200),
    };

    fn client(mock: &Arc<MockBackend>) -> ComposeClient {
        ComposeClient::new(
            mock.clone(),
            &ComposeFileSet::new("dc.yml"),
            &ComposeExecutable::plugin(),
        )
    }

    #[test]
    fn ready_once_healthcheck_passes() {
        let mock = Arc::new(MockBackend::new());
        mock.push_ps_output(r#"{"Service":"db","State":"running","Health":"starting"}"#);
        mock.push_ps_output(r#"{"Service":"db","State":"running","Health":"healthy"}"#);
        let compose = client(&mock);
        let token = CancellationToken::new();
        let outcome = HealthGate::new(&compose, FAST, &token).wait(&["db".to_owned()]);
        assert!(outcome.is_ready(), "{outcome:?}");
    }

    #[test]
    fn stuck_in_starting_times_out_without_error() {
        let mock = Arc::new(MockBackend::new());
        mock.push_ps_output(
            "{\"Service\":\"db\",\"State\":\"running\",\"Health\":\"starting\"}\n\
             {\"Service\":\"website\",\"State\":\"running\",\"Health\":\"\"}",
        );
        let compose = client(&mock);
        let token = CancellationToken::new();
        let outcome = HealthGate::new(&compose, FAST, &token).wait(&[]);
        match outcome {
            HealthOutcome::TimedOut { pending, last } => {
                assert_eq!(pending, vec!["db"]);
                assert_eq!(last.len(), 2);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn no_reported_services_never_counts_as_ready() {
        let mock = Arc::new(MockBackend::new());
        mock.push_ps_output("");
        let compose = client(&mock);
        let token = CancellationToken::new();
        let outcome = HealthGate::new(&compose, FAST, &token).wait(&[]);
        assert!(matches!(outcome, HealthOutcome::TimedOut { .. }));
    }

    #[test]
    fn requested_service_missing_from_report_is_pending() {
        let mock = Arc::new(MockBackend::new());
        mock.push_ps_output(r#"{"Service":"website","State":"running","Health":""}"#);
        let compose = client(&mock);
        let token = CancellationToken::new();
        let outcome = HealthGate::new(&compose, FAST, &token)
            .wait(&["website".to_owned(), "skills-lambda".to_owned()]);
        match outcome {
            HealthOutcome::TimedOut { pending, .. } => assert_eq!(pending, vec!["skills-lambda"]),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn status_failures_keep_polling() {
        let mock = Arc::new(MockBackend::new());
        mock.fail_on("ps", 1);
        let compose = client(&mock);
        let token = CancellationToken::new();
        let outcome = HealthGate::new(&compose, FAST, &token).wait(&["db".to_owned()]);
        assert!(matches!(outcome, HealthOutcome::TimedOut { ref pending, .. } if pending == &["db"]));
        assert!(mock.invocations().len() > 1);
    }

    #[test]
    fn cancelled_gate_returns_promptly() {
        let mock = Arc::new(MockBackend::new());
        let compose = client(&mock);
        let token = CancellationToken::new();
        token.cancel();
        let outcome = HealthGate::new(&compose, HealthGateConfig::default(), &token).wait(&[]);
        assert_eq!(outcome, HealthOutcome::Cancelled { pending: Vec::new() });
    }

    #[test]
    fn pending_logic() {
        let status = |name: &str, state: &str, health: &str| {
            portico_runtime::parse_ps_output(&format!(
                r#"{{"Service":"{name}","State":"{state}","Health":"{health}"}}"#
            ))
            .unwrap()
            .remove(0)
        };
        let statuses = vec![
            status("db", "running", "unhealthy"),
            status("web", "exited", ""),
            status("gw", "running", ""),
        ];
        assert_eq!(pending_services(&[], &statuses), vec!["db", "web"]);
        assert!(pending_services(&["gw".to_owned()], &statuses).is_empty());
    }
}
