use crate::CoreError;
use portico_schema::ServiceDescriptor;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Coarse service groups selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceGroup {
    Website,
    Server,
    Db,
    Gateway,
}

impl ServiceGroup {
    pub const ALL: [ServiceGroup; 4] = [
        ServiceGroup::Website,
        ServiceGroup::Server,
        ServiceGroup::Db,
        ServiceGroup::Gateway,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceGroup::Website => "website",
            ServiceGroup::Server => "server",
            ServiceGroup::Db => "db",
            ServiceGroup::Gateway => "gateway",
        }
    }
}

impl fmt::Display for ServiceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceGroup {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "website" => Ok(ServiceGroup::Website),
            "server" => Ok(ServiceGroup::Server),
            "db" => Ok(ServiceGroup::Db),
            "gateway" => Ok(ServiceGroup::Gateway),
            other => Err(CoreError::Selection(format!(
                "unknown service group '{other}', expected website, server, db, gateway or all"
            ))),
        }
    }
}

/// Which discovered function services the `server` group covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerServices {
    All,
    Named(BTreeSet<String>),
}

/// Validated `--services` / `--server-services` pair. `all` is expanded into
/// the explicit group set at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSelection {
    groups: BTreeSet<ServiceGroup>,
    server: ServerServices,
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

impl ServiceSelection {
    pub fn all() -> Self {
        Self {
            groups: ServiceGroup::ALL.into_iter().collect(),
            server: ServerServices::All,
        }
    }

    pub fn parse(services: &str, server_services: &str) -> Result<Self, CoreError> {
        let mut groups = BTreeSet::new();
        for item in split_list(services) {
            if item.eq_ignore_ascii_case("all") {
                groups.extend(ServiceGroup::ALL);
            } else {
                groups.insert(item.parse::<ServiceGroup>()?);
            }
        }
        if groups.is_empty() {
            return Err(CoreError::Selection("no service groups selected".to_owned()));
        }

        let names: Vec<&str> = split_list(server_services).collect();
        let server = if names.is_empty() || names.iter().any(|n| n.eq_ignore_ascii_case("all")) {
            ServerServices::All
        } else {
            ServerServices::Named(names.into_iter().map(str::to_owned).collect())
        };
        Ok(Self { groups, server })
    }

    pub fn groups(&self) -> impl Iterator<Item = ServiceGroup> + '_ {
        self.groups.iter().copied()
    }

    pub fn includes(&self, group: ServiceGroup) -> bool {
        self.groups.contains(&group)
    }

    pub fn gateway_requested(&self) -> bool {
        self.includes(ServiceGroup::Gateway)
    }

    /// Every group and every function service.
    pub fn is_everything(&self) -> bool {
        self.groups.len() == ServiceGroup::ALL.len() && self.server == ServerServices::All
    }

    /// Descriptors covered by the `server` group.
    pub fn selected_functions<'a>(&self, discovered: &'a [ServiceDescriptor]) -> Vec<&'a ServiceDescriptor> {
        if !self.includes(ServiceGroup::Server) {
            return Vec::new();
        }
        match &self.server {
            ServerServices::All => discovered.iter().collect(),
            ServerServices::Named(names) => {
                for name in names {
                    if !discovered.iter().any(|d| d.name == name.as_str()) {
                        warn!("--server-services: '{name}' was not discovered");
                    }
                }
                discovered
                    .iter()
                    .filter(|d| names.contains(d.name.as_str()))
                    .collect()
            }
        }
    }

    /// Descriptors whose build file compose needs for this selection. The
    /// gateway depends on every function service, so selecting it pulls them
    /// all in.
    pub fn build_targets<'a>(&self, discovered: &'a [ServiceDescriptor]) -> Vec<&'a ServiceDescriptor> {
        if self.gateway_requested() {
            return discovered.iter().collect();
        }
        self.selected_functions(discovered)
    }

    /// Compose service names to pass to the container tool. Empty means the
    /// whole project, which is what `all` selects.
    pub fn compose_services(&self, discovered: &[ServiceDescriptor]) -> Vec<String> {
        if self.is_everything() {
            return Vec::new();
        }
        let mut services = Vec::new();
        for group in self.groups() {
            match group {
                ServiceGroup::Server => services.extend(
                    self.selected_functions(discovered)
                        .into_iter()
                        .map(|d| d.name.compose_service()),
                ),
                other => services.push(other.as_str().to_owned()),
            }
        }
        services
    }
}

impl Default for ServiceSelection {
    fn default() -> Self {
        Self::all()
    }
}
