use crate::CoreError;
use portico_schema::{load_descriptor, ServiceDescriptor, MANIFEST_FILE_NAME};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedService {
    pub dir: PathBuf,
    pub reason: String,
}

/// Discovered services, sorted by directory name, plus what was skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub services: Vec<ServiceDescriptor>,
    pub skipped: Vec<SkippedService>,
}

impl DiscoveryReport {
    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.to_string()).collect()
    }
}

/// Why `candidate` cannot join `accepted`: same name, same proxy upstream
/// (`user-notes` and `user_notes`), or same proxy location.
fn conflict(accepted: &[ServiceDescriptor], candidate: &ServiceDescriptor) -> Option<String> {
    let upstream = candidate.name.upstream_name();
    let prefix = candidate.proxy_prefix();
    accepted.iter().find_map(|s| {
        if s.name == candidate.name {
            Some(format!("duplicate service name '{}'", candidate.name))
        } else if s.name.upstream_name() == upstream {
            Some(format!(
                "service name '{}' collides with '{}' as upstream {upstream}",
                candidate.name, s.name
            ))
        } else if s.proxy_prefix() == prefix {
            Some(format!(
                "route {} collides with '{}' on /api{prefix}",
                candidate.route_path, s.name
            ))
        } else {
            None
        }
    })
}

/// Scan the direct subdirectories of `services_root` for `service.toml`.
///
/// Directories with a missing or invalid manifest are skipped with a reason;
/// hidden directories are ignored; on a duplicate name, upstream or route
/// the first wins.
pub fn discover_services(services_root: &Path) -> Result<DiscoveryReport, CoreError> {
    let mut report = DiscoveryReport::default();
    if !services_root.is_dir() {
        warn!("services directory {} not found", services_root.display());
        return Ok(report);
    }

    let mut dirs: Vec<PathBuf> = fs::read_dir(services_root)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'))
        })
        .collect();
    dirs.sort();

    for dir in dirs {
        if !dir.join(MANIFEST_FILE_NAME).is_file() {
            warn!("skipping {}: no {MANIFEST_FILE_NAME}", dir.display());
            report.skipped.push(SkippedService {
                dir,
                reason: format!("no {MANIFEST_FILE_NAME}"),
            });
            continue;
        }
        match load_descriptor(&dir) {
            Ok(descriptor) => {
                if let Some(reason) = conflict(&report.services, &descriptor) {
                    warn!("skipping {}: {reason}", dir.display());
                    report.skipped.push(SkippedService { dir, reason });
                    continue;
                }
                debug!("discovered {} at {}", descriptor.name, dir.display());
                report.services.push(descriptor);
            }
            Err(e) => {
                warn!("skipping {}: {e}", dir.display());
                report.skipped.push(SkippedService {
                    dir,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_service(root: &Path, dir: &str, name: &str, path: &str) {
        let d = root.join(dir);
        fs::create_dir_all(&d).unwrap();
        fs::write(
            d.join(MANIFEST_FILE_NAME),
            format!("[lambda_function]\nname = \"{name}\"\n\n[api_gateway]\npath = \"{path}\"\n"),
        )
        .unwrap();
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let report = discover_services(&dir.path().join("services")).unwrap();
        assert!(report.services.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn sorted_by_directory_name() {
        let dir = tempfile::tempdir().unwrap();
        write_service(dir.path(), "zeta", "zeta", "/zeta");
        write_service(dir.path(), "alpha", "alpha", "/alpha");
        write_service(dir.path(), "mid", "mid", "/mid");
        let report = discover_services(dir.path()).unwrap();
        assert_eq!(report.names(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn skips_missing_and_malformed_manifests() {
        let dir = tempfile::tempdir().unwrap();
        write_service(dir.path(), "skills", "skills", "/skills");
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        let bad = dir.path().join("broken");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join(MANIFEST_FILE_NAME), "[lambda_function\n").unwrap();

        let report = discover_services(dir.path()).unwrap();
        assert_eq!(report.names(), vec!["skills"]);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].dir, bad);
        assert!(report.skipped[1].reason.contains("no service.toml"));
    }

    #[test]
    fn hidden_dirs_and_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_service(dir.path(), ".cache", "cache", "/cache");
        fs::write(dir.path().join("README.md"), "services").unwrap();
        let report = discover_services(dir.path()).unwrap();
        assert!(report.services.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn first_duplicate_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_service(dir.path(), "a-skills", "skills", "/skills");
        write_service(dir.path(), "b-skills", "skills", "/skills-v2");
        let report = discover_services(dir.path()).unwrap();
        assert_eq!(report.services.len(), 1);
        assert_eq!(report.services[0].route_path, "/skills");
        assert!(report.skipped[0].reason.contains("duplicate"));
    }

    #[test]
    fn names_sharing_an_upstream_keep_the_first() {
        let dir = tempfile::tempdir().unwrap();
        write_service(dir.path(), "a", "user-notes", "/notes");
        write_service(dir.path(), "b", "user_notes", "/notes-v2");
        let report = discover_services(dir.path()).unwrap();
        assert_eq!(report.names(), vec!["user-notes"]);
        assert!(report.skipped[0].reason.contains("user_notes_service"));
    }

    #[test]
    fn routes_sharing_a_proxy_location_keep_the_first() {
        let dir = tempfile::tempdir().unwrap();
        write_service(dir.path(), "a", "skills", "/skills");
        write_service(dir.path(), "b", "skill-items", "/skills/{id}");
        write_service(dir.path(), "c", "tags", "/skills/tags");
        let report = discover_services(dir.path()).unwrap();
        assert_eq!(report.names(), vec!["skills", "tags"]);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("/api/skills"));
    }
}
