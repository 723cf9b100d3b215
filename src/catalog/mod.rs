//! The merged service catalog: data model, validation, and the pure
//! upsert/remove helpers used by the [`store`] and exposed to the API
//! surface. This module owns no I/O; see [`store`] for the JSON file and
//! [`compose`] for the per-project YAML files that get merged in by
//! [`builder`].

pub mod builder;
pub mod compose;
pub mod store;

use std::collections::HashSet;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const CATALOG_VERSION: u32 = 1;

/// Every name in the system (service, project) is drawn from this charset.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PortMode {
    #[default]
    Static,
    Detect,
    Registry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    Config,
    Compose,
}

/// Extra attributes only compose-sourced services carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ComposeOrigin {
    pub project_name: String,
    pub monorepo: bool,
    pub compose_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub cwd: PathBuf,
    pub command: String,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub port_mode: PortMode,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub last_started_at: Option<String>,
    pub source: Source,
    #[serde(default)]
    pub compose: Option<ComposeOrigin>,
    /// The untouched source definition, for read-only display via
    /// `/services/:name/config`.
    #[serde(default, skip_serializing)]
    pub raw: serde_json::Value,
}

impl Service {
    pub fn is_compose_managed(&self) -> bool {
        self.source == Source::Compose
    }

    /// Structural validation that does not require knowledge of the rest of
    /// the catalog (name existence, cycles — that's [`crate::graph`]'s job).
    pub fn validate(&self) -> AppResult<()> {
        if !is_valid_name(&self.name) {
            return Err(AppError::validation(format!(
                "invalid service name: '{}'",
                self.name
            )));
        }
        if let Some(port) = self.port {
            if port == 0 {
                return Err(AppError::validation(format!(
                    "service '{}' has an out-of-range port: {port}",
                    self.name
                )));
            }
        }
        let mut seen = HashSet::new();
        for dep in &self.depends_on {
            if dep == &self.name {
                return Err(AppError::validation(format!(
                    "service '{}' depends on itself",
                    self.name
                )));
            }
            if !seen.insert(dep) {
                return Err(AppError::validation(format!(
                    "service '{}' lists dependency '{dep}' more than once",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub monorepo: bool,
}

impl Project {
    pub fn validate(&self) -> AppResult<()> {
        if !is_valid_name(&self.name) {
            return Err(AppError::validation(format!(
                "invalid project name: '{}'",
                self.name
            )));
        }
        if !self.path.is_absolute() {
            return Err(AppError::validation(format!(
                "project '{}' path must be absolute",
                self.name
            )));
        }
        Ok(())
    }
}

/// The merged, validated service + project list. Built fresh for every
/// request by [`builder::build_snapshot`]; never cached across requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub services: Vec<Service>,
    pub registered_projects: Vec<Project>,
}

impl Catalog {
    pub fn find(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn find_project(&self, name: &str) -> Option<&Project> {
        self.registered_projects.iter().find(|p| p.name == name)
    }

    /// Schema-level validation: per-service/per-project structural checks
    /// plus catalog-wide name uniqueness. Existence-of-dependency-target and
    /// cycle checks live in [`crate::graph`].
    pub fn validate(&self) -> AppResult<()> {
        let mut names = HashSet::new();
        for service in &self.services {
            service.validate()?;
            if !names.insert(service.name.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate service name: '{}'",
                    service.name
                )));
            }
        }
        let mut project_names = HashSet::new();
        for project in &self.registered_projects {
            project.validate()?;
            if !project_names.insert(project.name.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate project name: '{}'",
                    project.name
                )));
            }
        }
        Ok(())
    }

    /// Pure upsert: preserves the previous `lastStartedAt` when the
    /// replacement doesn't specify one.
    pub fn upsert_service(mut self, mut service: Service) -> Self {
        if service.last_started_at.is_none() {
            if let Some(existing) = self.find(&service.name) {
                service.last_started_at = existing.last_started_at.clone();
            }
        }
        self.services.retain(|s| s.name != service.name);
        self.services.push(service);
        self
    }

    pub fn remove_service(mut self, name: &str) -> Self {
        self.services.retain(|s| s.name != name);
        self
    }

    pub fn upsert_project(mut self, project: Project) -> Self {
        self.registered_projects
            .retain(|p| p.name != project.name);
        self.registered_projects.push(project);
        self
    }

    pub fn remove_project(mut self, name: &str) -> Self {
        self.registered_projects.retain(|p| p.name != name);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(name: &str) -> Service {
        Service {
            name: name.into(),
            cwd: PathBuf::from("/tmp"),
            command: "echo hi".into(),
            env: IndexMap::new(),
            port: None,
            port_mode: PortMode::Static,
            depends_on: vec![],
            last_started_at: None,
            source: Source::Config,
            compose: None,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn rejects_name_with_whitespace_or_slash() {
        assert!(svc("has space").validate().is_err());
        assert!(svc("has/slash").validate().is_err());
        assert!(svc("fine-name.1_2").validate().is_ok());
    }

    #[test]
    fn empty_services_is_valid() {
        let catalog = Catalog::default();
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn upsert_preserves_last_started_at_when_absent() {
        let mut existing = svc("web");
        existing.last_started_at = Some("2024-01-01T00:00:00Z".into());
        let catalog = Catalog::default().upsert_service(existing);

        let mut replacement = svc("web");
        replacement.command = "npm run dev".into();
        let catalog = catalog.upsert_service(replacement);

        assert_eq!(
            catalog.find("web").unwrap().last_started_at.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn upsert_overwrites_last_started_at_when_present() {
        let mut existing = svc("web");
        existing.last_started_at = Some("2024-01-01T00:00:00Z".into());
        let catalog = Catalog::default().upsert_service(existing);

        let mut replacement = svc("web");
        replacement.last_started_at = Some("2025-01-01T00:00:00Z".into());
        let catalog = catalog.upsert_service(replacement);

        assert_eq!(
            catalog.find("web").unwrap().last_started_at.as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
    }

    #[test]
    fn rejects_duplicate_names_in_catalog() {
        let catalog = Catalog {
            services: vec![svc("web"), svc("web")],
            registered_projects: vec![],
        };
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn rejects_self_dependency() {
        let mut s = svc("web");
        s.depends_on = vec!["web".into()];
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_dependency_entries() {
        let mut s = svc("web");
        s.depends_on = vec!["api".into(), "api".into()];
        assert!(s.validate().is_err());
    }
}
