//! On-disk JSON catalog: the `version`/`services`/`registeredProjects`
//! config file that backs [`super::Catalog`]. Compose-sourced services never
//! round-trip through here; see [`super::compose`] and [`super::builder`].

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{CATALOG_VERSION, Catalog, PortMode, Project, Service, Source};
use crate::error::{AppError, AppResult};

/// Config-file shape of a service: no `source`/`compose`/`raw`, since every
/// entry on disk is config-sourced by definition.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ServiceFile {
    name: String,
    cwd: PathBuf,
    command: String,
    #[serde(default)]
    env: IndexMap<String, String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    port_mode: PortMode,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    last_started_at: Option<String>,
}

impl From<&Service> for ServiceFile {
    fn from(s: &Service) -> Self {
        Self {
            name: s.name.clone(),
            cwd: s.cwd.clone(),
            command: s.command.clone(),
            env: s.env.clone(),
            port: s.port,
            port_mode: s.port_mode,
            depends_on: s.depends_on.clone(),
            last_started_at: s.last_started_at.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct CatalogFile {
    version: u32,
    #[serde(default)]
    services: Vec<ServiceFile>,
    #[serde(default, rename = "registeredProjects")]
    registered_projects: Vec<Project>,
}

/// Returns an empty, valid catalog when `path` doesn't exist.
pub fn read(path: &Path) -> AppResult<Catalog> {
    if !path.exists() {
        return Ok(Catalog::default());
    }

    let content = fs::read_to_string(path)?;

    let file: CatalogFile = {
        let de = &mut serde_json::Deserializer::from_str(&content);
        serde_path_to_error::deserialize(de).map_err(|err| {
            AppError::validation(format!("invalid catalog at {}: {err}", path.display()))
        })?
    };

    // Parsed a second time, untyped, purely to keep each service's original
    // JSON around for read-only display (the typed pass above already
    // guarantees the shape is sound).
    let raw_services: Vec<serde_json::Value> = serde_json::from_str::<serde_json::Value>(&content)
        .ok()
        .and_then(|v| v.get("services").cloned())
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default();

    let services = file
        .services
        .into_iter()
        .enumerate()
        .map(|(i, sf)| Service {
            name: sf.name,
            cwd: sf.cwd,
            command: sf.command,
            env: sf.env,
            port: sf.port,
            port_mode: sf.port_mode,
            depends_on: sf.depends_on,
            last_started_at: sf.last_started_at,
            source: Source::Config,
            compose: None,
            raw: raw_services
                .get(i)
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        })
        .collect();

    let catalog = Catalog {
        services,
        registered_projects: file.registered_projects,
    };
    catalog.validate()?;
    Ok(catalog)
}

/// Validates, serializes (pretty, trailing newline) and atomically replaces
/// `path`. Compose-managed services are never persisted back to disk.
pub fn write(path: &Path, catalog: &Catalog) -> AppResult<()> {
    catalog.validate()?;

    let services: Vec<ServiceFile> = catalog
        .services
        .iter()
        .filter(|s| !s.is_compose_managed())
        .map(ServiceFile::from)
        .collect();

    let file = CatalogFile {
        version: CATALOG_VERSION,
        services,
        registered_projects: catalog.registered_projects.clone(),
    };

    let mut content = serde_json::to_string_pretty(&file)?;
    content.push('\n');

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path)
        .map_err(|err| AppError::Io(err.error))?;
    Ok(())
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
            port: Some(3000),
            port_mode: PortMode::Static,
            depends_on: vec![],
            last_started_at: None,
            source: Source::Config,
            compose: None,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn read_missing_file_is_empty_and_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devservers.json");
        let catalog = read(&path).unwrap();
        assert!(catalog.services.is_empty());
        assert!(catalog.registered_projects.is_empty());
    }

    #[test]
    fn write_then_read_round_trips_config_services() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devservers.json");

        let mut web = svc("web");
        web.depends_on = vec!["api".into()];
        let api = svc("api");
        let catalog = Catalog::default().upsert_service(api).upsert_service(web);

        write(&path, &catalog).unwrap();
        let reread = read(&path).unwrap();

        assert_eq!(reread.services.len(), 2);
        let web2 = reread.find("web").unwrap();
        assert_eq!(web2.depends_on, vec!["api".to_string()]);
        assert_eq!(web2.command, "echo hi");
        assert_eq!(web2.port, Some(3000));
    }

    #[test]
    fn write_drops_compose_managed_services() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devservers.json");

        let mut composed = svc("proj_web");
        composed.source = Source::Compose;
        let catalog = Catalog::default().upsert_service(composed);

        write(&path, &catalog).unwrap();
        let reread = read(&path).unwrap();
        assert!(reread.services.is_empty());
    }

    #[test]
    fn rejects_unknown_service_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devservers.json");
        fs::write(
            &path,
            r#"{"version":1,"services":[{"name":"web","cwd":"/tmp","command":"x","bogus":true}]}"#,
        )
        .unwrap();
        assert!(read(&path).is_err());
    }

    #[test]
    fn rejects_duplicate_service_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devservers.json");
        fs::write(
            &path,
            r#"{"version":1,"services":[
                {"name":"web","cwd":"/tmp","command":"x"},
                {"name":"web","cwd":"/tmp","command":"y"}
            ]}"#,
        )
        .unwrap();
        assert!(read(&path).is_err());
    }

    #[test]
    fn ignores_unknown_top_level_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devservers.json");
        fs::write(&path, r#"{"version":1,"services":[],"extra":"ignored"}"#).unwrap();
        assert!(read(&path).is_ok());
    }
}
