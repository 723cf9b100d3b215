//! Per-project `devservers-compose.yml` loader: parses compose-managed
//! services, rewrites their names/dependencies/port-template references into
//! the project-prefixed namespace, and watches each project root for edits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::sync::RwLock;
use std::time::Duration;

use indexmap::IndexMap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde_yaml::{Mapping, Value};

use super::{ComposeOrigin, PortMode, Project, Service, Source};

const COMPOSE_FILE_NAME: &str = "devservers-compose.yml";
const DEBOUNCE: Duration = Duration::from_millis(120);

/// Watches a set of project roots for `devservers-compose.yml` and keeps a
/// reconciled, rewritten list of compose-managed services for each.
pub struct ComposeLoader {
    watches: HashMap<String, Watch>,
}

struct Watch {
    root: PathBuf,
    services: Arc<RwLock<Vec<Service>>>,
    _watcher: RecommendedWatcher,
}

impl ComposeLoader {
    pub fn new() -> Self {
        Self {
            watches: HashMap::new(),
        }
    }

    /// Reconciles watched projects against `projects`: drops watchers for
    /// projects no longer present or whose root moved, adds watchers for new
    /// ones, and performs an immediate synchronous parse for each.
    pub fn sync(&mut self, projects: &[Project]) {
        let wanted: HashMap<&str, &Project> =
            projects.iter().map(|p| (p.name.as_str(), p)).collect();

        self.watches
            .retain(|name, watch| match wanted.get(name.as_str()) {
                Some(p) => p.path == watch.root,
                None => false,
            });

        for project in projects {
            if self.watches.contains_key(&project.name) {
                continue;
            }
            let services = Arc::new(RwLock::new(Vec::new()));
            reload(&project.name, &project.path, project.monorepo, &services);

            match spawn_watcher(
                project.name.clone(),
                project.path.clone(),
                project.monorepo,
                services.clone(),
            ) {
                Ok(watcher) => {
                    self.watches.insert(
                        project.name.clone(),
                        Watch {
                            root: project.path.clone(),
                            services,
                            _watcher: watcher,
                        },
                    );
                }
                Err(err) => {
                    tracing::error!(project = %project.name, error = %err, "failed to watch project root for compose changes");
                }
            }
        }
    }

    /// The flattened, current set of compose-managed services across every
    /// watched project.
    pub fn services(&self) -> Vec<Service> {
        self.watches
            .values()
            .flat_map(|w| w.services.read().unwrap().clone())
            .collect()
    }
}

impl Default for ComposeLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn reload(project_name: &str, project_root: &Path, monorepo: bool, slot: &RwLock<Vec<Service>>) {
    let path = project_root.join(COMPOSE_FILE_NAME);
    if !path.exists() {
        *slot.write().unwrap() = Vec::new();
        return;
    }
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            match parse_compose_yaml(&content, project_name, project_root, &path, monorepo) {
                Ok(services) => *slot.write().unwrap() = services,
                Err(err) => {
                    tracing::error!(project = %project_name, error = %err, "failed to parse compose file");
                    *slot.write().unwrap() = Vec::new();
                }
            }
        }
        Err(err) => {
            tracing::error!(project = %project_name, error = %err, "failed to read compose file");
            *slot.write().unwrap() = Vec::new();
        }
    }
}

/// Spawns a dedicated watcher thread for one project root. Events within a
/// `DEBOUNCE` window are coalesced into a single reload.
fn spawn_watcher(
    project_name: String,
    root: PathBuf,
    monorepo: bool,
    slot: Arc<RwLock<Vec<Service>>>,
) -> notify::Result<RecommendedWatcher> {
    let (tx, rx) = channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(&root, RecursiveMode::NonRecursive)?;

    let watch_root = root.clone();
    std::thread::spawn(move || {
        let relevant = |event: &Event| {
            event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n == COMPOSE_FILE_NAME).unwrap_or(false))
        };
        loop {
            let Ok(first) = rx.recv() else { break };
            if !matches!(&first, Ok(ev) if relevant(ev)) {
                continue;
            }
            // Drain anything else that arrives within the debounce window so
            // a burst of writes causes one reload, not several.
            while let Ok(next) = rx.recv_timeout(DEBOUNCE) {
                if matches!(&next, Ok(ev) if relevant(ev)) {
                    continue;
                }
            }
            reload(&project_name, &watch_root, monorepo, &slot);
        }
    });

    Ok(watcher)
}

/// Pure parse + rewrite, usable without touching the filesystem.
pub fn parse_compose_yaml(
    content: &str,
    project_name: &str,
    project_root: &Path,
    compose_path: &Path,
    monorepo: bool,
) -> Result<Vec<Service>, serde_yaml::Error> {
    let doc: Value = serde_yaml::from_str(content)?;
    let services_map = doc
        .get("services")
        .and_then(Value::as_mapping)
        .cloned()
        .unwrap_or_default();

    let local_names: Vec<String> = services_map
        .keys()
        .filter_map(|k| k.as_str().map(str::to_string))
        .collect();

    let mut services = Vec::with_capacity(services_map.len());
    for (key, value) in services_map.iter() {
        let Some(local_name) = key.as_str() else {
            continue;
        };
        let Some(fields) = value.as_mapping() else {
            continue;
        };
        let prefixed_name = format!("{project_name}_{local_name}");

        let command = parse_command(fields);
        let cwd = parse_cwd(fields, project_root);
        let depends_on = parse_depends_on(fields, project_name, local_name, &local_names);
        let env = parse_env(fields, project_name, &local_names);
        let port = fields
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|n| u16::try_from(n).ok());
        let port_mode = get_any(fields, &["portMode", "port_mode", "port-mode"])
            .and_then(|v| serde_yaml::from_value::<PortMode>(v.clone()).ok())
            .unwrap_or_default();

        services.push(Service {
            name: prefixed_name,
            cwd,
            command,
            env,
            port,
            port_mode,
            depends_on,
            last_started_at: None,
            source: Source::Compose,
            compose: Some(ComposeOrigin {
                project_name: project_name.to_string(),
                monorepo,
                compose_path: compose_path.to_path_buf(),
            }),
            raw: serde_json::to_value(yaml_to_json(value)).unwrap_or(serde_json::Value::Null),
        });
    }

    Ok(services)
}

fn get_any<'a>(map: &'a Mapping, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k))
}

fn parse_command(fields: &Mapping) -> String {
    match fields.get("command") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Sequence(tokens)) => tokens
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

fn parse_cwd(fields: &Mapping, project_root: &Path) -> PathBuf {
    match get_any(fields, &["cwd", "working_dir", "working-dir"]).and_then(Value::as_str) {
        Some(raw) => {
            let p = PathBuf::from(raw);
            if p.is_absolute() {
                p
            } else {
                project_root.join(p)
            }
        }
        None => project_root.to_path_buf(),
    }
}

fn parse_depends_on(
    fields: &Mapping,
    project_name: &str,
    local_service_name: &str,
    local_names: &[String],
) -> Vec<String> {
    let rewrite = |name: &str| -> String {
        if local_names.iter().any(|n| n == name) {
            format!("{project_name}_{name}")
        } else {
            tracing::warn!(
                project = %project_name,
                service = %local_service_name,
                dependency = %name,
                "dependency does not refer to a service defined in this compose file; leaving it literal"
            );
            name.to_string()
        }
    };

    match get_any(fields, &["dependsOn", "depends_on", "depends-on"]) {
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(rewrite)
            .collect(),
        Some(Value::Mapping(map)) => map
            .keys()
            .filter_map(Value::as_str)
            .map(rewrite)
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_env(
    fields: &Mapping,
    project_name: &str,
    local_names: &[String],
) -> IndexMap<String, String> {
    let mut env = IndexMap::new();
    match get_any(fields, &["env", "environment"]) {
        Some(Value::Mapping(map)) => {
            for (k, v) in map.iter() {
                let Some(key) = k.as_str() else { continue };
                let value = value_to_string(v);
                env.insert(key.to_string(), rewrite_port_templates(&value, project_name, local_names));
            }
        }
        Some(Value::Sequence(items)) => {
            for item in items {
                let Some(line) = item.as_str() else { continue };
                if let Some((k, v)) = line.split_once('=') {
                    env.insert(
                        k.to_string(),
                        rewrite_port_templates(v, project_name, local_names),
                    );
                }
            }
        }
        _ => {}
    }
    env
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Rewrites `${PORT:<localName>}` to `${PORT:<projectName>_<localName>}`
/// when `<localName>` refers to a service defined in this same file.
fn rewrite_port_templates(value: &str, project_name: &str, local_names: &[String]) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${PORT:") {
        out.push_str(&rest[..start]);
        let after = &rest[start + "${PORT:".len()..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = &after[..end];
        if local_names.iter().any(|n| n == name) {
            out.push_str(&format!("${{PORT:{project_name}_{name}}}"));
        } else {
            out.push_str(&format!("${{PORT:{name}}}"));
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn yaml_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            } else {
                serde_json::Value::Null
            }
        }
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Sequence(seq) => serde_json::Value::Array(seq.iter().map(yaml_to_json).collect()),
        Value::Mapping(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map.iter() {
                if let Some(key) = k.as_str() {
                    obj.insert(key.to_string(), yaml_to_json(v));
                }
            }
            serde_json::Value::Object(obj)
        }
        Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
services:
  web:
    command: ["npm", "run", "dev"]
    dependsOn: [api]
    env:
      API_URL: "http://localhost:${PORT:api}"
    port_mode: detect
  api:
    command: npm start
    working_dir: server
    environment:
      - "PORT=3000"
"#;

    #[test]
    fn parses_and_rewrites_names_and_ports() {
        let services = parse_compose_yaml(
            YAML,
            "proj",
            Path::new("/work/proj"),
            Path::new("/work/proj/devservers-compose.yml"),
            true,
        )
        .unwrap();
        assert_eq!(services.len(), 2);

        let web = services.iter().find(|s| s.name == "proj_web").unwrap();
        assert_eq!(web.command, "npm run dev");
        assert_eq!(web.depends_on, vec!["proj_api".to_string()]);
        assert_eq!(
            web.env.get("API_URL").unwrap(),
            "http://localhost:${PORT:proj_api}"
        );
        assert_eq!(web.port_mode, PortMode::Detect);
        assert!(web.is_compose_managed());
        assert!(web.compose.as_ref().unwrap().monorepo);

        let api = services.iter().find(|s| s.name == "proj_api").unwrap();
        assert_eq!(api.cwd, PathBuf::from("/work/proj/server"));
        assert_eq!(api.env.get("PORT").unwrap(), "3000");
    }

    #[test]
    fn monorepo_flag_is_derived_from_the_project_not_hardcoded() {
        let services = parse_compose_yaml(
            YAML,
            "proj",
            Path::new("/work/proj"),
            Path::new("/work/proj/devservers-compose.yml"),
            false,
        )
        .unwrap();
        assert!(services.iter().all(|s| !s.compose.as_ref().unwrap().monorepo));
    }

    #[test]
    fn leaves_unknown_local_references_literal() {
        let yaml = r#"
services:
  web:
    command: echo hi
    dependsOn: [somewhere_else]
"#;
        let services = parse_compose_yaml(
            yaml,
            "proj",
            Path::new("/work/proj"),
            Path::new("/work/proj/devservers-compose.yml"),
            true,
        )
        .unwrap();
        let web = services.iter().find(|s| s.name == "proj_web").unwrap();
        assert_eq!(web.depends_on, vec!["somewhere_else".to_string()]);
    }

    #[test]
    fn command_list_is_joined_with_single_spaces() {
        let yaml = r#"
services:
  a:
    command: [go, run, ., --flag]
"#;
        let services = parse_compose_yaml(
            yaml,
            "p",
            Path::new("/r"),
            Path::new("/r/devservers-compose.yml"),
            true,
        )
        .unwrap();
        assert_eq!(services[0].command, "go run . --flag");
    }

    #[test]
    fn invalid_yaml_is_an_error_not_a_panic() {
        let err = parse_compose_yaml(
            "services: [",
            "p",
            Path::new("/r"),
            Path::new("/r/devservers-compose.yml"),
            true,
        );
        assert!(err.is_err());
    }
}
