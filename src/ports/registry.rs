//! The port registry: a small JSON file mapping service name → assigned
//! port, alongside the catalog file by default. [`ensure_registry_port`] is
//! the only mutating entry point and must never run concurrently with
//! itself; the API layer's single-handler-at-a-time design guarantees that.

use std::collections::HashSet;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AppError, AppResult};

const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, Default)]
pub struct PortRegistry {
    pub services: IndexMap<String, u16>,
}

#[derive(Debug, Clone, Copy)]
struct PortNumber(u16);

impl Serialize for PortNumber {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u16(self.0)
    }
}

impl<'de> Deserialize<'de> for PortNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u64),
            Str(String),
        }
        let repr = Repr::deserialize(deserializer)?;
        let n = match repr {
            Repr::Num(n) => n,
            Repr::Str(s) => s.parse::<u64>().map_err(serde::de::Error::custom)?,
        };
        let port = u16::try_from(n).map_err(|_| serde::de::Error::custom("port out of range"))?;
        if port == 0 {
            return Err(serde::de::Error::custom("port out of range"));
        }
        Ok(PortNumber(port))
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct RegistryFile {
    version: u32,
    #[serde(default)]
    services: IndexMap<String, PortNumber>,
}

/// Reads the registry file. When `path` doesn't exist: if `create_if_missing`
/// is set, writes out an empty `{version:1, services:{}}` file before
/// returning it (so a fresh installation gets a real file on its first
/// `registry`-mode start); otherwise just returns an empty registry in
/// memory without touching disk.
pub fn read(path: &Path, create_if_missing: bool) -> AppResult<PortRegistry> {
    if !path.exists() {
        let empty = PortRegistry::default();
        if create_if_missing {
            write(path, &empty)?;
        }
        return Ok(empty);
    }
    let content = fs::read_to_string(path)?;
    let file: RegistryFile = serde_json::from_str(&content).map_err(|err| {
        AppError::Registry(format!("invalid port registry at {}: {err}", path.display()))
    })?;
    if file.version != REGISTRY_VERSION {
        return Err(AppError::Registry(format!(
            "unsupported port registry version {}",
            file.version
        )));
    }
    Ok(PortRegistry {
        services: file.services.into_iter().map(|(k, v)| (k, v.0)).collect(),
    })
}

fn write(path: &Path, registry: &PortRegistry) -> AppResult<()> {
    let file = RegistryFile {
        version: REGISTRY_VERSION,
        services: registry
            .services
            .iter()
            .map(|(k, v)| (k.clone(), PortNumber(*v)))
            .collect(),
    };
    let mut content = serde_json::to_string_pretty(&file)?;
    content.push('\n');

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|err| AppError::Io(err.error))?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct EnsureOptions {
    pub preferred_port: Option<u16>,
    pub base_port: Option<u16>,
    pub reserved: HashSet<u16>,
}

/// Binds a loopback TCP listener as an availability probe; the production
/// default passed to [`ensure_registry_port`].
pub fn tcp_probe(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

pub fn ensure_registry_port(path: &Path, name: &str, opts: &EnsureOptions) -> AppResult<u16> {
    ensure_registry_port_with_probe(path, name, opts, tcp_probe)
}

/// Same algorithm as [`ensure_registry_port`] with an injectable
/// availability probe, so callers (and tests) don't need real sockets.
pub fn ensure_registry_port_with_probe(
    path: &Path,
    name: &str,
    opts: &EnsureOptions,
    probe: impl Fn(u16) -> bool,
) -> AppResult<u16> {
    let mut registry = read(path, true)?;
    if let Some(&port) = registry.services.get(name) {
        return Ok(port);
    }

    let mut used: HashSet<u16> = registry.services.values().copied().collect();
    used.extend(&opts.reserved);

    let start = opts.preferred_port.or(opts.base_port).unwrap_or(3100);
    let mut candidate = start;
    let port = loop {
        if !used.contains(&candidate) && probe(candidate) {
            break candidate;
        }
        match candidate.checked_add(1) {
            Some(next) => candidate = next,
            None => {
                return Err(AppError::Registry(format!(
                    "no free port found for '{name}' starting at {start}"
                )));
            }
        }
    };

    registry.services.insert(name.to_string(), port);
    write(path, &registry)?;
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_first_free_port_above_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port-registry.json");
        let opts = EnsureOptions {
            preferred_port: Some(3000),
            base_port: None,
            reserved: HashSet::from([3000, 3001]),
        };
        let port = ensure_registry_port_with_probe(&path, "api", &opts, |p| p != 3002).unwrap();
        assert_eq!(port, 3003);

        let persisted = read(&path, false).unwrap();
        assert_eq!(persisted.services.get("api"), Some(&3003));
    }

    #[test]
    fn repeated_calls_are_idempotent_and_do_not_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port-registry.json");
        let opts = EnsureOptions {
            preferred_port: Some(3000),
            ..Default::default()
        };
        let first = ensure_registry_port_with_probe(&path, "api", &opts, |_| true).unwrap();
        let mtime_after_first = fs::metadata(&path).unwrap().modified().unwrap();

        let second = ensure_registry_port_with_probe(&path, "api", &opts, |_| true).unwrap();
        let mtime_after_second = fs::metadata(&path).unwrap().modified().unwrap();

        assert_eq!(first, second);
        assert_eq!(mtime_after_first, mtime_after_second);
    }

    #[test]
    fn fails_with_no_free_port_when_scan_exhausts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port-registry.json");
        let opts = EnsureOptions {
            preferred_port: Some(65535),
            ..Default::default()
        };
        assert!(ensure_registry_port_with_probe(&path, "api", &opts, |_| false).is_err());
    }

    #[test]
    fn missing_registry_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port-registry.json");
        let registry = read(&path, false).unwrap();
        assert!(registry.services.is_empty());
    }

    #[test]
    fn accepts_string_convertible_port_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port-registry.json");
        fs::write(&path, r#"{"version":1,"services":{"api":"3100"}}"#).unwrap();
        let registry = read(&path, false).unwrap();
        assert_eq!(registry.services.get("api"), Some(&3100));
    }

    #[test]
    fn missing_registry_without_create_if_missing_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port-registry.json");
        let registry = read(&path, false).unwrap();
        assert!(registry.services.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn missing_registry_with_create_if_missing_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port-registry.json");
        let registry = read(&path, true).unwrap();
        assert!(registry.services.is_empty());
        assert!(path.exists());

        let reread = read(&path, false).unwrap();
        assert!(reread.services.is_empty());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"version\": 1"));
    }
}
