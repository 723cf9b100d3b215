//! Dependency graph over a merged catalog: validation, transitive closures,
//! and a deps-first topological sort used to drive start/stop/restart order.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::catalog::Catalog;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Insertion-order-preserving list of every service name.
    names: Vec<String>,
    /// name -> declared dependencies, in their original declaration order.
    deps: IndexMap<String, Vec<String>>,
    /// name -> direct dependents, in catalog order.
    dependents: IndexMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Validates in priority order (missing targets, self-dependency,
    /// duplicate entries, cycles) and builds the closure/order indexes.
    pub fn build(catalog: &Catalog) -> AppResult<Self> {
        let names: Vec<String> = catalog.services.iter().map(|s| s.name.clone()).collect();
        let known: HashSet<&str> = names.iter().map(String::as_str).collect();

        for service in &catalog.services {
            for dep in &service.depends_on {
                if !known.contains(dep.as_str()) {
                    return Err(AppError::validation(format!(
                        "service '{}' depends on unknown service '{dep}'",
                        service.name
                    )));
                }
            }
        }
        for service in &catalog.services {
            if service.depends_on.iter().any(|d| d == &service.name) {
                return Err(AppError::validation(format!(
                    "service '{}' depends on itself",
                    service.name
                )));
            }
        }
        for service in &catalog.services {
            let mut seen = HashSet::new();
            for dep in &service.depends_on {
                if !seen.insert(dep) {
                    return Err(AppError::validation(format!(
                        "service '{}' lists dependency '{dep}' more than once",
                        service.name
                    )));
                }
            }
        }

        let mut deps = IndexMap::new();
        let mut dependents: IndexMap<String, Vec<String>> = IndexMap::new();
        for name in &names {
            dependents.entry(name.clone()).or_default();
        }
        for service in &catalog.services {
            deps.insert(service.name.clone(), service.depends_on.clone());
            for dep in &service.depends_on {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(service.name.clone());
            }
        }

        let graph = Self {
            names,
            deps,
            dependents,
        };
        graph.detect_cycle()?;
        Ok(graph)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The transitive closure of dependencies of `name`, including `name`
    /// itself. Membership only; use [`Self::topo_sort`] for ordering.
    pub fn collect_dependencies(&self, name: &str) -> Vec<String> {
        self.collect(name, |g, n| g.deps.get(n))
    }

    /// The transitive closure of dependents of `name`, including `name`
    /// itself.
    pub fn collect_dependents(&self, name: &str) -> Vec<String> {
        self.collect(name, |g, n| g.dependents.get(n))
    }

    fn collect<'a>(
        &'a self,
        name: &str,
        edges: impl Fn(&'a Self, &str) -> Option<&'a Vec<String>>,
    ) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut stack = vec![name.to_string()];
        let mut result = Vec::new();
        while let Some(n) = stack.pop() {
            if !visited.insert(n.clone()) {
                continue;
            }
            result.push(n.clone());
            if let Some(next) = edges(self, &n) {
                stack.extend(next.iter().cloned());
            }
        }
        result
    }

    /// Orders `subset` deps-first, breaking ties by the graph's own
    /// insertion order. `subset` need not be the full service list.
    pub fn topo_sort(&self, subset: &[String]) -> Vec<String> {
        let subset_set: HashSet<&str> = subset.iter().map(String::as_str).collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut order = Vec::new();

        for name in &self.names {
            if subset_set.contains(name.as_str()) {
                self.visit_deps_first(name, &subset_set, &mut visited, &mut order);
            }
        }
        order
    }

    fn visit_deps_first(
        &self,
        name: &str,
        subset: &HashSet<&str>,
        visited: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) {
        if visited.contains(name) {
            return;
        }
        visited.insert(name.to_string());
        if let Some(deps) = self.deps.get(name) {
            for dep in deps {
                if subset.contains(dep.as_str()) {
                    self.visit_deps_first(dep, subset, visited, order);
                }
            }
        }
        order.push(name.to_string());
    }

    fn detect_cycle(&self) -> AppResult<()> {
        let mut marks: HashMap<&str, CycleMark> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();

        for name in &self.names {
            self.visit_for_cycle(name, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn visit_for_cycle<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, CycleMark>,
        path: &mut Vec<&'a str>,
    ) -> AppResult<()> {
        match marks.get(name) {
            Some(CycleMark::Done) => return Ok(()),
            Some(CycleMark::InProgress) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].to_vec();
                cycle.push(name);
                return Err(AppError::validation(format!(
                    "dependency cycle: {}",
                    cycle.join(" -> ")
                )));
            }
            None => {}
        }
        marks.insert(name, CycleMark::InProgress);
        path.push(name);
        if let Some(deps) = self.deps.get(name) {
            for dep in deps {
                self.visit_for_cycle(dep.as_str(), marks, path)?;
            }
        }
        path.pop();
        marks.insert(name, CycleMark::Done);
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum CycleMark {
    InProgress,
    Done,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use indexmap::IndexMap as Map;

    use super::*;
    use crate::catalog::{PortMode, Service, Source};

    fn svc(name: &str, depends_on: &[&str]) -> Service {
        Service {
            name: name.into(),
            cwd: PathBuf::from("/tmp"),
            command: "echo hi".into(),
            env: Map::new(),
            port: None,
            port_mode: PortMode::Static,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            last_started_at: None,
            source: Source::Config,
            compose: None,
            raw: serde_json::Value::Null,
        }
    }

    fn chain_catalog() -> Catalog {
        // db <- api <- web
        Catalog {
            services: vec![svc("db", &[]), svc("api", &["db"]), svc("web", &["api"])],
            registered_projects: vec![],
        }
    }

    #[test]
    fn topo_sort_of_dependencies_is_deps_first() {
        let graph = DependencyGraph::build(&chain_catalog()).unwrap();
        let deps = graph.collect_dependencies("web");
        let order = graph.topo_sort(&deps);
        assert_eq!(order, vec!["db", "api", "web"]);
    }

    #[test]
    fn topo_sort_of_dependents_reversed_is_dependents_first() {
        let graph = DependencyGraph::build(&chain_catalog()).unwrap();
        let dependents = graph.collect_dependents("db");
        let mut order = graph.topo_sort(&dependents);
        order.reverse();
        assert_eq!(order, vec!["web", "api", "db"]);
    }

    #[test]
    fn rejects_missing_dependency_target() {
        let catalog = Catalog {
            services: vec![svc("web", &["ghost"])],
            registered_projects: vec![],
        };
        assert!(DependencyGraph::build(&catalog).is_err());
    }

    #[test]
    fn rejects_cycle() {
        let catalog = Catalog {
            services: vec![svc("a", &["b"]), svc("b", &["a"])],
            registered_projects: vec![],
        };
        let err = DependencyGraph::build(&catalog).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn insertion_order_breaks_ties_in_independent_subtrees() {
        // Two independent chains; "x" declared before "y" in the catalog.
        let catalog = Catalog {
            services: vec![svc("x", &[]), svc("y", &[]), svc("top", &["y", "x"])],
            registered_projects: vec![],
        };
        let graph = DependencyGraph::build(&catalog).unwrap();
        let order = graph.topo_sort(&graph.names().to_vec());
        assert_eq!(order, vec!["x", "y", "top"]);
    }
}
