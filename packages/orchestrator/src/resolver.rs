// ABOUTME: Dependency resolver computing ordered chains over container relations
// ABOUTME: Forward graph orders create/start; the inverse graph orders stop

use std::collections::{BTreeMap, HashSet};

use stevedore_map::ContainerMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Cyclic dependency detected at container '{0}'")]
    CyclicDependency(String),
}

type Result<T> = std::result::Result<T, ResolverError>;

/// Resolves transitive dependency chains between container assignments.
///
/// Edges are derived from each assignment's `uses`, `attaches` and
/// `links_to` fields, in declaration order, keeping only names that are
/// containers in the map. `update` builds the forward graph (what must
/// exist before me); `update_backward` the inverse (who depends on me).
#[derive(Debug, Default)]
pub struct DependencyResolver {
    edges: BTreeMap<String, Vec<String>>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild with forward edges from `map`.
    pub fn update(&mut self, map: &ContainerMap) {
        self.edges.clear();
        for (name, assignment) in map.assignments() {
            let entry = self.edges.entry(name.to_string()).or_default();
            for reference in assignment.references() {
                if reference != name
                    && map.contains(reference)
                    && !entry.iter().any(|e| e == reference)
                {
                    entry.push(reference.to_string());
                }
            }
        }
    }

    /// Rebuild with inverse edges from `map`: an edge from B to A for
    /// every A that references B.
    pub fn update_backward(&mut self, map: &ContainerMap) {
        self.edges.clear();
        for (name, assignment) in map.assignments() {
            for reference in assignment.references() {
                if reference != name && map.contains(reference) {
                    let entry = self.edges.entry(reference.to_string()).or_default();
                    if !entry.iter().any(|e| e == name) {
                        entry.push(name.to_string());
                    }
                }
            }
        }
    }

    /// Ordered transitive dependencies of `container`, excluding the
    /// container itself. Prerequisites come before the containers that
    /// depend on them, the nearest dependency last; acting on the
    /// sequence front-to-back therefore handles the farthest
    /// prerequisite first. Each dependency appears exactly once.
    pub fn get_dependencies(&self, container: &str) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        self.visit(container, &mut visited, &mut path, &mut order)?;
        // The traversal root is not its own dependency.
        order.pop();
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if path.iter().any(|p| p == name) {
            return Err(ResolverError::CyclicDependency(name.to_string()));
        }
        if visited.contains(name) {
            return Ok(());
        }
        path.push(name.to_string());
        if let Some(dependencies) = self.edges.get(name) {
            for dependency in dependencies {
                self.visit(dependency, visited, path, order)?;
            }
        }
        path.pop();
        visited.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }
}
