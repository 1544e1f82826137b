// ABOUTME: Container map holding assignments, volume paths and host locations
// ABOUTME: Provides lookups and the deterministic instance naming convention

pub mod types;

pub use types::{ContainerAssignment, ContainerLink, HostLocation, VolumeBinding};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MapError {
    #[error("No assignment found for container '{0}'")]
    UnknownContainer(String),

    #[error("No path found for volume '{0}'")]
    UnknownVolume(String),
}

type Result<T> = std::result::Result<T, MapError>;

/// Immutable view of a deployment: container assignments keyed by name,
/// plus the volume-path and host-location tables their aliases resolve
/// through.
///
/// Ordered maps keep every derived ordering (dependency graphs, start
/// sequences) deterministic across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerMap {
    #[serde(default)]
    containers: BTreeMap<String, ContainerAssignment>,
    /// Volume alias -> path inside the container.
    #[serde(default)]
    volumes: BTreeMap<String, String>,
    /// Volume alias -> host path (single or per-instance).
    #[serde(default)]
    host: BTreeMap<String, HostLocation>,
}

impl ContainerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a container assignment.
    pub fn insert_assignment(
        &mut self,
        container: impl Into<String>,
        assignment: ContainerAssignment,
    ) -> &mut Self {
        self.containers.insert(container.into(), assignment);
        self
    }

    /// Record the container path a volume alias resolves to.
    pub fn set_volume(&mut self, alias: impl Into<String>, path: impl Into<String>) -> &mut Self {
        self.volumes.insert(alias.into(), path.into());
        self
    }

    /// Record the host-side location of a bound volume alias.
    pub fn set_host(&mut self, alias: impl Into<String>, location: HostLocation) -> &mut Self {
        self.host.insert(alias.into(), location);
        self
    }

    /// Look up an assignment, failing on unknown container names.
    pub fn get_existing(&self, container: &str) -> Result<&ContainerAssignment> {
        self.containers
            .get(container)
            .ok_or_else(|| MapError::UnknownContainer(container.to_string()))
    }

    pub fn contains(&self, container: &str) -> bool {
        self.containers.contains_key(container)
    }

    /// All assignments in name order.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, &ContainerAssignment)> {
        self.containers.iter().map(|(n, a)| (n.as_str(), a))
    }

    /// Physical name of one instance. Pure: the same (container, instance)
    /// pair always maps to the same string. The default instance keeps the
    /// bare container name; named instances append `.instance`.
    pub fn cname(&self, container: &str, instance: Option<&str>) -> String {
        match instance {
            Some(instance) => format!("{}.{}", container, instance),
            None => container.to_string(),
        }
    }

    /// Container path a volume alias resolves to, failing on unknown
    /// aliases.
    pub fn volume_path(&self, alias: &str) -> Result<&str> {
        self.volumes
            .get(alias)
            .map(String::as_str)
            .ok_or_else(|| MapError::UnknownVolume(alias.to_string()))
    }

    /// Host-side location of a bound alias, if one is declared.
    pub fn host_location(&self, alias: &str) -> Option<&HostLocation> {
        self.host.get(alias)
    }
}

/// Expand a user spec to the `user:group` form chown expects. A spec that
/// already names a group passes through unchanged.
pub fn user_group(user: &str) -> String {
    if user.contains(':') {
        user.to_string()
    } else {
        format!("{}:{}", user, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_map() -> ContainerMap {
        let mut map = ContainerMap::new();
        map.insert_assignment(
            "db",
            ContainerAssignment {
                attaches: vec!["data".to_string()],
                ..Default::default()
            },
        );
        map.set_volume("data", "/var/lib/data");
        map
    }

    #[test]
    fn get_existing_fails_on_unknown_container() {
        let map = sample_map();
        assert!(map.get_existing("db").is_ok());
        assert_eq!(
            map.get_existing("ghost"),
            Err(MapError::UnknownContainer("ghost".to_string()))
        );
    }

    #[test]
    fn cname_is_referentially_consistent() {
        let map = sample_map();
        assert_eq!(map.cname("db", None), "db");
        assert_eq!(map.cname("db", Some("primary")), "db.primary");
        // Repeated calls with identical inputs return an identical string.
        assert_eq!(
            map.cname("web", Some("a")),
            map.cname("web", Some("a"))
        );
    }

    #[test]
    fn volume_path_fails_on_unknown_alias() {
        let map = sample_map();
        assert_eq!(map.volume_path("data"), Ok("/var/lib/data"));
        assert_eq!(
            map.volume_path("ghost"),
            Err(MapError::UnknownVolume("ghost".to_string()))
        );
    }

    #[test]
    fn user_group_expands_bare_users() {
        assert_eq!(user_group("postgres"), "postgres:postgres");
        assert_eq!(user_group("www-data:www-data"), "www-data:www-data");
        assert_eq!(user_group("1000:1000"), "1000:1000");
    }

    #[test]
    fn map_round_trips_through_serde() {
        let mut map = sample_map();
        map.set_host("data", HostLocation::Shared("/srv/data".to_string()));

        let json = serde_json::to_string(&map).unwrap();
        let restored: ContainerMap = serde_json::from_str(&json).unwrap();
        assert!(restored.contains("db"));
        assert_eq!(restored.volume_path("data"), Ok("/var/lib/data"));
        assert_eq!(
            restored.host_location("data"),
            Some(&HostLocation::Shared("/srv/data".to_string()))
        );
    }
}
