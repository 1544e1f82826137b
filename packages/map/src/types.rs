// ABOUTME: Data model for container assignments, volume bindings and host locations
// ABOUTME: Plain serde-derived types; all behavior lives on ContainerMap

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A volume alias paired with the read-write flag the owning container
/// requests for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBinding {
    pub alias: String,
    #[serde(default)]
    pub read_write: bool,
}

impl VolumeBinding {
    pub fn read_only(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            read_write: false,
        }
    }

    pub fn read_write(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            read_write: true,
        }
    }
}

/// A link from one container to another, exposed to the dependent
/// container under `alias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLink {
    pub container: String,
    pub alias: String,
}

impl ContainerLink {
    pub fn new(container: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            alias: alias.into(),
        }
    }
}

/// Host-side location of a bound volume. A single path applies to every
/// instance; a per-instance table only yields a path for instances it
/// explicitly lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostLocation {
    Shared(String),
    PerInstance(BTreeMap<String, String>),
}

impl HostLocation {
    /// Resolve the host path for one instance. `None` means no bind is
    /// emitted for this instance.
    pub fn for_instance(&self, instance: Option<&str>) -> Option<&str> {
        match self {
            HostLocation::Shared(path) => Some(path),
            HostLocation::PerInstance(paths) => {
                instance.and_then(|i| paths.get(i)).map(String::as_str)
            }
        }
    }
}

/// Declarative description of one logical container: which image it runs,
/// how many named instances it has, and how it relates to volumes and to
/// other containers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerAssignment {
    /// Image reference; defaults to the container name when unset.
    #[serde(default)]
    pub image: Option<String>,
    /// Named instances. Empty means a single default instance.
    #[serde(default)]
    pub instances: Vec<String>,
    /// Container paths this assignment shares as volumes.
    #[serde(default)]
    pub shares: Vec<String>,
    /// Volume aliases bound from the host, with read-write flags.
    #[serde(default)]
    pub binds: Vec<VolumeBinding>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// File permission spec applied to attached volumes (chmod format).
    #[serde(default)]
    pub permissions: Option<String>,
    /// Containers this assignment links to, with the alias each link is
    /// exposed under.
    #[serde(default)]
    pub links_to: Vec<ContainerLink>,
    /// Aliases whose shared volumes this container mounts read-through.
    #[serde(default)]
    pub uses: Vec<String>,
    /// Aliases this container owns; an attached volume container is
    /// created per alias.
    #[serde(default)]
    pub attaches: Vec<String>,
}

impl ContainerAssignment {
    /// The image to run, falling back to the container's own name.
    pub fn image_or<'a>(&'a self, container: &'a str) -> &'a str {
        self.image.as_deref().unwrap_or(container)
    }

    /// Names this assignment references in other containers: `uses`,
    /// then `attaches`, then `links_to`, in declaration order.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.uses
            .iter()
            .map(String::as_str)
            .chain(self.attaches.iter().map(String::as_str))
            .chain(self.links_to.iter().map(|l| l.container.as_str()))
    }
}
