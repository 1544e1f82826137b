// ABOUTME: Orchestration engine driving dependency-ordered container lifecycle operations
// ABOUTME: Composes the map, resolver and name cache over a RuntimeClient collaborator

use std::collections::BTreeMap;
use std::sync::Arc;

use stevedore_map::{user_group, ContainerAssignment, ContainerMap, MapError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::NameCache;
use crate::resolver::{DependencyResolver, ResolverError};
use crate::runtime::{CreateRequest, HostBind, RuntimeClient, RuntimeError, StartOptions, StopOptions};

/// Minimal image used to own attached volumes.
pub const DEFAULT_BASEIMAGE: &str = "tianon/true";
/// Image with coreutils, used by disposable permission-adjustment helpers.
pub const DEFAULT_COREIMAGE: &str = "busybox:latest";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Map error: {0}")]
    Map(#[from] MapError),

    #[error("Dependency error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Options for [`OrchestrationEngine::create`]. The `volumes`, `user` and
/// `environment` overrides apply to the target container only; dependency
/// containers are always created with their own assignment defaults.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub instances: Option<Vec<String>>,
    pub autocreate_dependencies: bool,
    pub autocreate_attached: bool,
    pub baseimage: String,
    pub coreimage: String,
    pub volumes: Vec<String>,
    pub user: Option<String>,
    pub environment: Option<BTreeMap<String, String>>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            instances: None,
            autocreate_dependencies: true,
            autocreate_attached: true,
            baseimage: DEFAULT_BASEIMAGE.to_string(),
            coreimage: DEFAULT_COREIMAGE.to_string(),
            volumes: Vec::new(),
            user: None,
            environment: None,
        }
    }
}

/// Options for [`OrchestrationEngine::start`]. Explicit `binds` win over
/// alias-derived binds on host-path collision; `volumes_from` entries are
/// prepended to the derived list. Neither is forwarded to dependencies.
#[derive(Debug, Clone)]
pub struct StartConfig {
    pub instances: Option<Vec<String>>,
    pub autostart_dependencies: bool,
    pub binds: BTreeMap<String, HostBind>,
    pub volumes_from: Vec<String>,
}

impl Default for StartConfig {
    fn default() -> Self {
        Self {
            instances: None,
            autostart_dependencies: true,
            binds: BTreeMap::new(),
            volumes_from: Vec::new(),
        }
    }
}

/// Options for [`OrchestrationEngine::stop`].
#[derive(Debug, Clone)]
pub struct StopConfig {
    pub instances: Option<Vec<String>>,
    pub autostop_dependent: bool,
    pub stop: StopOptions,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            instances: None,
            autostop_dependent: true,
            stop: StopOptions::default(),
        }
    }
}

/// Reflects a [`ContainerMap`] onto a container runtime: creating,
/// starting, stopping and removing container instances with dependency
/// awareness and idempotence.
///
/// Container and image names are cached; use
/// [`refresh_names`](Self::refresh_names) to force a reload. Rebinding
/// the map or the client invalidates the cache.
pub struct OrchestrationEngine {
    map: Arc<ContainerMap>,
    client: Arc<dyn RuntimeClient>,
    cache: NameCache,
}

impl OrchestrationEngine {
    pub fn new(map: Arc<ContainerMap>, client: Arc<dyn RuntimeClient>) -> Self {
        Self {
            map,
            client,
            cache: NameCache::new(),
        }
    }

    pub fn map(&self) -> &ContainerMap {
        &self.map
    }

    pub fn client(&self) -> &Arc<dyn RuntimeClient> {
        &self.client
    }

    /// Rebind the container map. The name cache is invalidated: a new map
    /// may address a different naming universe.
    pub fn set_map(&mut self, map: Arc<ContainerMap>) {
        self.map = map;
        self.cache.invalidate();
    }

    /// Rebind the runtime client, discarding everything cached from the
    /// previous one.
    pub fn set_client(&mut self, client: Arc<dyn RuntimeClient>) {
        self.client = client;
        self.cache.invalidate();
    }

    /// Force a full reload of the cached container-name and image-tag
    /// sets.
    pub async fn refresh_names(&mut self) -> Result<()> {
        let client = Arc::clone(&self.client);
        self.cache.refresh(client.as_ref()).await?;
        Ok(())
    }

    /// Creates container instances for `container`, resolving and creating
    /// dependencies first when enabled. Dependencies are created farthest
    /// prerequisite first, each with its own assignment defaults.
    ///
    /// Returns (container, instance-name) pairs for the dependencies and
    /// the target, in creation order. Attached volume containers are
    /// never included. Instances whose names are already known to exist
    /// are skipped but still listed.
    pub async fn create(
        &mut self,
        container: &str,
        options: CreateOptions,
    ) -> Result<Vec<(String, String)>> {
        let mut created = Vec::new();

        if options.autocreate_dependencies {
            let mut resolver = DependencyResolver::new();
            resolver.update(&self.map);
            for dependency in resolver.get_dependencies(container)? {
                if options.autocreate_attached {
                    self.create_attached_volumes(&dependency, &options.baseimage, &options.coreimage)
                        .await?;
                }
                created.extend(self.create_instances(&dependency, None, &[], None, None).await?);
            }
        }

        if options.autocreate_attached {
            self.create_attached_volumes(container, &options.baseimage, &options.coreimage)
                .await?;
        }
        created.extend(
            self.create_instances(
                container,
                options.instances.as_deref(),
                &options.volumes,
                options.user.as_deref(),
                options.environment.as_ref(),
            )
            .await?,
        );
        Ok(created)
    }

    /// Creates the attached volume containers for `container`: one minimal
    /// container per alias in its `attaches` list, named by the alias
    /// alone and shared across all instances. Ownership and permissions
    /// are adjusted through a disposable helper container when the
    /// assignment specifies them.
    ///
    /// Returns alias -> physical container name.
    pub async fn create_attached_volumes(
        &mut self,
        container: &str,
        baseimage: &str,
        coreimage: &str,
    ) -> Result<BTreeMap<String, String>> {
        let map = Arc::clone(&self.map);
        let client = Arc::clone(&self.client);
        let assignment = map.get_existing(container)?;

        self.ensure_images(&[baseimage, coreimage]).await?;

        let mut attached = BTreeMap::new();
        for alias in &assignment.attaches {
            let name = map.cname(alias, None);
            if !self.cache.has_container(client.as_ref(), &name).await? {
                let path = map.volume_path(alias)?;
                client
                    .create_container(&CreateRequest {
                        image: baseimage.to_string(),
                        name: Some(name.clone()),
                        volumes: vec![path.to_string()],
                        user: assignment.user.clone(),
                        ..Default::default()
                    })
                    .await?;
                self.cache.add_container(name.clone());
                client.start(&name, &StartOptions::default()).await?;
                self.adjust_permissions(
                    coreimage,
                    &name,
                    path,
                    assignment.user.as_deref(),
                    assignment.permissions.as_deref(),
                )
                .await?;
            } else {
                debug!(container = %name, "Attached volume container exists");
                client.push_log(&format!("Container '{}' exists.", name));
            }
            attached.insert(alias.clone(), name);
        }
        Ok(attached)
    }

    /// Starts instances for `container`, starting all dependencies first
    /// (farthest prerequisite first, each with its own defaults) when
    /// enabled.
    pub async fn start(&mut self, container: &str, config: StartConfig) -> Result<()> {
        if config.autostart_dependencies {
            let mut resolver = DependencyResolver::new();
            resolver.update(&self.map);
            for dependency in resolver.get_dependencies(container)? {
                self.start_instances(&dependency, None, &BTreeMap::new(), &[])
                    .await?;
            }
        }
        self.start_instances(
            container,
            config.instances.as_deref(),
            &config.binds,
            &config.volumes_from,
        )
        .await
    }

    /// Stops instances for `container`, stopping all dependents first
    /// (resolved through the backward graph) when enabled.
    ///
    /// Teardown is best-effort by policy: a runtime "not found" is
    /// treated as already stopped, and any other runtime failure is
    /// logged and skipped so the remaining instances still get their
    /// stop call. Only lookup and cycle errors propagate.
    pub async fn stop(&mut self, container: &str, config: StopConfig) -> Result<()> {
        if config.autostop_dependent {
            let mut resolver = DependencyResolver::new();
            resolver.update_backward(&self.map);
            for dependent in resolver.get_dependencies(container)? {
                self.stop_instances(&dependent, None, &config.stop).await?;
            }
        }
        self.stop_instances(container, config.instances.as_deref(), &config.stop)
            .await
    }

    /// Removes the named instances, or the single default instance when
    /// none are given, evicting each from the name cache after the
    /// runtime confirms removal.
    pub async fn remove(&mut self, container: &str, instances: Option<&[String]>) -> Result<()> {
        let map = Arc::clone(&self.map);
        let client = Arc::clone(&self.client);
        let targets: Vec<Option<&str>> = match instances {
            Some(list) if !list.is_empty() => list.iter().map(|i| Some(i.as_str())).collect(),
            _ => vec![None],
        };
        for instance in targets {
            let name = map.cname(container, instance);
            client.remove_container(&name).await?;
            self.cache.remove_container(&name);
        }
        Ok(())
    }

    /// Blocks until the instance exits. When `log` is set, the instance's
    /// captured output is forwarded before returning.
    pub async fn wait(&self, container: &str, instance: Option<&str>, log: bool) -> Result<()> {
        let name = self.map.cname(container, instance);
        self.client.wait(&name).await?;
        if log {
            self.client.push_container_logs(&name).await?;
        }
        Ok(())
    }

    /// Waits for one instance to exit, then removes it.
    pub async fn wait_and_remove(
        &mut self,
        container: &str,
        instance: Option<&str>,
        log: bool,
    ) -> Result<()> {
        self.wait(container, instance, log).await?;
        let instances = instance.map(|i| vec![i.to_string()]);
        self.remove(container, instances.as_deref()).await
    }

    /// Ensure every image is present, importing the missing ones. The
    /// image cache is force-refreshed only when an import happened.
    async fn ensure_images(&mut self, images: &[&str]) -> Result<()> {
        let client = Arc::clone(&self.client);
        let mut imported = false;
        for image in images {
            let (name, tag) = split_image(image);
            let qualified = format!("{}:{}", name, tag);
            if !self.cache.has_image(client.as_ref(), &qualified).await? {
                info!(image = %qualified, "Importing missing image");
                client.import_image(name, tag).await?;
                imported = true;
            }
        }
        if imported {
            self.cache.refresh_images(client.as_ref()).await?;
        }
        Ok(())
    }

    /// Create the instances of one container idempotently, with the
    /// merged volume list and the assignment defaults unless overridden.
    async fn create_instances(
        &mut self,
        container: &str,
        instances: Option<&[String]>,
        volumes: &[String],
        user: Option<&str>,
        environment: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<(String, String)>> {
        let map = Arc::clone(&self.map);
        let client = Arc::clone(&self.client);
        let assignment = map.get_existing(container)?;

        let image = assignment.image_or(container).to_string();
        // Merged volumes: explicit override, assignment shares, then the
        // container paths of every bound alias.
        let mut shared: Vec<String> = volumes.to_vec();
        shared.extend(assignment.shares.iter().cloned());
        for bind in &assignment.binds {
            shared.push(map.volume_path(&bind.alias)?.to_string());
        }
        let user = user.or(assignment.user.as_deref());
        let environment = environment.unwrap_or(&assignment.environment);

        self.ensure_images(&[&image]).await?;

        let mut created = Vec::new();
        for instance in instance_names(assignment, instances) {
            let name = map.cname(container, instance);
            if !self.cache.has_container(client.as_ref(), &name).await? {
                client
                    .create_container(&CreateRequest {
                        image: image.clone(),
                        name: Some(name.clone()),
                        volumes: shared.clone(),
                        user: user.map(str::to_string),
                        environment: environment.clone(),
                        ..Default::default()
                    })
                    .await?;
                self.cache.add_container(name.clone());
            } else {
                debug!(container = %name, "Container exists, skipping create");
                client.push_log(&format!("Container '{}' exists.", name));
            }
            created.push((container.to_string(), name));
        }
        Ok(created)
    }

    /// Start the instances of one container with derived binds,
    /// volumes-from and links.
    async fn start_instances(
        &mut self,
        container: &str,
        instances: Option<&[String]>,
        binds: &BTreeMap<String, HostBind>,
        volumes_from: &[String],
    ) -> Result<()> {
        let map = Arc::clone(&self.map);
        let client = Arc::clone(&self.client);
        let assignment = map.get_existing(container)?;

        // Explicit volumes-from entries first, then everything the
        // assignment uses or attaches, resolved to physical names.
        let mut all_volumes_from: Vec<String> = volumes_from.to_vec();
        all_volumes_from.extend(
            assignment
                .uses
                .iter()
                .chain(assignment.attaches.iter())
                .map(|name| map.cname(name, None)),
        );
        let links: BTreeMap<String, String> = assignment
            .links_to
            .iter()
            .map(|link| (map.cname(&link.container, None), link.alias.clone()))
            .collect();

        for instance in instance_names(assignment, instances) {
            let name = map.cname(container, instance);
            let mut host_binds: BTreeMap<String, HostBind> = BTreeMap::new();
            for bind in &assignment.binds {
                let container_path = map.volume_path(&bind.alias)?.to_string();
                let host_path = map
                    .host_location(&bind.alias)
                    .and_then(|location| location.for_instance(instance));
                if let Some(host_path) = host_path {
                    host_binds.insert(
                        host_path.to_string(),
                        HostBind {
                            container_path,
                            read_only: !bind.read_write,
                        },
                    );
                }
            }
            // Explicit binds win on host-path collision.
            for (host_path, bind) in binds {
                host_binds.insert(host_path.clone(), bind.clone());
            }
            client
                .start(
                    &name,
                    &StartOptions {
                        binds: host_binds,
                        volumes_from: all_volumes_from.clone(),
                        links: links.clone(),
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Best-effort stop of one container's instances; see [`stop`](Self::stop).
    async fn stop_instances(
        &mut self,
        container: &str,
        instances: Option<&[String]>,
        options: &StopOptions,
    ) -> Result<()> {
        let map = Arc::clone(&self.map);
        let client = Arc::clone(&self.client);
        let assignment = map.get_existing(container)?;

        for instance in instance_names(assignment, instances) {
            let name = map.cname(container, instance);
            match client.stop(&name, options).await {
                Ok(()) => {}
                Err(RuntimeError::NotFound(_)) => {
                    debug!(container = %name, "Container not found, treating as stopped");
                }
                Err(err) => {
                    warn!(container = %name, error = %err, "Failed to stop container");
                    client.push_log(&format!("Failed to stop container '{}': {}", name, err));
                }
            }
        }
        Ok(())
    }

    /// Adjust ownership and permissions of an attached volume by running
    /// chown/chmod against it from a disposable helper container.
    async fn adjust_permissions(
        &mut self,
        coreimage: &str,
        container_name: &str,
        path: &str,
        user: Option<&str>,
        permissions: Option<&str>,
    ) -> Result<()> {
        if let Some(user) = user {
            info!(container = container_name, user, "Adjusting attached volume ownership");
            self.run_and_dispose(
                coreimage,
                vec![
                    "chown".to_string(),
                    "-R".to_string(),
                    user_group(user),
                    path.to_string(),
                ],
                vec![container_name.to_string()],
            )
            .await?;
        }
        if let Some(permissions) = permissions {
            info!(container = container_name, permissions, "Adjusting attached volume permissions");
            self.run_and_dispose(
                coreimage,
                vec![
                    "chmod".to_string(),
                    "-R".to_string(),
                    permissions.to_string(),
                    path.to_string(),
                ],
                vec![container_name.to_string()],
            )
            .await?;
        }
        Ok(())
    }

    /// Run one command in an unnamed helper container as root, forward
    /// its output, and remove it. The helper is removed even when a step
    /// failed; the first error wins.
    async fn run_and_dispose(
        &mut self,
        coreimage: &str,
        command: Vec<String>,
        volumes_from: Vec<String>,
    ) -> Result<()> {
        let client = Arc::clone(&self.client);
        let id = client
            .create_container(&CreateRequest {
                image: coreimage.to_string(),
                user: Some("root".to_string()),
                command: Some(command),
                ..Default::default()
            })
            .await?;

        let run = async {
            client
                .start(
                    &id,
                    &StartOptions {
                        volumes_from,
                        ..Default::default()
                    },
                )
                .await?;
            client.wait(&id).await?;
            client.push_container_logs(&id).await
        }
        .await;
        let removed = client.remove_container(&id).await;

        run?;
        removed?;
        Ok(())
    }
}

/// Materialize the instances an operation targets: the explicit override,
/// the assignment's declared instances, or the single default (`None`).
fn instance_names<'a>(
    assignment: &'a ContainerAssignment,
    overrides: Option<&'a [String]>,
) -> Vec<Option<&'a str>> {
    match overrides {
        Some(list) if !list.is_empty() => list.iter().map(|i| Some(i.as_str())).collect(),
        _ => {
            if assignment.instances.is_empty() {
                vec![None]
            } else {
                assignment.instances.iter().map(|i| Some(i.as_str())).collect()
            }
        }
    }
}

/// Split an image reference into name and tag, defaulting to `latest`.
fn split_image(image: &str) -> (&str, &str) {
    match image.split_once(':') {
        Some((name, tag)) if !tag.is_empty() => (name, tag),
        Some((name, _)) => (name, "latest"),
        None => (image, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn split_image_defaults_to_latest() {
        assert_eq!(split_image("postgres"), ("postgres", "latest"));
        assert_eq!(split_image("postgres:16"), ("postgres", "16"));
        assert_eq!(split_image("postgres:"), ("postgres", "latest"));
    }

    #[test]
    fn instance_selection_prefers_override_then_assignment() {
        let assignment = ContainerAssignment {
            instances: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let overrides = vec!["b".to_string()];

        assert_eq!(
            instance_names(&assignment, Some(&overrides)),
            vec![Some("b")]
        );
        assert_eq!(
            instance_names(&assignment, None),
            vec![Some("a"), Some("b")]
        );

        let default_only = ContainerAssignment::default();
        assert_eq!(instance_names(&default_only, None), vec![None]);
        // An empty override falls back to the assignment.
        assert_eq!(instance_names(&default_only, Some(&[])), vec![None]);
    }
}
