// ABOUTME: Lazily-loaded cache of runtime container names and image tags
// ABOUTME: Mutated locally on create/remove; staleness is resolved only by explicit refresh

use std::collections::HashSet;

use crate::runtime::{RuntimeClient, RuntimeError};

type Result<T> = std::result::Result<T, RuntimeError>;

/// Cached view of what exists in the runtime, so repeated orchestration
/// steps do not issue an existence query each. Populated on first access,
/// kept coherent locally via `add_container`/`remove_container`, and
/// stale against outside mutation until an explicit refresh.
///
/// Owned by one engine instance; not meant for shared concurrent access.
#[derive(Debug, Default)]
pub struct NameCache {
    containers: Option<HashSet<String>>,
    images: Option<HashSet<String>>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached container names, loading from the runtime on first call.
    pub async fn container_names(
        &mut self,
        client: &dyn RuntimeClient,
    ) -> Result<&HashSet<String>> {
        if self.containers.is_none() {
            self.containers = Some(client.container_names().await?);
        }
        Ok(self.containers.get_or_insert_with(HashSet::new))
    }

    /// Cached image tags (`"name:tag"`), loading from the runtime on
    /// first call.
    pub async fn image_tags(&mut self, client: &dyn RuntimeClient) -> Result<&HashSet<String>> {
        if self.images.is_none() {
            self.images = Some(client.image_tags().await?);
        }
        Ok(self.images.get_or_insert_with(HashSet::new))
    }

    pub async fn has_container(
        &mut self,
        client: &dyn RuntimeClient,
        name: &str,
    ) -> Result<bool> {
        Ok(self.container_names(client).await?.contains(name))
    }

    pub async fn has_image(&mut self, client: &dyn RuntimeClient, tag: &str) -> Result<bool> {
        Ok(self.image_tags(client).await?.contains(tag))
    }

    /// Discard and reload both sets.
    pub async fn refresh(&mut self, client: &dyn RuntimeClient) -> Result<()> {
        self.refresh_containers(client).await?;
        self.refresh_images(client).await
    }

    pub async fn refresh_containers(&mut self, client: &dyn RuntimeClient) -> Result<()> {
        self.containers = Some(client.container_names().await?);
        Ok(())
    }

    pub async fn refresh_images(&mut self, client: &dyn RuntimeClient) -> Result<()> {
        self.images = Some(client.image_tags().await?);
        Ok(())
    }

    /// Record a container the engine just created, without a round trip.
    pub fn add_container(&mut self, name: impl Into<String>) {
        if let Some(containers) = self.containers.as_mut() {
            containers.insert(name.into());
        }
    }

    /// Forget a container the engine just removed.
    pub fn remove_container(&mut self, name: &str) {
        if let Some(containers) = self.containers.as_mut() {
            containers.remove(name);
        }
    }

    /// Drop both sets. Used when the engine's runtime binding changes.
    pub fn invalidate(&mut self) {
        self.containers = None;
        self.images = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CreateRequest, StartOptions, StopOptions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts runtime queries so tests can assert the cache avoids them.
    #[derive(Default)]
    struct CountingRuntime {
        container_queries: AtomicUsize,
        image_queries: AtomicUsize,
    }

    #[async_trait]
    impl RuntimeClient for CountingRuntime {
        async fn container_names(&self) -> Result<HashSet<String>> {
            self.container_queries.fetch_add(1, Ordering::SeqCst);
            Ok(["db".to_string()].into_iter().collect())
        }

        async fn image_tags(&self) -> Result<HashSet<String>> {
            self.image_queries.fetch_add(1, Ordering::SeqCst);
            Ok(["postgres:16".to_string()].into_iter().collect())
        }

        async fn import_image(&self, _image: &str, _tag: &str) -> Result<()> {
            Ok(())
        }

        async fn create_container(&self, _request: &CreateRequest) -> Result<String> {
            Ok("id".to_string())
        }

        async fn start(&self, _name: &str, _options: &StartOptions) -> Result<()> {
            Ok(())
        }

        async fn stop(&self, _name: &str, _options: &StopOptions) -> Result<()> {
            Ok(())
        }

        async fn remove_container(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn wait(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn push_container_logs(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn populates_once_and_serves_from_cache() {
        let runtime = CountingRuntime::default();
        let mut cache = NameCache::new();

        assert!(cache.has_container(&runtime, "db").await.unwrap());
        assert!(!cache.has_container(&runtime, "web").await.unwrap());
        assert!(cache.has_image(&runtime, "postgres:16").await.unwrap());
        assert!(cache.has_image(&runtime, "postgres:16").await.unwrap());

        assert_eq!(runtime.container_queries.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.image_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn local_mutation_keeps_cache_coherent() {
        let runtime = CountingRuntime::default();
        let mut cache = NameCache::new();

        cache.container_names(&runtime).await.unwrap();
        cache.add_container("web");
        assert!(cache.has_container(&runtime, "web").await.unwrap());

        cache.remove_container("db");
        assert!(!cache.has_container(&runtime, "db").await.unwrap());

        // No extra round trips happened for any of the above.
        assert_eq!(runtime.container_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn add_before_population_is_a_no_op() {
        let runtime = CountingRuntime::default();
        let mut cache = NameCache::new();

        // Nothing cached yet, so there is nothing to patch; the next
        // access loads the authoritative set instead.
        cache.add_container("web");
        assert!(!cache.has_container(&runtime, "web").await.unwrap());
    }

    #[tokio::test]
    async fn refresh_and_invalidate_force_reload() {
        let runtime = CountingRuntime::default();
        let mut cache = NameCache::new();

        cache.has_container(&runtime, "db").await.unwrap();
        cache.refresh(&runtime).await.unwrap();
        assert_eq!(runtime.container_queries.load(Ordering::SeqCst), 2);
        assert_eq!(runtime.image_queries.load(Ordering::SeqCst), 1);

        cache.invalidate();
        cache.has_container(&runtime, "db").await.unwrap();
        assert_eq!(runtime.container_queries.load(Ordering::SeqCst), 3);
    }
}
