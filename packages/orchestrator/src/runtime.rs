// ABOUTME: Runtime client boundary trait and the request/option types it consumes
// ABOUTME: Any conforming implementation (real transport, mock, replay fixture) plugs in here

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Errors surfaced by a runtime client. `NotFound` is its own kind so
/// callers can make the already-gone case explicit instead of sniffing
/// status codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Runtime API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Connection error: {0}")]
    Connection(String),
}

type Result<T> = std::result::Result<T, RuntimeError>;

/// Parameters for creating a container. Unnamed requests are used for
/// disposable helper containers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    pub image: String,
    pub name: Option<String>,
    /// Container paths exposed as volumes.
    pub volumes: Vec<String>,
    pub user: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub entrypoint: Option<Vec<String>>,
    pub command: Option<Vec<String>>,
}

/// Container-side half of a host bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBind {
    pub container_path: String,
    pub read_only: bool,
}

/// Parameters for starting a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Host path -> container bind.
    pub binds: BTreeMap<String, HostBind>,
    /// Physical names of containers whose volumes are mounted.
    pub volumes_from: Vec<String>,
    /// Physical dependency name -> link alias.
    pub links: BTreeMap<String, String>,
}

/// Pass-through options for stopping a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOptions {
    pub timeout_secs: Option<u64>,
}

/// The container runtime as the engine sees it. Every call is assumed
/// synchronous in effect: on return, existence and running state are
/// externally observable.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Names of all existing containers.
    async fn container_names(&self) -> Result<HashSet<String>>;

    /// All image tags, each as `"name:tag"`.
    async fn image_tags(&self) -> Result<HashSet<String>>;

    /// Import an image that is not present locally.
    async fn import_image(&self, image: &str, tag: &str) -> Result<()>;

    /// Create a container, returning its runtime id.
    async fn create_container(&self, request: &CreateRequest) -> Result<String>;

    async fn start(&self, name: &str, options: &StartOptions) -> Result<()>;

    async fn stop(&self, name: &str, options: &StopOptions) -> Result<()>;

    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Block until the container exits. No deadline is enforced here.
    async fn wait(&self, name: &str) -> Result<()>;

    /// Forward the container's captured output to the diagnostic sink.
    async fn push_container_logs(&self, name: &str) -> Result<()>;

    /// Diagnostic sink for engine messages.
    fn push_log(&self, message: &str) {
        tracing::info!(target: "stevedore::runtime", "{message}");
    }
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}
