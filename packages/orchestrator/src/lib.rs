// ABOUTME: Dependency-ordered container orchestration over a pluggable runtime client
// ABOUTME: Re-exports the engine, resolver, name cache and runtime boundary types

pub mod cache;
pub mod engine;
pub mod resolver;
pub mod runtime;

pub use cache::NameCache;
pub use engine::{
    CreateOptions, EngineError, OrchestrationEngine, StartConfig, StopConfig, DEFAULT_BASEIMAGE,
    DEFAULT_COREIMAGE,
};
pub use resolver::{DependencyResolver, ResolverError};
pub use runtime::{
    CreateRequest, HostBind, RuntimeClient, RuntimeError, StartOptions, StopOptions,
};
