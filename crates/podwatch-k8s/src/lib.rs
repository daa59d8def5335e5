//! Kubernetes client for podwatch
//!
//! This crate provides the per-context cluster client (pod phases, pods,
//! containers and log streams) and the loader that discovers and activates
//! cluster contexts from a credentials root.

mod client;
mod context;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use client::{
    ClientTimeouts, ClusterClient, KubeClusterClient, LogSink, effective_phase,
    sole_container,
};
pub use context::{ContextLoader, CredentialsDirLoader, LoaderConfig};

// Re-export types that are used in our public API
pub use podwatch_types::{
    ActivationError, ClusterContext, CredentialKind, FetchError, LogOptions, LogTarget, PodPhase,
    PodRef, QueryError,
};
