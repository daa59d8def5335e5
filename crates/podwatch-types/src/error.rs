use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to switch to a cluster context; the context is skipped for the pass.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("failed to spawn activation script {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("activation script {path} exited with status {status:?}\nstderr:\n{stderr}")]
    ScriptFailed {
        path: PathBuf,
        status: Option<i32>,
        stderr: String,
    },
    #[error("failed to load kubeconfig for context {context}: {message}")]
    Kubeconfig { context: String, message: String },
    #[error("failed to build client for context {context}: {message}")]
    Client { context: String, message: String },
    #[error("activation of context {context} timed out after {timeout:?}")]
    Timeout { context: String, timeout: Duration },
}

/// Failure to list pods, phases or containers.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{operation} in namespace {namespace} failed: {message}")]
    Api {
        operation: &'static str,
        namespace: String,
        message: String,
    },
    #[error("{operation} in namespace {namespace} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        namespace: String,
        timeout: Duration,
    },
}

/// Failure to retrieve or persist one log stream.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("pod {pod} has {} containers ({}); a container name is required", .containers.len(), .containers.join(", "))]
    AmbiguousContainer { pod: String, containers: Vec<String> },
    #[error("failed to open log stream for {target}: {message}")]
    Stream { target: String, message: String },
    #[error("log fetch for {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Alert delivery failure; logged only.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with status {status:?}: {stderr}")]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}
