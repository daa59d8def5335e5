//! Shared types for podwatch
//!
//! This crate contains the data model and error taxonomy used across the
//! podwatch crates.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

mod error;

pub use error::{ActivationError, FetchError, NotificationError, QueryError};

// ============================================================================
// Cluster Context Types
// ============================================================================

/// How a context directory carries its credentials
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKind {
    /// A kubeconfig file loaded as-is
    Kubeconfig,
    /// A shell script that exports `KUBECONFIG` (and optionally `KUBE_CONTEXT`)
    ActivationScript,
}

/// One cluster's authentication/connection profile, discovered on disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterContext {
    pub name: String,
    pub credentials_path: PathBuf,
    pub credential: CredentialKind,
}

impl ClusterContext {
    pub fn new(
        name: impl Into<String>,
        credentials_path: PathBuf,
        credential: CredentialKind,
    ) -> Self {
        Self {
            name: name.into(),
            credentials_path,
            credential,
        }
    }

    /// Directory holding the credential artifact
    pub fn directory(&self) -> Option<&std::path::Path> {
        self.credentials_path.parent()
    }
}

// ============================================================================
// Pod Types
// ============================================================================

/// Pod status as reported per pod, following kubectl's STATUS column
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
    CrashLoopBackOff,
    Unknown,
}

impl PodPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Error => "Error",
            Self::CrashLoopBackOff => "CrashLoopBackOff",
            Self::Unknown => "Unknown",
        }
    }
}

impl From<&str> for PodPhase {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Error" => Self::Error,
            "CrashLoopBackOff" => Self::CrashLoopBackOff,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one pod within one cluster context
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
}

impl PodRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One container of a pod, uniquely identifying a log stream
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContainerRef {
    pub pod: PodRef,
    pub container_name: String,
}

impl ContainerRef {
    pub fn new(pod: PodRef, container_name: impl Into<String>) -> Self {
        Self {
            pod,
            container_name: container_name.into(),
        }
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pod, self.container_name)
    }
}

/// What a log fetch addresses
///
/// `Pod` is only valid for single-container pods; backends refuse it otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogTarget {
    Container(ContainerRef),
    Pod(PodRef),
}

impl LogTarget {
    pub fn pod(&self) -> &PodRef {
        match self {
            Self::Container(c) => &c.pod,
            Self::Pod(p) => p,
        }
    }

    pub fn container_name(&self) -> Option<&str> {
        match self {
            Self::Container(c) => Some(&c.container_name),
            Self::Pod(_) => None,
        }
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container(c) => c.fmt(f),
            Self::Pod(p) => p.fmt(f),
        }
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Parameters forwarded to the backend when fetching a log stream
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Only the last N lines
    pub tail_lines: Option<i64>,
    /// Only lines newer than this many seconds
    pub since_seconds: Option<i64>,
}

/// A log file written by one harvest of one container
#[derive(Clone, Debug)]
pub struct LogArtifact {
    pub target: LogTarget,
    pub file_path: PathBuf,
    pub bytes_written: u64,
    pub harvested_at: DateTime<Utc>,
}

// ============================================================================
// Health Types
// ============================================================================

/// Outcome of classifying one namespace's pod phases
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HealthVerdict {
    pub unhealthy: bool,
    pub offending_phases: BTreeSet<PodPhase>,
}

impl HealthVerdict {
    pub fn healthy() -> Self {
        Self::default()
    }

    /// Comma-separated offending phases, e.g. "Pending, CrashLoopBackOff"
    pub fn describe(&self) -> String {
        self.offending_phases
            .iter()
            .map(PodPhase::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
