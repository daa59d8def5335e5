//! Log harvesting for podwatch
//!
//! This crate enumerates pods and their containers and persists one log
//! artifact per container.

mod artifact;
mod harvest;

pub use artifact::{ArtifactWriter, artifact_file_name, artifact_path, sweep_partials};
pub use harvest::{HarvestOptions, HarvestReport, LogHarvester, SkipReason, SkippedPod};

// Re-export types used in our public API
pub use podwatch_types::{ContainerRef, FetchError, LogArtifact, LogOptions, PodRef};
