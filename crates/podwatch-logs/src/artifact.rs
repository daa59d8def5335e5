//! Deterministic artifact naming and atomic writes

use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use podwatch_types::{ContainerRef, FetchError};

/// File name of a container's log artifact: `<pod>_<container>.log`
pub fn artifact_file_name(container: &ContainerRef) -> String {
    format!(
        "{}_{}.log",
        sanitize(&container.pod.name),
        sanitize(&container.container_name)
    )
}

/// Full path of a container's log artifact under `output_dir`
pub fn artifact_path(output_dir: &Path, container: &ContainerRef) -> PathBuf {
    output_dir.join(artifact_file_name(container))
}

const PARTIAL_SUFFIX: &str = ".partial";

/// Remove partial files left by writers that never committed or discarded,
/// e.g. when a pass was aborted mid-fetch. Returns how many were removed.
pub async fn sweep_partials(output_dir: &Path) -> usize {
    let Ok(mut entries) = fs::read_dir(output_dir).await else {
        return 0;
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_partial = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX));
        if !is_partial {
            continue;
        }
        match fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => debug!(
                path = %path.display(),
                error = %e,
                "failed to remove stale partial"
            ),
        }
    }
    removed
}

/// Path separators never reach the file name
fn sanitize(name: &str) -> String {
    name.replace(['/', '\\'], "-")
}

/// Writes an artifact to a `.partial` sibling and renames it into place on
/// commit, so a failed re-harvest never clobbers the previous artifact.
pub struct ArtifactWriter {
    path: PathBuf,
    partial: PathBuf,
    file: File,
}

impl ArtifactWriter {
    /// Ensure `output_dir` exists and open a fresh partial file for `container`
    pub async fn create(output_dir: &Path, container: &ContainerRef) -> Result<Self, FetchError> {
        fs::create_dir_all(output_dir)
            .await
            .map_err(|source| FetchError::Io {
                path: output_dir.to_path_buf(),
                source,
            })?;

        let path = artifact_path(output_dir, container);
        let partial = output_dir.join(format!(
            "{}{}",
            artifact_file_name(container),
            PARTIAL_SUFFIX
        ));
        let file = File::create(&partial)
            .await
            .map_err(|source| FetchError::Io {
                path: partial.clone(),
                source,
            })?;

        Ok(Self {
            path,
            partial,
            file,
        })
    }

    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    /// Flush and move the artifact into its final path, replacing any previous one
    pub async fn commit(mut self) -> Result<PathBuf, FetchError> {
        let io_error = |path: &Path, source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        };
        self.file
            .flush()
            .await
            .map_err(|e| io_error(&self.partial, e))?;
        drop(self.file);
        fs::rename(&self.partial, &self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        Ok(self.path)
    }

    /// Remove the partial file, leaving any previous artifact untouched
    pub async fn discard(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.partial).await {
            debug!(
                path = %self.partial.display(),
                error = %e,
                "failed to remove partial artifact"
            );
        }
    }
}
