//! Cluster context discovery and activation

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use tokio::process::Command;
use tracing::{debug, info};

use crate::client::{ClientTimeouts, ClusterClient, KubeClusterClient};
use podwatch_types::{ActivationError, ClusterContext, CredentialKind};

/// Sources the activation script with auto-export on and reports what it exported.
/// The script's own stdout is folded into stderr so only the report reaches us.
const ACTIVATION_SHELL: &str = r#"set -a
. "$1" 1>&2 || exit $?
printf '%s\n%s\n' "${KUBECONFIG:-}" "${KUBE_CONTEXT:-}""#;

/// Discovers cluster contexts and turns one into a ready client
#[async_trait]
pub trait ContextLoader: Send + Sync {
    type Client: ClusterClient + 'static;

    /// Contexts available right now, in a stable order
    fn list_contexts(&self) -> std::io::Result<Vec<ClusterContext>>;

    /// Apply the context's credentials, yielding a client isolated to that context
    async fn activate(&self, context: &ClusterContext) -> Result<Self::Client, ActivationError>;
}

/// Settings for [`CredentialsDirLoader`]
#[derive(Clone, Debug)]
pub struct LoaderConfig {
    /// Directory whose immediate subdirectories are cluster contexts
    pub root: PathBuf,
    /// File name of a kubeconfig inside a context directory
    pub kubeconfig_file: String,
    /// File name of an activation script inside a context directory
    pub activation_script: String,
    pub activation_timeout: Duration,
    pub client_timeouts: ClientTimeouts,
}

impl LoaderConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            kubeconfig_file: "kubeconfig".to_string(),
            activation_script: "env.sh".to_string(),
            activation_timeout: Duration::from_secs(30),
            client_timeouts: ClientTimeouts::default(),
        }
    }
}

/// Loads contexts from a credentials root laid out as one directory per cluster
pub struct CredentialsDirLoader {
    config: LoaderConfig,
}

impl CredentialsDirLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// The context for a single directory, if it carries credentials
    pub fn context_at(&self, dir: &Path) -> Option<ClusterContext> {
        let name = dir.file_name()?.to_str()?.to_string();
        let (path, kind) = self.credential_in(dir)?;
        Some(ClusterContext::new(name, path, kind))
    }

    /// Credential artifact of one context directory, if it has one
    fn credential_in(&self, dir: &Path) -> Option<(PathBuf, CredentialKind)> {
        let kubeconfig = dir.join(&self.config.kubeconfig_file);
        if kubeconfig.is_file() {
            return Some((kubeconfig, CredentialKind::Kubeconfig));
        }
        let script = dir.join(&self.config.activation_script);
        if script.is_file() {
            return Some((script, CredentialKind::ActivationScript));
        }
        None
    }

    async fn activate_inner(
        &self,
        context: &ClusterContext,
    ) -> Result<KubeClusterClient, ActivationError> {
        let dir = context
            .directory()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.root.clone());

        let (kubeconfig, kube_context) = match context.credential {
            CredentialKind::Kubeconfig => {
                let kubeconfig = Kubeconfig::read_from(&context.credentials_path).map_err(|e| {
                    ActivationError::Kubeconfig {
                        context: context.name.clone(),
                        message: e.to_string(),
                    }
                })?;
                (kubeconfig, None)
            }
            CredentialKind::ActivationScript => {
                let exported = run_activation_script(&context.credentials_path, &dir).await?;
                debug!(
                    context = %context.name,
                    kubeconfig = %exported.kubeconfig,
                    kube_context = exported.context.as_deref().unwrap_or(""),
                    "activation script exported credentials"
                );
                let kubeconfig =
                    read_kubeconfig_list(&exported.kubeconfig, &dir).map_err(|message| {
                        ActivationError::Kubeconfig {
                            context: context.name.clone(),
                            message,
                        }
                    })?;
                (kubeconfig, exported.context)
            }
        };

        let mut config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context: kube_context,
                ..Default::default()
            },
        )
        .await
        .map_err(|e| ActivationError::Kubeconfig {
            context: context.name.clone(),
            message: e.to_string(),
        })?;
        config.connect_timeout = Some(self.config.client_timeouts.request);

        let client = kube::Client::try_from(config).map_err(|e| ActivationError::Client {
            context: context.name.clone(),
            message: e.to_string(),
        })?;

        Ok(KubeClusterClient::new(
            client,
            context.name.clone(),
            self.config.client_timeouts,
        ))
    }
}

#[async_trait]
impl ContextLoader for CredentialsDirLoader {
    type Client = KubeClusterClient;

    fn list_contexts(&self) -> std::io::Result<Vec<ClusterContext>> {
        let mut dirs: Vec<(String, PathBuf)> = std::fs::read_dir(&self.config.root)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?.to_string();
                Some((name, path))
            })
            .collect();
        dirs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut contexts = Vec::with_capacity(dirs.len());
        for (name, dir) in dirs {
            match self.credential_in(&dir) {
                Some((path, kind)) => contexts.push(ClusterContext::new(name, path, kind)),
                None => info!(
                    context = %name,
                    "no {} or {} found, skipping",
                    self.config.kubeconfig_file,
                    self.config.activation_script
                ),
            }
        }
        Ok(contexts)
    }

    async fn activate(&self, context: &ClusterContext) -> Result<Self::Client, ActivationError> {
        let timeout = self.config.activation_timeout;
        match tokio::time::timeout(timeout, self.activate_inner(context)).await {
            Ok(result) => result,
            Err(_) => Err(ActivationError::Timeout {
                context: context.name.clone(),
                timeout,
            }),
        }
    }
}

/// What an activation script left in its environment
#[derive(Debug, PartialEq, Eq)]
struct ExportedCredentials {
    kubeconfig: String,
    context: Option<String>,
}

async fn run_activation_script(
    script: &Path,
    dir: &Path,
) -> Result<ExportedCredentials, ActivationError> {
    let script = std::path::absolute(script).map_err(|source| ActivationError::Spawn {
        path: script.to_path_buf(),
        source,
    })?;

    let output = Command::new("sh")
        .arg("-c")
        .arg(ACTIVATION_SHELL)
        .arg("podwatch-activate")
        .arg(&script)
        .current_dir(dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ActivationError::Spawn {
            path: script.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ActivationError::ScriptFailed {
            path: script,
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(parse_exported(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_exported(stdout: &str) -> ExportedCredentials {
    let mut lines = stdout.lines();
    let kubeconfig = lines.next().unwrap_or_default().trim().to_string();
    let context = lines
        .next()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    ExportedCredentials { kubeconfig, context }
}

/// Read a `KUBECONFIG`-style path list, merging the files in order.
/// An empty list falls back to the default kubeconfig location.
fn read_kubeconfig_list(paths: &str, base: &Path) -> Result<Kubeconfig, String> {
    let files: Vec<PathBuf> = paths
        .split(':')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| base.join(p))
        .collect();

    if files.is_empty() {
        return Kubeconfig::read().map_err(|e| e.to_string());
    }

    let mut merged: Option<Kubeconfig> = None;
    for file in files {
        let next =
            Kubeconfig::read_from(&file).map_err(|e| format!("{}: {}", file.display(), e))?;
        merged = Some(match merged {
            Some(current) => current.merge(next).map_err(|e| e.to_string())?,
            None => next,
        });
    }
    merged.ok_or_else(|| "no kubeconfig files".to_string())
}
