//! File-backed configuration with CLI overrides

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use podwatch_k8s::{ClientTimeouts, LoaderConfig};
use podwatch_logs::HarvestOptions;
use podwatch_monitor::MonitorSettings;
use podwatch_types::LogOptions;

use crate::cli::{HarvestArgs, LogArgs, MonitorArgs};

/// How alerts reach the operator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    /// Desktop notification via notify-send
    #[default]
    Desktop,
    /// Log output only
    Log,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub namespace: String,
    pub credentials_root: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub interval_secs: u64,
    pub context_concurrency: usize,
    pub fetch_concurrency: usize,
    pub activation_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub notify_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub kubeconfig_file: String,
    pub activation_script: String,
    pub notifier: NotifierKind,
    pub tail_lines: Option<i64>,
    pub since_seconds: Option<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            credentials_root: None,
            output_dir: PathBuf::from("logs"),
            interval_secs: 600,
            context_concurrency: 1,
            fetch_concurrency: 4,
            activation_timeout_secs: 30,
            request_timeout_secs: 30,
            fetch_timeout_secs: 120,
            notify_timeout_secs: 10,
            shutdown_grace_secs: 30,
            kubeconfig_file: "kubeconfig".to_string(),
            activation_script: "env.sh".to_string(),
            notifier: NotifierKind::Desktop,
            tail_lines: None,
            since_seconds: None,
        }
    }
}

impl Config {
    /// `<config_dir>/podwatch/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("podwatch").join("config.toml"))
    }

    /// Load from an explicit path (which must exist), else from the default
    /// path if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_monitor_args(&mut self, args: &MonitorArgs) {
        if let Some(root) = &args.credentials_root {
            self.credentials_root = Some(root.clone());
        }
        if let Some(namespace) = &args.namespace {
            self.namespace = namespace.clone();
        }
        if let Some(dir) = &args.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(interval) = args.interval {
            self.interval_secs = interval;
        }
        if let Some(notifier) = args.notifier {
            self.notifier = notifier;
        }
        self.apply_log_args(&args.log);
    }

    pub fn apply_harvest_args(&mut self, args: &HarvestArgs) {
        self.namespace = args.namespace.clone();
        if let Some(dir) = &args.logs_dir {
            self.output_dir = dir.clone();
        }
        self.apply_log_args(&args.log);
    }

    fn apply_log_args(&mut self, args: &LogArgs) {
        if args.tail_lines.is_some() {
            self.tail_lines = args.tail_lines;
        }
        if args.since_seconds.is_some() {
            self.since_seconds = args.since_seconds;
        }
    }

    /// Reject settings the monitor cannot start with
    pub fn validate_monitor(&self) -> Result<&Path> {
        let root = self
            .credentials_root
            .as_deref()
            .context("No credentials root configured (use --credentials-root)")?;
        if !root.is_dir() {
            anyhow::bail!("Credentials root {} does not exist", root.display());
        }
        if self.interval_secs == 0 {
            anyhow::bail!("Poll interval must be at least one second");
        }
        Ok(root)
    }

    pub fn client_timeouts(&self) -> ClientTimeouts {
        ClientTimeouts {
            request: Duration::from_secs(self.request_timeout_secs),
            fetch: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    pub fn loader_config(&self, root: &Path) -> LoaderConfig {
        LoaderConfig {
            root: root.to_path_buf(),
            kubeconfig_file: self.kubeconfig_file.clone(),
            activation_script: self.activation_script.clone(),
            activation_timeout: Duration::from_secs(self.activation_timeout_secs),
            client_timeouts: self.client_timeouts(),
        }
    }

    pub fn harvest_options(&self) -> HarvestOptions {
        HarvestOptions {
            fetch_concurrency: self.fetch_concurrency,
            log: LogOptions {
                tail_lines: self.tail_lines,
                since_seconds: self.since_seconds,
            },
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            namespace: self.namespace.clone(),
            output_dir: self.output_dir.clone(),
            interval: Duration::from_secs(self.interval_secs),
            context_concurrency: self.context_concurrency,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.output_dir, PathBuf::from("logs"));
        assert_eq!(config.interval_secs, 600);
        assert_eq!(config.notifier, NotifierKind::Desktop);
    }

    #[test]
    fn test_parse_file() {
        let config = Config::from_toml(
            r#"
namespace = "payments"
credentials_root = "/srv/clusters"
interval_secs = 120
context_concurrency = 4
notifier = "log"
tail_lines = 1000
"#,
        )
        .unwrap();
        assert_eq!(config.namespace, "payments");
        assert_eq!(config.credentials_root, Some(PathBuf::from("/srv/clusters")));
        assert_eq!(config.monitor_settings().interval, Duration::from_secs(120));
        assert_eq!(config.monitor_settings().context_concurrency, 4);
        assert_eq!(config.notifier, NotifierKind::Log);
        assert_eq!(config.harvest_options().log.tail_lines, Some(1000));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::from_toml("intervall_secs = 5").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config =
            Config::from_toml("namespace = \"payments\"\ninterval_secs = 120").unwrap();
        let cli = Cli::try_parse_from([
            "podwatch",
            "monitor",
            "-n",
            "checkout",
            "--since-seconds",
            "300",
        ])
        .unwrap();
        let Command::Monitor(args) = cli.command else {
            panic!("expected monitor command");
        };
        config.apply_monitor_args(&args);

        assert_eq!(config.namespace, "checkout");
        assert_eq!(config.interval_secs, 120);
        assert_eq!(config.since_seconds, Some(300));
    }

    #[test]
    fn test_validate_monitor_requires_existing_root() {
        let mut config = Config::default();
        assert!(config.validate_monitor().is_err());

        let dir = tempfile::tempdir().unwrap();
        config.credentials_root = Some(dir.path().join("missing"));
        assert!(config.validate_monitor().is_err());

        config.credentials_root = Some(dir.path().to_path_buf());
        assert_eq!(config.validate_monitor().unwrap(), dir.path());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
