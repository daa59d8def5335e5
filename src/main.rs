mod cli;
mod config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use podwatch_k8s::{ContextLoader, CredentialsDirLoader, KubeClusterClient};
use podwatch_logs::{HarvestReport, LogHarvester};
use podwatch_monitor::{ClusterMonitor, DesktopNotifier, LogNotifier, Notifier};

use crate::cli::{Cli, Command, HarvestArgs, MonitorArgs};
use crate::config::{Config, NotifierKind};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Monitor(args) => {
            config.apply_monitor_args(&args);
            match config.notifier {
                NotifierKind::Desktop => {
                    let notifier = DesktopNotifier::new(config.notify_timeout());
                    run_monitor(&config, &args, notifier).await
                }
                NotifierKind::Log => run_monitor(&config, &args, LogNotifier).await,
            }
        }
        Command::Harvest(args) => {
            config.apply_harvest_args(&args);
            run_harvest(&config, &args).await
        }
    }
}

async fn run_monitor<N: Notifier>(config: &Config, args: &MonitorArgs, notifier: N) -> Result<()> {
    let root = config.validate_monitor()?;
    let monitor = ClusterMonitor::new(
        CredentialsDirLoader::new(config.loader_config(root)),
        notifier,
        LogHarvester::new(config.harvest_options()),
        config.monitor_settings(),
    );

    info!(
        root = %root.display(),
        namespace = %config.namespace,
        interval_secs = config.interval_secs,
        "starting monitor"
    );

    if args.once {
        let summary = monitor.run_pass().await;
        info!(
            contexts = summary.contexts.len(),
            unhealthy = summary.unhealthy_count(),
            "pass complete"
        );
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));
    monitor.run(shutdown).await;
    Ok(())
}

async fn run_harvest(config: &Config, args: &HarvestArgs) -> Result<()> {
    let harvester = LogHarvester::new(config.harvest_options());

    let report = match &args.context_dir {
        Some(dir) => {
            let client = activate_dir(config, dir).await?;
            harvester
                .harvest(&client, &config.namespace, &config.output_dir)
                .await?
        }
        None => {
            let client = KubeClusterClient::from_default(config.client_timeouts()).await?;
            harvester
                .harvest(&client, &config.namespace, &config.output_dir)
                .await?
        }
    };

    print_report(&report, &config.output_dir);
    Ok(())
}

async fn activate_dir(config: &Config, dir: &Path) -> Result<KubeClusterClient> {
    let dir = resolve_context_dir(dir)?;
    let root = dir.parent().unwrap_or(&dir);
    let loader = CredentialsDirLoader::new(config.loader_config(root));
    let context = loader
        .context_at(&dir)
        .with_context(|| format!("No credentials found in {}", dir.display()))?;
    Ok(loader.activate(&context).await?)
}

/// Absolute form of a context directory, so `.` and `..` still name the cluster
fn resolve_context_dir(dir: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(dir)
        .with_context(|| format!("Context directory {} is not accessible", dir.display()))
}

fn print_report(report: &HarvestReport, output_dir: &Path) {
    for artifact in report.artifacts() {
        println!(
            "Saved logs for {} to {}",
            artifact.target,
            artifact.file_path.display()
        );
    }
    for failure in report.failures() {
        println!("Failed: {}", failure);
    }
    for skipped in &report.skipped {
        println!("Skipped {}: {}", skipped.pod, skipped.reason);
    }
    println!(
        "{} log file(s) written to {}",
        report.artifacts().count(),
        output_dir.display()
    );
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("received shutdown signal");
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_context_dir_keeps_its_name() {
        let root = tempfile::tempdir().unwrap();
        let edge = root.path().join("edge");
        std::fs::create_dir_all(edge.join("nested")).unwrap();
        std::fs::write(edge.join("env.sh"), "true\n").unwrap();

        let resolved = resolve_context_dir(&edge.join("nested").join("..")).unwrap();
        assert_eq!(resolved, std::fs::canonicalize(&edge).unwrap());

        let config = Config::default();
        let loader = CredentialsDirLoader::new(config.loader_config(root.path()));
        let context = loader.context_at(&resolved).unwrap();
        assert_eq!(context.name, "edge");
    }

    #[test]
    fn test_missing_context_dir_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let err = resolve_context_dir(&root.path().join("absent")).unwrap_err();
        assert!(format!("{:#}", err).contains("not accessible"));
    }
}
