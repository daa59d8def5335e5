use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::NotifierKind;

/// podwatch - watch Kubernetes clusters for unhealthy pods and harvest their logs
#[derive(Parser, Debug)]
#[command(name = "podwatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll every cluster under the credentials root until interrupted
    Monitor(MonitorArgs),
    /// Collect logs from every container in a namespace once
    Harvest(HarvestArgs),
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Directory with one subdirectory of credentials per cluster
    #[arg(long, value_name = "DIR")]
    pub credentials_root: Option<PathBuf>,

    /// Namespace to check in every cluster
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Directory harvested logs are written to
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Seconds between passes
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// How alerts are delivered
    #[arg(long, value_enum)]
    pub notifier: Option<NotifierKind>,

    /// Run a single pass and exit
    #[arg(long)]
    pub once: bool,

    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Args, Debug)]
pub struct HarvestArgs {
    /// Namespace to collect logs from
    #[arg(short = 'n', long)]
    pub namespace: String,

    /// Directory to save logs to
    #[arg(long, visible_alias = "output-dir", value_name = "DIR")]
    pub logs_dir: Option<PathBuf>,

    /// A single credentials directory to use instead of the current kubeconfig
    #[arg(long, value_name = "DIR")]
    pub context_dir: Option<PathBuf>,

    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Args, Debug, Default)]
pub struct LogArgs {
    /// Only fetch the last N lines of each container log
    #[arg(long, value_name = "N")]
    pub tail_lines: Option<i64>,

    /// Only fetch log lines newer than this many seconds
    #[arg(long, value_name = "SECS")]
    pub since_seconds: Option<i64>,
}
