//! Monitoring loop for podwatch
//!
//! This crate provides health evaluation, alert delivery and the scheduling
//! loop that ties context activation, status queries and log harvesting
//! together.

mod health;
mod monitor;
mod notify;

pub use health::{HealthEvaluator, PROBLEM_PHASES};
pub use monitor::{ClusterMonitor, ContextOutcome, ContextReport, MonitorSettings, PassSummary};
pub use notify::{ALERT_TITLE, DesktopNotifier, LogNotifier, Notifier, alert_message};

// Re-export types used in our public API
pub use podwatch_types::{HealthVerdict, NotificationError, PodPhase};
