//! Operator-visible alerts

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use podwatch_types::{HealthVerdict, NotificationError};

pub const ALERT_TITLE: &str = "Kubernetes Cluster Alert";

/// Message naming the context, namespace and offending phases
pub fn alert_message(context: &str, namespace: &str, verdict: &HealthVerdict) -> String {
    format!(
        "Issues found in cluster {} in namespace {} ({}). Collecting logs.",
        context,
        namespace,
        verdict.describe()
    )
}

/// Delivers a human-readable alert
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotificationError>;
}

/// Desktop notification through `notify-send`
#[derive(Clone, Debug)]
pub struct DesktopNotifier {
    app_name: String,
    expire: Duration,
    timeout: Duration,
}

impl DesktopNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            app_name: "K8s Monitor".to_string(),
            expire: Duration::from_secs(10),
            timeout,
        }
    }

    fn command(&self, title: &str, message: &str) -> Command {
        let mut cmd = Command::new("notify-send");
        cmd.arg("--app-name")
            .arg(&self.app_name)
            .arg("--expire-time")
            .arg(self.expire.as_millis().to_string())
            .arg(title)
            .arg(message)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotificationError> {
        let command = "notify-send".to_string();
        let mut cmd = self.command(title, message);
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(NotificationError::Spawn { command, source }),
            Err(_) => {
                return Err(NotificationError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(NotificationError::Failed {
                command,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(title, "desktop notification sent");
        Ok(())
    }
}

/// Alerts go to the log only, for headless hosts
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotificationError> {
        warn!(title, "{}", message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podwatch_types::PodPhase;

    #[test]
    fn test_alert_message_names_context_and_phases() {
        let verdict = HealthVerdict {
            unhealthy: true,
            offending_phases: [PodPhase::CrashLoopBackOff].into_iter().collect(),
        };
        assert_eq!(
            alert_message("prod", "demo", &verdict),
            "Issues found in cluster prod in namespace demo (CrashLoopBackOff). Collecting logs."
        );
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.notify(ALERT_TITLE, "message").await.is_ok());
    }
}
