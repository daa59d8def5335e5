//! The multi-cluster monitoring loop

use std::path::PathBuf;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use podwatch_k8s::{ClusterClient, ContextLoader};
use podwatch_logs::{HarvestReport, LogHarvester};
use podwatch_types::{
    ActivationError, ClusterContext, HealthVerdict, NotificationError, QueryError,
};

use crate::health::HealthEvaluator;
use crate::notify::{ALERT_TITLE, Notifier, alert_message};

/// Immutable settings shared by every pass
#[derive(Clone, Debug)]
pub struct MonitorSettings {
    /// Namespace checked in every context
    pub namespace: String,
    /// Artifacts land in `<output_dir>/<context>/`
    pub output_dir: PathBuf,
    /// Pause between the end of one pass and the start of the next
    pub interval: Duration,
    /// Contexts checked at once; 1 keeps passes strictly sequential
    pub context_concurrency: usize,
    /// How long an in-flight pass may run after shutdown is requested
    pub shutdown_grace: Duration,
}

impl MonitorSettings {
    pub fn new(namespace: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            namespace: namespace.into(),
            output_dir: output_dir.into(),
            interval: Duration::from_secs(600),
            context_concurrency: 1,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// What happened to one context during a pass
#[derive(Debug)]
pub enum ContextOutcome {
    /// Credentials could not be applied; the context was skipped
    ActivationFailed(ActivationError),
    /// The status query failed; the context was skipped
    QueryFailed(QueryError),
    Healthy,
    /// Problem phases were found, an alert was raised and logs were harvested
    Alerted {
        verdict: HealthVerdict,
        notification: Result<(), NotificationError>,
        harvest: Result<HarvestReport, QueryError>,
    },
}

#[derive(Debug)]
pub struct ContextReport {
    pub context: String,
    pub outcome: ContextOutcome,
}

/// Per-context outcomes of one pass, in processing order
#[derive(Debug, Default)]
pub struct PassSummary {
    pub contexts: Vec<ContextReport>,
}

impl PassSummary {
    pub fn get(&self, context: &str) -> Option<&ContextOutcome> {
        self.contexts
            .iter()
            .find(|r| r.context == context)
            .map(|r| &r.outcome)
    }

    pub fn unhealthy_count(&self) -> usize {
        self.contexts
            .iter()
            .filter(|r| matches!(r.outcome, ContextOutcome::Alerted { .. }))
            .count()
    }
}

/// Activates each context in turn, evaluates pod health and, on trouble,
/// alerts and harvests logs
pub struct ClusterMonitor<L, N> {
    loader: L,
    notifier: N,
    harvester: LogHarvester,
    settings: MonitorSettings,
}

impl<L, N> ClusterMonitor<L, N>
where
    L: ContextLoader,
    N: Notifier,
{
    pub fn new(loader: L, notifier: N, harvester: LogHarvester, settings: MonitorSettings) -> Self {
        Self {
            loader,
            notifier,
            harvester,
            settings,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Run passes until `shutdown` is cancelled, returning the number of
    /// passes that completed
    ///
    /// A pass in flight when shutdown arrives gets the grace period to finish
    /// and is dropped after that.
    pub async fn run(&self, shutdown: CancellationToken) -> usize {
        let mut completed = 0;

        while !shutdown.is_cancelled() {
            let pass = self.run_pass();
            tokio::pin!(pass);

            tokio::select! {
                biased;

                _ = &mut pass => completed += 1,

                _ = shutdown.cancelled() => {
                    let grace = self.settings.shutdown_grace;
                    info!(?grace, "shutdown requested, waiting for in-flight pass");
                    match tokio::time::timeout(grace, &mut pass).await {
                        Ok(_) => {
                            completed += 1;
                            info!("in-flight pass finished");
                        }
                        Err(_) => warn!(?grace, "in-flight pass aborted after grace period"),
                    }
                    break;
                }
            }

            info!(
                interval_secs = self.settings.interval.as_secs(),
                "waiting before the next check"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        info!(passes = completed, "monitor stopped");
        completed
    }

    /// One pass over every context currently on disk
    pub async fn run_pass(&self) -> PassSummary {
        let contexts = match self.loader.list_contexts() {
            Ok(contexts) => contexts,
            Err(e) => {
                error!(error = %e, "failed to enumerate cluster contexts");
                Vec::new()
            }
        };
        info!(
            contexts = contexts.len(),
            namespace = %self.settings.namespace,
            "starting monitoring pass"
        );

        let reports = stream::iter(contexts)
            .map(|context| self.check_context(context))
            .buffered(self.settings.context_concurrency.max(1))
            .collect()
            .await;

        PassSummary { contexts: reports }
    }

    async fn check_context(&self, context: ClusterContext) -> ContextReport {
        let outcome = self.evaluate_context(&context).await;
        ContextReport {
            context: context.name,
            outcome,
        }
    }

    async fn evaluate_context(&self, context: &ClusterContext) -> ContextOutcome {
        let name = context.name.as_str();
        let namespace = self.settings.namespace.as_str();

        debug!(context = name, "activating context");
        let client = match self.loader.activate(context).await {
            Ok(client) => client,
            Err(e) => {
                warn!(context = name, error = %e, "failed to activate context, skipping");
                return ContextOutcome::ActivationFailed(e);
            }
        };

        debug!(context = name, namespace, "querying pod status");
        let phases = match client.pod_phases(namespace).await {
            Ok(phases) => phases,
            Err(e) => {
                warn!(
                    context = name,
                    namespace,
                    error = %e,
                    "failed to query pod status, skipping"
                );
                return ContextOutcome::QueryFailed(e);
            }
        };

        let verdict = HealthEvaluator::evaluate(&phases);
        if !verdict.unhealthy {
            info!(context = name, namespace, pods = phases.len(), "no issues found");
            return ContextOutcome::Healthy;
        }

        warn!(
            context = name,
            namespace,
            phases = %verdict.describe(),
            "issues found, collecting logs"
        );
        let notification = self
            .notifier
            .notify(ALERT_TITLE, &alert_message(name, namespace, &verdict))
            .await;
        if let Err(e) = &notification {
            warn!(context = name, error = %e, "failed to deliver alert");
        }

        let output_dir = self.settings.output_dir.join(name);
        let harvest = self.harvester.harvest(&client, namespace, &output_dir).await;
        match &harvest {
            Ok(report) => info!(
                context = name,
                namespace,
                saved = report.artifacts().count(),
                failed = report.failure_count(),
                dir = %output_dir.display(),
                "logs collected"
            ),
            Err(e) => warn!(context = name, namespace, error = %e, "failed to collect logs"),
        }

        ContextOutcome::Alerted {
            verdict,
            notification,
            harvest,
        }
    }
}
