use std::fmt;
use std::path::Path;

use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, info, warn};

use podwatch_k8s::ClusterClient;
use podwatch_types::{
    ContainerRef, FetchError, LogArtifact, LogOptions, LogTarget, PodRef, QueryError,
};

use crate::artifact::{ArtifactWriter, sweep_partials};

/// Tuning for a harvest pass
#[derive(Clone, Debug)]
pub struct HarvestOptions {
    /// Container logs fetched at once
    pub fetch_concurrency: usize,
    /// Forwarded to every log fetch
    pub log: LogOptions,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            fetch_concurrency: 4,
            log: LogOptions::default(),
        }
    }
}

/// Why a pod produced no artifacts
#[derive(Debug)]
pub enum SkipReason {
    NoContainers,
    ContainerQuery(QueryError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoContainers => f.write_str("no containers"),
            Self::ContainerQuery(e) => e.fmt(f),
        }
    }
}

#[derive(Debug)]
pub struct SkippedPod {
    pub pod: PodRef,
    pub reason: SkipReason,
}

/// Per-item outcome of one harvest
#[derive(Debug, Default)]
pub struct HarvestReport {
    /// One entry per container, in enumeration order
    pub results: Vec<Result<LogArtifact, FetchError>>,
    pub skipped: Vec<SkippedPod>,
}

impl HarvestReport {
    pub fn artifacts(&self) -> impl Iterator<Item = &LogArtifact> {
        self.results.iter().filter_map(|r| r.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &FetchError> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }
}

/// Enumerates pods → containers and persists one artifact per container
#[derive(Clone, Debug, Default)]
pub struct LogHarvester {
    options: HarvestOptions,
}

impl LogHarvester {
    pub fn new(options: HarvestOptions) -> Self {
        Self { options }
    }

    /// Harvest every container of every pod in `namespace` into `output_dir`
    ///
    /// Only the pod enumeration itself is fatal; container listing and log
    /// fetch failures are recorded per item and never stop the batch.
    pub async fn harvest<C>(
        &self,
        client: &C,
        namespace: &str,
        output_dir: &Path,
    ) -> Result<HarvestReport, QueryError>
    where
        C: ClusterClient + ?Sized,
    {
        let context = client.context_name();
        let pods = client.list_pods(namespace).await?;
        let mut report = HarvestReport::default();

        if pods.is_empty() {
            info!(context, namespace, "no pods found");
            return Ok(report);
        }

        let mut containers = Vec::new();
        for pod in pods {
            match client.list_containers(&pod).await {
                Ok(names) if names.is_empty() => {
                    info!(context, namespace, pod = %pod.name, "no containers found, skipping pod");
                    report.skipped.push(SkippedPod {
                        pod,
                        reason: SkipReason::NoContainers,
                    });
                }
                Ok(names) => {
                    containers.extend(
                        names
                            .into_iter()
                            .map(|name| ContainerRef::new(pod.clone(), name)),
                    );
                }
                Err(e) => {
                    warn!(
                        context,
                        namespace,
                        pod = %pod.name,
                        error = %e,
                        "failed to list containers, skipping pod"
                    );
                    report.skipped.push(SkippedPod {
                        pod,
                        reason: SkipReason::ContainerQuery(e),
                    });
                }
            }
        }

        let stale = sweep_partials(output_dir).await;
        if stale > 0 {
            debug!(context, namespace, stale, "removed partial artifacts from an earlier run");
        }

        report.results = self
            .harvest_containers(client, containers, output_dir)
            .collect()
            .await;

        info!(
            context,
            namespace,
            saved = report.artifacts().count(),
            failed = report.failure_count(),
            skipped = report.skipped.len(),
            "harvest finished"
        );
        Ok(report)
    }

    /// Lazily fetch each container's log with bounded concurrency, yielding
    /// results in the order the containers were given
    pub fn harvest_containers<'a, C>(
        &'a self,
        client: &'a C,
        containers: Vec<ContainerRef>,
        output_dir: &'a Path,
    ) -> impl Stream<Item = Result<LogArtifact, FetchError>> + 'a
    where
        C: ClusterClient + ?Sized,
    {
        stream::iter(containers)
            .map(move |container| self.harvest_container(client, container, output_dir))
            .buffered(self.options.fetch_concurrency.max(1))
    }

    async fn harvest_container<C>(
        &self,
        client: &C,
        container: ContainerRef,
        output_dir: &Path,
    ) -> Result<LogArtifact, FetchError>
    where
        C: ClusterClient + ?Sized,
    {
        let context = client.context_name();
        let result = self.write_artifact(client, &container, output_dir).await;
        match &result {
            Ok(artifact) => info!(
                context,
                namespace = %container.pod.namespace,
                pod = %container.pod.name,
                container = %container.container_name,
                path = %artifact.file_path.display(),
                bytes = artifact.bytes_written,
                "saved container logs"
            ),
            Err(e) => warn!(
                context,
                namespace = %container.pod.namespace,
                pod = %container.pod.name,
                container = %container.container_name,
                error = %e,
                "failed to harvest container logs"
            ),
        }
        result
    }

    async fn write_artifact<C>(
        &self,
        client: &C,
        container: &ContainerRef,
        output_dir: &Path,
    ) -> Result<LogArtifact, FetchError>
    where
        C: ClusterClient + ?Sized,
    {
        let mut writer = ArtifactWriter::create(output_dir, container).await?;
        let target = LogTarget::Container(container.clone());

        let fetched = client
            .fetch_log(&target, &self.options.log, writer.file())
            .await;
        match fetched {
            Ok(bytes_written) => {
                let file_path = writer.commit().await?;
                Ok(LogArtifact {
                    target,
                    file_path,
                    bytes_written,
                    harvested_at: Utc::now(),
                })
            }
            Err(e) => {
                writer.discard().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podwatch_k8s::fake::FakeCluster;
    use podwatch_types::PodPhase;

    fn demo_cluster() -> FakeCluster {
        FakeCluster::new("prod")
            .pod("demo", "web-1", PodPhase::Running)
            .container("web-1", "app", "app started\n")
            .container("web-1", "sidecar", "proxy ready\n")
            .pod("demo", "db-1", PodPhase::CrashLoopBackOff)
            .container("db-1", "db", "panic: disk full\n")
    }

    fn file_names(report: &HarvestReport) -> Vec<String> {
        report
            .artifacts()
            .map(|a| a.file_path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_harvest_writes_one_artifact_per_container() {
        let dir = tempfile::tempdir().unwrap();
        let report = LogHarvester::default()
            .harvest(&demo_cluster(), "demo", dir.path())
            .await
            .unwrap();

        assert_eq!(
            file_names(&report),
            vec!["web-1_app.log", "web-1_sidecar.log", "db-1_db.log"]
        );
        assert_eq!(report.failure_count(), 0);
        let db = std::fs::read_to_string(dir.path().join("db-1_db.log")).unwrap();
        assert_eq!(db, "panic: disk full\n");
    }

    #[tokio::test]
    async fn test_always_fetches_explicit_container() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = demo_cluster();
        LogHarvester::default()
            .harvest(&cluster, "demo", dir.path())
            .await
            .unwrap();

        // Fetches overlap, so only the set of targets is stable.
        let mut fetched = cluster.fetched();
        fetched.sort();
        assert_eq!(
            fetched,
            vec!["demo/db-1/db", "demo/web-1/app", "demo/web-1/sidecar"]
        );
    }

    #[tokio::test]
    async fn test_pod_without_containers_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new("prod").pod("demo", "init-0", PodPhase::Pending);
        let report = LogHarvester::default()
            .harvest(&cluster, "demo", dir.path())
            .await
            .unwrap();

        assert!(report.results.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].pod.name, "init-0");
        assert!(matches!(report.skipped[0].reason, SkipReason::NoContainers));
    }

    #[tokio::test]
    async fn test_failed_sibling_does_not_suppress_success() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = FakeCluster::new("prod")
            .pod("demo", "web-1", PodPhase::Error)
            .failing_container("web-1", "a", "container a is not valid")
            .container("web-1", "b", "ok\n");
        let report = LogHarvester::new(HarvestOptions {
            fetch_concurrency: 1,
            ..Default::default()
        })
        .harvest(&cluster, "demo", dir.path())
        .await
        .unwrap();

        assert_eq!(report.results.len(), 2);
        assert!(matches!(report.results[0], Err(FetchError::Stream { .. })));
        assert_eq!(file_names(&report), vec!["web-1_b.log"]);
        assert!(!dir.path().join("web-1_a.log").exists());
    }

    #[tokio::test]
    async fn test_container_listing_failure_skips_only_that_pod() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = demo_cluster().failing_container_listing("web-1");
        let report = LogHarvester::default()
            .harvest(&cluster, "demo", dir.path())
            .await
            .unwrap();

        assert_eq!(file_names(&report), vec!["db-1_db.log"]);
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::ContainerQuery(_)
        ));
    }

    #[tokio::test]
    async fn test_pod_listing_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = demo_cluster().failing_namespace("demo");
        let result = LogHarvester::default()
            .harvest(&cluster, "demo", dir.path())
            .await;

        assert!(matches!(result, Err(QueryError::Api { .. })));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_empty_namespace_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("logs");
        let report = LogHarvester::default()
            .harvest(&demo_cluster(), "empty", &out)
            .await
            .unwrap();

        assert!(report.results.is_empty());
        assert!(report.skipped.is_empty());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_reharvest_reuses_paths() {
        let dir = tempfile::tempdir().unwrap();
        let harvester = LogHarvester::default();
        let first = harvester
            .harvest(&demo_cluster(), "demo", dir.path())
            .await
            .unwrap();
        let second = harvester
            .harvest(&demo_cluster(), "demo", dir.path())
            .await
            .unwrap();

        let paths = |r: &HarvestReport| {
            r.artifacts()
                .map(|a| a.file_path.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(paths(&first), paths(&second));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[tokio::test]
    async fn test_harvest_clears_abandoned_partials() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("web-1_app.log.partial"), "cut short").unwrap();
        std::fs::write(dir.path().join("gone-0_app.log.partial"), "cut short").unwrap();

        LogHarvester::default()
            .harvest(&demo_cluster(), "demo", dir.path())
            .await
            .unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["db-1_db.log", "web-1_app.log", "web-1_sidecar.log"]);
    }
}
