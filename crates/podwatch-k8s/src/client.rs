//! Per-context Kubernetes client

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::Api;
use kube::api::{ListParams, LogParams};
use kube::config::Kubeconfig;
use tokio::io::AsyncWrite;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::debug;

use podwatch_types::{
    ActivationError, FetchError, LogOptions, LogTarget, PodPhase, PodRef, QueryError,
};

/// Destination a log stream is copied into
pub type LogSink<'a> = dyn AsyncWrite + Send + Unpin + 'a;

/// Cluster queries scoped to one activated context
///
/// Implementations hold no state between calls beyond their connection handle.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Name of the context this client was activated for
    fn context_name(&self) -> &str;

    /// Status of every pod in the namespace; empty when there are no pods
    async fn pod_phases(&self, namespace: &str) -> Result<Vec<PodPhase>, QueryError>;

    /// Every pod in the namespace
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRef>, QueryError>;

    /// Container names of a pod, in declaration order
    async fn list_containers(&self, pod: &PodRef) -> Result<Vec<String>, QueryError>;

    /// Stream the log of `target` into `sink`, returning the number of bytes copied
    async fn fetch_log(
        &self,
        target: &LogTarget,
        options: &LogOptions,
        sink: &mut LogSink<'_>,
    ) -> Result<u64, FetchError>;
}

/// Timeouts applied to every backend call
#[derive(Clone, Copy, Debug)]
pub struct ClientTimeouts {
    /// Listing pods, phases and containers, and opening a log stream
    pub request: Duration,
    /// Opening and draining one log stream
    pub fetch: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            fetch: Duration::from_secs(120),
        }
    }
}

/// [`ClusterClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterClient {
    client: kube::Client,
    context: String,
    timeouts: ClientTimeouts,
}

impl KubeClusterClient {
    pub fn new(client: kube::Client, context: impl Into<String>, timeouts: ClientTimeouts) -> Self {
        Self {
            client,
            context: context.into(),
            timeouts,
        }
    }

    /// Client for the ambient kubeconfig (`KUBECONFIG`, `~/.kube/config` or in-cluster)
    pub async fn from_default(timeouts: ClientTimeouts) -> Result<Self, ActivationError> {
        let context = Kubeconfig::read()
            .ok()
            .and_then(|k| k.current_context)
            .unwrap_or_else(|| "in-cluster".to_string());

        let mut config = kube::Config::infer()
            .await
            .map_err(|e| ActivationError::Kubeconfig {
                context: context.clone(),
                message: e.to_string(),
            })?;
        config.connect_timeout = Some(timeouts.request);

        let client = kube::Client::try_from(config).map_err(|e| ActivationError::Client {
            context: context.clone(),
            message: e.to_string(),
        })?;
        Ok(Self::new(client, context, timeouts))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn query<T, F>(
        &self,
        operation: &'static str,
        namespace: &str,
        fut: F,
    ) -> Result<T, QueryError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeouts.request, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(QueryError::Api {
                operation,
                namespace: namespace.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(QueryError::Timeout {
                operation,
                namespace: namespace.to_string(),
                timeout: self.timeouts.request,
            }),
        }
    }

    async fn list_namespace(
        &self,
        operation: &'static str,
        namespace: &str,
    ) -> Result<Vec<Pod>, QueryError> {
        let pods = self.pods(namespace);
        let list = self
            .query(operation, namespace, pods.list(&ListParams::default()))
            .await?;
        Ok(list.items)
    }

    async fn copy_log(
        &self,
        pod: &PodRef,
        container: Option<String>,
        options: &LogOptions,
        sink: &mut LogSink<'_>,
        target: &str,
    ) -> Result<u64, FetchError> {
        let params = LogParams {
            follow: false,
            container,
            tail_lines: options.tail_lines,
            since_seconds: options.since_seconds,
            ..Default::default()
        };
        let pods = self.pods(&pod.namespace);

        let stream = match tokio::time::timeout(
            self.timeouts.request,
            pods.log_stream(&pod.name, &params),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(FetchError::Stream {
                    target: target.to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(FetchError::Timeout {
                    target: target.to_string(),
                    timeout: self.timeouts.request,
                });
            }
        };

        let mut reader = Box::pin(stream).compat();
        tokio::io::copy(&mut reader, sink)
            .await
            .map_err(|e| FetchError::Stream {
                target: target.to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    fn context_name(&self) -> &str {
        &self.context
    }

    async fn pod_phases(&self, namespace: &str) -> Result<Vec<PodPhase>, QueryError> {
        let pods = self.list_namespace("pod status query", namespace).await?;
        Ok(pods.iter().map(effective_phase).collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRef>, QueryError> {
        let pods = self.list_namespace("pod listing", namespace).await?;
        Ok(pods
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .map(|name| PodRef::new(name, namespace))
            .collect())
    }

    async fn list_containers(&self, pod: &PodRef) -> Result<Vec<String>, QueryError> {
        let api = self.pods(&pod.namespace);
        let found = self
            .query("container listing", &pod.namespace, api.get(&pod.name))
            .await?;
        Ok(found
            .spec
            .map(|spec| spec.containers.into_iter().map(|c| c.name).collect())
            .unwrap_or_default())
    }

    async fn fetch_log(
        &self,
        target: &LogTarget,
        options: &LogOptions,
        sink: &mut LogSink<'_>,
    ) -> Result<u64, FetchError> {
        let label = target.to_string();
        let (pod, container) = match target {
            LogTarget::Container(c) => (&c.pod, Some(c.container_name.clone())),
            LogTarget::Pod(pod) => {
                let containers = self
                    .list_containers(pod)
                    .await
                    .map_err(|e| FetchError::Stream {
                        target: label.clone(),
                        message: e.to_string(),
                    })?;
                (pod, sole_container(pod, containers)?)
            }
        };

        debug!(context = %self.context, target = %label, "fetching log stream");
        match tokio::time::timeout(
            self.timeouts.fetch,
            self.copy_log(pod, container, options, sink, &label),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                target: label,
                timeout: self.timeouts.fetch,
            }),
        }
    }
}

/// The container a pod-only fetch resolves to
///
/// A single container is named explicitly; a pod with more than one is
/// refused rather than guessed.
pub fn sole_container(
    pod: &PodRef,
    containers: Vec<String>,
) -> Result<Option<String>, FetchError> {
    match containers.len() {
        0 => Ok(None),
        1 => Ok(containers.into_iter().next()),
        _ => Err(FetchError::AmbiguousContainer {
            pod: pod.to_string(),
            containers,
        }),
    }
}

/// Status of a pod the way kubectl's STATUS column reports it
///
/// A crash-looping container outranks the pod phase, and a container that
/// terminated with `Error` marks a pod that is no longer running.
pub fn effective_phase(pod: &Pod) -> PodPhase {
    let Some(status) = pod.status.as_ref() else {
        return PodPhase::Unknown;
    };
    let phase = status
        .phase
        .as_deref()
        .map(PodPhase::from)
        .unwrap_or(PodPhase::Unknown);

    let containers: Vec<&ContainerStatus> = status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .collect();

    let waiting_reason = |cs: &&ContainerStatus| {
        cs.state
            .as_ref()
            .and_then(|s| s.waiting.as_ref())
            .and_then(|w| w.reason.clone())
    };
    if containers
        .iter()
        .any(|cs| waiting_reason(cs).as_deref() == Some("CrashLoopBackOff"))
    {
        return PodPhase::CrashLoopBackOff;
    }

    if phase != PodPhase::Running && phase != PodPhase::Succeeded {
        let terminated_with_error = containers.iter().any(|cs| {
            cs.state
                .as_ref()
                .and_then(|s| s.terminated.as_ref())
                .and_then(|t| t.reason.as_deref())
                == Some("Error")
        });
        if terminated_with_error {
            return PodPhase::Error;
        }
    }

    phase
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStateWaiting, PodStatus,
    };

    fn pod_with(phase: &str, states: Vec<ContainerState>) -> Pod {
        let statuses = states
            .into_iter()
            .enumerate()
            .map(|(i, state)| ContainerStatus {
                name: format!("c{}", i),
                state: Some(state),
                ..Default::default()
            })
            .collect();
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(statuses),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn waiting(reason: &str) -> ContainerState {
        ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn terminated(reason: &str) -> ContainerState {
        ContainerState {
            terminated: Some(ContainerStateTerminated {
                reason: Some(reason.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// A client pointed at a socket that accepts connections but never answers
    async fn unresponsive_client() -> (KubeClusterClient, tokio::net::TcpListener) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = kube::Config::new(format!("http://{}", addr).parse().unwrap());
        let client = kube::Client::try_from(config).unwrap();
        let timeouts = ClientTimeouts {
            request: Duration::from_millis(200),
            fetch: Duration::from_millis(400),
        };
        (KubeClusterClient::new(client, "hung", timeouts), listener)
    }

    #[tokio::test]
    async fn test_unanswered_query_times_out() {
        let (client, _listener) = unresponsive_client().await;
        let err = client.pod_phases("demo").await.unwrap_err();
        assert!(matches!(err, QueryError::Timeout { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_unanswered_log_fetch_times_out() {
        let (client, _listener) = unresponsive_client().await;
        let target = LogTarget::Container(podwatch_types::ContainerRef::new(
            PodRef::new("web-1", "demo"),
            "app",
        ));
        let mut sink: Vec<u8> = Vec::new();
        let err = client
            .fetch_log(&target, &LogOptions::default(), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }), "{err}");
        assert!(sink.is_empty());
    }

    #[test]
    fn test_plain_phase() {
        let pod = pod_with("Running", vec![ContainerState::default()]);
        assert_eq!(effective_phase(&pod), PodPhase::Running);
        assert_eq!(effective_phase(&Pod::default()), PodPhase::Unknown);
    }

    #[test]
    fn test_crash_loop_outranks_running() {
        let pod = pod_with(
            "Running",
            vec![ContainerState::default(), waiting("CrashLoopBackOff")],
        );
        assert_eq!(effective_phase(&pod), PodPhase::CrashLoopBackOff);
    }

    #[test]
    fn test_terminated_error_on_failed_pod() {
        let pod = pod_with("Failed", vec![terminated("Error")]);
        assert_eq!(effective_phase(&pod), PodPhase::Error);

        let completed = pod_with("Succeeded", vec![terminated("Completed")]);
        assert_eq!(effective_phase(&completed), PodPhase::Succeeded);
    }

    #[test]
    fn test_sole_container_refuses_multi_container_pod() {
        let pod = PodRef::new("web-1", "demo");
        let err = sole_container(&pod, vec!["app".into(), "sidecar".into()]).unwrap_err();
        match err {
            FetchError::AmbiguousContainer { pod, containers } => {
                assert_eq!(pod, "demo/web-1");
                assert_eq!(containers, vec!["app", "sidecar"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(
            sole_container(&pod, vec!["app".into()]).unwrap().as_deref(),
            Some("app")
        );
        assert_eq!(sole_container(&pod, Vec::new()).unwrap(), None);
    }

    #[test]
    fn test_image_pull_wait_keeps_pending() {
        let pod = pod_with("Pending", vec![waiting("ImagePullBackOff")]);
        assert_eq!(effective_phase(&pod), PodPhase::Pending);
    }
}
