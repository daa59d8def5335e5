//! In-memory cluster and loader for tests

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use crate::client::{ClusterClient, LogSink, sole_container};
use crate::context::ContextLoader;
use podwatch_types::{
    ActivationError, ClusterContext, CredentialKind, FetchError, LogOptions, LogTarget, PodPhase,
    PodRef, QueryError,
};

#[derive(Clone, Debug)]
struct FakePod {
    pod: PodRef,
    phase: PodPhase,
    containers: Option<Vec<String>>,
    logs: BTreeMap<String, Result<String, String>>,
}

/// Scripted cluster: pods, containers and per-container log outcomes
#[derive(Clone, Debug, Default)]
pub struct FakeCluster {
    context: String,
    pods: Vec<FakePod>,
    failing_namespaces: Vec<String>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl FakeCluster {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            ..Default::default()
        }
    }

    /// Add a pod with no containers yet
    pub fn pod(mut self, namespace: &str, name: &str, phase: PodPhase) -> Self {
        self.pods.push(FakePod {
            pod: PodRef::new(name, namespace),
            phase,
            containers: Some(Vec::new()),
            logs: BTreeMap::new(),
        });
        self
    }

    /// Add a container whose log fetch yields `log`
    pub fn container(self, pod: &str, container: &str, log: &str) -> Self {
        self.with_container(pod, container, Ok(log.to_string()))
    }

    /// Add a container whose log fetch fails with `message`
    pub fn failing_container(self, pod: &str, container: &str, message: &str) -> Self {
        self.with_container(pod, container, Err(message.to_string()))
    }

    /// Make container listing fail for a pod
    pub fn failing_container_listing(mut self, pod: &str) -> Self {
        if let Some(p) = self.pods.iter_mut().find(|p| p.pod.name == pod) {
            p.containers = None;
        }
        self
    }

    /// Make every namespace-wide query fail for `namespace`
    pub fn failing_namespace(mut self, namespace: &str) -> Self {
        self.failing_namespaces.push(namespace.to_string());
        self
    }

    /// Targets fetched so far, in call order
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }

    fn with_container(mut self, pod: &str, container: &str, log: Result<String, String>) -> Self {
        if let Some(p) = self.pods.iter_mut().find(|p| p.pod.name == pod) {
            p.containers
                .get_or_insert_with(Vec::new)
                .push(container.to_string());
            p.logs.insert(container.to_string(), log);
        }
        self
    }

    fn check_namespace(&self, operation: &'static str, namespace: &str) -> Result<(), QueryError> {
        if self.failing_namespaces.iter().any(|n| n == namespace) {
            return Err(QueryError::Api {
                operation,
                namespace: namespace.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn find(&self, pod: &PodRef) -> Option<&FakePod> {
        self.pods.iter().find(|p| &p.pod == pod)
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    fn context_name(&self) -> &str {
        &self.context
    }

    async fn pod_phases(&self, namespace: &str) -> Result<Vec<PodPhase>, QueryError> {
        self.check_namespace("pod status query", namespace)?;
        Ok(self
            .pods
            .iter()
            .filter(|p| p.pod.namespace == namespace)
            .map(|p| p.phase)
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRef>, QueryError> {
        self.check_namespace("pod listing", namespace)?;
        Ok(self
            .pods
            .iter()
            .filter(|p| p.pod.namespace == namespace)
            .map(|p| p.pod.clone())
            .collect())
    }

    async fn list_containers(&self, pod: &PodRef) -> Result<Vec<String>, QueryError> {
        match self.find(pod).map(|p| p.containers.clone()) {
            Some(Some(containers)) => Ok(containers),
            Some(None) => Err(QueryError::Api {
                operation: "container listing",
                namespace: pod.namespace.clone(),
                message: format!("pods \"{}\" is forbidden", pod.name),
            }),
            None => Err(QueryError::Api {
                operation: "container listing",
                namespace: pod.namespace.clone(),
                message: format!("pods \"{}\" not found", pod.name),
            }),
        }
    }

    async fn fetch_log(
        &self,
        target: &LogTarget,
        _options: &LogOptions,
        sink: &mut LogSink<'_>,
    ) -> Result<u64, FetchError> {
        self.fetched.lock().push(target.to_string());
        let stream_error = |message: String| FetchError::Stream {
            target: target.to_string(),
            message,
        };

        let pod = self
            .find(target.pod())
            .ok_or_else(|| stream_error("pod not found".to_string()))?;
        let container = match target.container_name() {
            Some(name) => name.to_string(),
            None => {
                let containers = pod.containers.clone().unwrap_or_default();
                sole_container(target.pod(), containers)?
                    .ok_or_else(|| stream_error("pod has no containers".to_string()))?
            }
        };

        match pod.logs.get(&container) {
            Some(Ok(log)) => {
                sink.write_all(log.as_bytes())
                    .await
                    .map_err(|e| stream_error(e.to_string()))?;
                Ok(log.len() as u64)
            }
            Some(Err(message)) => Err(stream_error(message.clone())),
            None => Err(stream_error("container not found".to_string())),
        }
    }
}

/// Scripted credentials root: each context activates to a cluster or fails
#[derive(Clone, Debug, Default)]
pub struct FakeLoader {
    contexts: Vec<(ClusterContext, Result<FakeCluster, String>)>,
    activations: Arc<Mutex<Vec<String>>>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(mut self, cluster: FakeCluster) -> Self {
        let context = fake_context(&cluster.context);
        self.contexts.push((context, Ok(cluster)));
        self
    }

    pub fn failing_context(mut self, name: &str, message: &str) -> Self {
        self.contexts
            .push((fake_context(name), Err(message.to_string())));
        self
    }

    /// Context names activated so far, in call order
    pub fn activations(&self) -> Vec<String> {
        self.activations.lock().clone()
    }
}

fn fake_context(name: &str) -> ClusterContext {
    ClusterContext::new(
        name,
        PathBuf::from(format!("/credentials/{}/env.sh", name)),
        CredentialKind::ActivationScript,
    )
}

#[async_trait]
impl ContextLoader for FakeLoader {
    type Client = FakeCluster;

    fn list_contexts(&self) -> std::io::Result<Vec<ClusterContext>> {
        Ok(self.contexts.iter().map(|(c, _)| c.clone()).collect())
    }

    async fn activate(&self, context: &ClusterContext) -> Result<FakeCluster, ActivationError> {
        self.activations.lock().push(context.name.clone());
        match self.contexts.iter().find(|(c, _)| c.name == context.name) {
            Some((_, Ok(cluster))) => Ok(cluster.clone()),
            Some((_, Err(message))) => Err(ActivationError::ScriptFailed {
                path: context.credentials_path.clone(),
                status: Some(1),
                stderr: message.clone(),
            }),
            None => Err(ActivationError::Kubeconfig {
                context: context.name.clone(),
                message: "unknown context".to_string(),
            }),
        }
    }
}
