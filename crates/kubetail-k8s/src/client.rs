//! Kubernetes client for kubetail

use std::fmt::Display;

use anyhow::{Context, Result};
use futures::{AsyncBufReadExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::{ListParams, LogParams};
use kube::config::KubeConfigOptions;
use kube::runtime::{WatchStreamExt, watcher};
use tracing::debug;

use crate::remote::{LineStream, RemoteClient, SourceEventStream};
use kubetail_types::{ContainerId, PodSources, SourceEvent, TailError};

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
}

impl KubeClient {
    /// Connect using the named kubeconfig context, or infer the config
    /// (in-cluster service account, then the current kubeconfig context)
    pub async fn new(context: Option<&str>) -> Result<Self> {
        let config = match context {
            Some(context_name) => kube::Config::from_kubeconfig(&KubeConfigOptions {
                context: Some(context_name.to_string()),
                ..Default::default()
            })
            .await
            .context(format!(
                "Failed to create config for context: {}",
                context_name
            ))?,
            None => kube::Config::infer()
                .await
                .context("Failed to read kubeconfig. Is kubectl configured?")?,
        };

        let client = kube::Client::try_from(config).context("Failed to create Kubernetes client")?;

        Ok(Self::from_client(client))
    }

    pub fn from_client(client: kube::Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl RemoteClient for KubeClient {
    async fn list_sources(&self, namespace: &str) -> kubetail_types::Result<Vec<PodSources>> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| classify(e, format!("pods in {}", namespace)))?;

        Ok(list.items.iter().map(pod_sources).collect())
    }

    async fn watch_sources(&self, namespace: &str) -> kubetail_types::Result<SourceEventStream> {
        debug!(namespace, "watching pods");

        let stream = watcher(self.pods(namespace), watcher::Config::default())
            .default_backoff()
            .filter_map(|event| async move {
                match event {
                    Ok(watcher::Event::Apply(pod) | watcher::Event::InitApply(pod)) => {
                        Some(Ok(SourceEvent::Added(pod_sources(&pod))))
                    }
                    Ok(watcher::Event::Delete(pod)) => {
                        Some(Ok(SourceEvent::Removed(pod_sources(&pod))))
                    }
                    Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
                    Err(e) => Some(Err(TailError::Transport(format!("pod watch: {}", e)))),
                }
            })
            .boxed();

        Ok(stream)
    }

    async fn historical_lines(
        &self,
        id: &ContainerId,
        namespace: &str,
        lines: usize,
    ) -> kubetail_types::Result<Vec<String>> {
        let params = LogParams {
            container: Some(id.container.clone()),
            tail_lines: Some(lines as i64),
            ..Default::default()
        };

        let logs = self
            .pods(namespace)
            .logs(&id.pod, &params)
            .await
            .map_err(|e| classify(e, id))?;

        let lines: Vec<String> = logs.lines().map(str::to_string).collect();
        if lines.is_empty() {
            return Err(TailError::NotReady(format!("No log returned from {}", id)));
        }

        Ok(lines)
    }

    async fn subscribe(
        &self,
        id: &ContainerId,
        namespace: &str,
        replay: usize,
    ) -> kubetail_types::Result<LineStream> {
        let params = LogParams {
            follow: true,
            container: Some(id.container.clone()),
            tail_lines: Some(replay as i64),
            ..Default::default()
        };

        let stream = self
            .pods(namespace)
            .log_stream(&id.pod, &params)
            .await
            .map_err(|e| classify(e, id))?;

        let source = id.to_string();
        Ok(stream
            .lines()
            .map_err(move |e| TailError::Transport(format!("{}: {}", source, e)))
            .boxed())
    }
}

/// Convert a k8s Pod to the names the registry selects on
fn pod_sources(pod: &Pod) -> PodSources {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default();

    PodSources::new(name, containers)
}

/// Map an API failure onto the tail error taxonomy
fn classify(err: kube::Error, target: impl Display) -> TailError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => {
            TailError::NotFound(format!("{}: {}", target, resp.message))
        }
        // "container is waiting to start", "ContainerCreating", ...
        kube::Error::Api(resp) if resp.code == 400 => {
            TailError::NotReady(format!("{}: {}", target, resp.message))
        }
        other => TailError::Transport(format!("{}: {}", target, other)),
    }
}
