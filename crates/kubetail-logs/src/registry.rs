use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use kubetail_k8s::RemoteClient;
use kubetail_types::{ContainerId, Result, SourceEvent, SourceQuery};

/// A change to the set of selected sources
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(ContainerId),
    Removed(ContainerId),
}

/// Tracks which containers match the query and are being tailed
///
/// The known set is only touched under its lock, so the discovery watch and
/// the orchestrator can both consult it.
pub struct SourceRegistry<C> {
    client: Arc<C>,
    query: SourceQuery,
    namespace: String,
    known: Arc<RwLock<HashSet<ContainerId>>>,
}

impl<C> Clone for SourceRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            query: self.query.clone(),
            namespace: self.namespace.clone(),
            known: Arc::clone(&self.known),
        }
    }
}

impl<C: RemoteClient> SourceRegistry<C> {
    pub fn new(client: Arc<C>, query: SourceQuery, namespace: impl Into<String>) -> Self {
        Self {
            client,
            query,
            namespace: namespace.into(),
            known: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Containers currently matching the query
    pub async fn list(&self) -> Result<Vec<ContainerId>> {
        let pods = self.client.list_sources(&self.namespace).await?;
        Ok(pods.iter().flat_map(|pod| self.query.select(pod)).collect())
    }

    /// Mark `id` as tailed; false if it already was
    pub fn track(&self, id: &ContainerId) -> bool {
        self.known.write().insert(id.clone())
    }

    /// Turn a raw pod event into registry changes, updating the known set.
    ///
    /// Updates of an already tracked container are ignored, and so are
    /// removals of containers that were never tracked.
    pub fn apply(&self, event: SourceEvent) -> Vec<RegistryEvent> {
        match event {
            SourceEvent::Added(pod) => {
                let mut known = self.known.write();
                self.query
                    .select(&pod)
                    .into_iter()
                    .filter(|id| known.insert(id.clone()))
                    .map(RegistryEvent::Added)
                    .collect()
            }
            SourceEvent::Removed(pod) => {
                let mut known = self.known.write();
                let mut removed: Vec<ContainerId> =
                    known.iter().filter(|id| id.pod == pod.name).cloned().collect();
                removed.sort();
                for id in &removed {
                    known.remove(id);
                }
                removed.into_iter().map(RegistryEvent::Removed).collect()
            }
        }
    }

    /// Forward registry changes to `events` until `cancel` fires or the
    /// backing watch ends
    pub async fn watch(
        &self,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<RegistryEvent>,
    ) -> Result<()> {
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            stream = self.client.watch_sources(&self.namespace) => stream?,
        };

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    for change in self.apply(event) {
                        debug!(?change, "source registry changed");
                        if events.send(change).is_err() {
                            return Ok(());
                        }
                    }
                }
                Some(Err(e)) => {
                    // The watcher backs off and resumes on its own
                    warn!(error = %e, "source watch failed");
                }
                None => {
                    debug!("source watch ended");
                    return Ok(());
                }
            }
        }
    }
}
