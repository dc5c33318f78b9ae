use std::future::Future;

use futures::stream::BoxStream;
use kubetail_types::{ContainerId, PodSources, Result, SourceEvent};

/// Live lines of one container, in the order the backend produced them
pub type LineStream = BoxStream<'static, Result<String>>;

/// Pod appearance/disappearance notifications
pub type SourceEventStream = BoxStream<'static, Result<SourceEvent>>;

/// Everything the tail engine needs from a remote log backend
pub trait RemoteClient: Send + Sync + 'static {
    /// Point-in-time listing of the pods in `namespace`
    fn list_sources(&self, namespace: &str)
    -> impl Future<Output = Result<Vec<PodSources>>> + Send;

    /// Pod events in `namespace`, until the stream is dropped
    fn watch_sources(
        &self,
        namespace: &str,
    ) -> impl Future<Output = Result<SourceEventStream>> + Send;

    /// The last `lines` lines of a container log.
    ///
    /// Fails with `NotReady` when the container exists but has nothing to
    /// return yet, and `NotFound` when the pod or container does not exist.
    fn historical_lines(
        &self,
        id: &ContainerId,
        namespace: &str,
        lines: usize,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Follow a container log. The stream starts by replaying at most
    /// `replay` already-written lines.
    fn subscribe(
        &self,
        id: &ContainerId,
        namespace: &str,
        replay: usize,
    ) -> impl Future<Output = Result<LineStream>> + Send;
}
