use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::source::{FollowEnd, LineSource};
use crate::stitch::{DEFAULT_STITCH_TIMEOUT, StreamStitcher};
use kubetail_k8s::RemoteClient;
use kubetail_types::{ContainerId, Result, SourceIdentity};

/// Lines the follow stream replays beyond the history depth, so lines written
/// between the history fetch and the subscription still reach the stitcher
pub const DEFAULT_REPLAY_OVERLAP: usize = 100;

/// Tails one container through a [`RemoteClient`]
pub struct RemoteTailer<C> {
    client: Arc<C>,
    id: ContainerId,
    identity: SourceIdentity,
    namespace: String,

    /// Size of the last history fetch
    replay: usize,
    overlap: usize,

    /// Last history line, the stitching sentinel
    last_line: Option<String>,

    stitch_timeout: Duration,
}

impl<C: RemoteClient> RemoteTailer<C> {
    pub fn new(client: Arc<C>, id: ContainerId, namespace: impl Into<String>) -> Self {
        Self {
            client,
            identity: SourceIdentity::Container(id.clone()),
            id,
            namespace: namespace.into(),
            replay: 0,
            overlap: DEFAULT_REPLAY_OVERLAP,
            last_line: None,
            stitch_timeout: DEFAULT_STITCH_TIMEOUT,
        }
    }

    pub fn with_stitch_timeout(mut self, stitch_timeout: Duration) -> Self {
        self.stitch_timeout = stitch_timeout;
        self
    }

    #[cfg(test)]
    fn with_replay_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }
}

impl<C: RemoteClient> LineSource for RemoteTailer<C> {
    fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    async fn last_lines(&mut self, n: usize) -> Result<Vec<String>> {
        let lines = self
            .client
            .historical_lines(&self.id, &self.namespace, n)
            .await?;

        self.replay = n;
        self.last_line = lines.last().cloned();
        Ok(lines)
    }

    async fn follow<F>(&mut self, cancel: &CancellationToken, mut on_line: F) -> Result<FollowEnd>
    where
        F: FnMut(String) + Send,
    {
        // Without a sentinel there is nothing to stitch against
        let replay = if self.last_line.is_some() {
            self.replay + self.overlap
        } else {
            self.replay
        };

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(FollowEnd::Cancelled),
            stream = self.client.subscribe(&self.id, &self.namespace, replay) => stream?,
        };

        let mut stitcher = StreamStitcher::new(self.last_line.take(), replay);
        debug!(source = %self.identity, replay, "subscribed");

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(FollowEnd::Cancelled),
                _ = tokio::time::sleep(self.stitch_timeout), if stitcher.is_holding() => {
                    debug!(source = %self.identity, "sentinel not replayed, releasing held lines");
                    stitcher.release().into_iter().for_each(&mut on_line);
                    continue;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(line)) => stitcher.push(line).into_iter().for_each(&mut on_line),
                Some(Err(e)) => {
                    stitcher.release().into_iter().for_each(&mut on_line);
                    return Err(e);
                }
                None => {
                    stitcher.release().into_iter().for_each(&mut on_line);
                    return Ok(FollowEnd::SourceEnded);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;
    use kubetail_types::TailError;

    fn tailer(cluster: &Arc<FakeCluster>, pod: &str) -> RemoteTailer<FakeCluster> {
        RemoteTailer::new(Arc::clone(cluster), ContainerId::new(pod, "app"), "default")
            .with_stitch_timeout(Duration::from_millis(50))
    }

    async fn collect_until_end(
        tailer: &mut RemoteTailer<FakeCluster>,
        cancel: &CancellationToken,
    ) -> (Vec<String>, FollowEnd) {
        let mut out = Vec::new();
        let end = tailer.follow(cancel, |l| out.push(l)).await.unwrap();
        (out, end)
    }

    #[tokio::test]
    async fn test_history_then_stitched_follow() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod("web-1", &["app"], &["a", "b", "c", "d", "e"]);
        cluster.script_follow("web-1", "app", &["c", "d", "e", "f", "g"]);

        let mut tailer = tailer(&cluster, "web-1");
        assert_eq!(tailer.last_lines(3).await.unwrap(), vec!["c", "d", "e"]);

        let cancel = CancellationToken::new();
        let (lines, end) = collect_until_end(&mut tailer, &cancel).await;
        assert_eq!(lines, vec!["f", "g"]);
        assert_eq!(end, FollowEnd::SourceEnded);
    }

    #[tokio::test]
    async fn test_follow_without_sentinel_loses_nothing() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod("web-1", &["app"], &["a", "b"]);
        cluster.script_follow("web-1", "app", &["x", "y"]);

        let mut tailer = tailer(&cluster, "web-1");
        tailer.last_lines(2).await.unwrap();

        let cancel = CancellationToken::new();
        let (lines, _) = collect_until_end(&mut tailer, &cancel).await;
        assert_eq!(lines, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_live_lines_after_replay() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod("web-1", &["app"], &["a", "b", "c"]);

        let mut tailer = tailer(&cluster, "web-1");
        tailer.last_lines(2).await.unwrap();

        let cancel = CancellationToken::new();
        let pusher = {
            let cluster = Arc::clone(&cluster);
            tokio::spawn(async move {
                cluster.wait_for_subscribers("web-1", "app", 1).await;
                cluster.push_line("web-1", "app", "d");
                cluster.close_stream("web-1", "app");
            })
        };

        let (lines, end) = collect_until_end(&mut tailer, &cancel).await;
        pusher.await.unwrap();
        assert_eq!(lines, vec!["d"]);
        assert_eq!(end, FollowEnd::SourceEnded);
    }

    /// Follow after `appended` lines were written between the history fetch
    /// and the subscription
    async fn follow_after_appends(overlap: usize, appended: &[&str]) -> Vec<String> {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod("web-1", &["app"], &["a", "b", "c", "d", "e"]);

        let mut tailer = tailer(&cluster, "web-1").with_replay_overlap(overlap);
        assert_eq!(tailer.last_lines(2).await.unwrap(), vec!["d", "e"]);
        for line in appended {
            cluster.push_line("web-1", "app", line);
        }

        let closer = {
            let cluster = Arc::clone(&cluster);
            tokio::spawn(async move {
                cluster.wait_for_subscribers("web-1", "app", 1).await;
                cluster.close_stream("web-1", "app");
            })
        };

        let cancel = CancellationToken::new();
        let (lines, end) = collect_until_end(&mut tailer, &cancel).await;
        closer.await.unwrap();
        assert_eq!(end, FollowEnd::SourceEnded);
        lines
    }

    #[tokio::test]
    async fn test_lines_written_during_handoff_are_kept() {
        assert_eq!(follow_after_appends(DEFAULT_REPLAY_OVERLAP, &["f"]).await, vec!["f"]);
        // More new lines than the history depth
        assert_eq!(
            follow_after_appends(DEFAULT_REPLAY_OVERLAP, &["f", "g", "h"]).await,
            vec!["f", "g", "h"]
        );
    }

    #[tokio::test]
    async fn test_handoff_beyond_overlap_never_repeats_history() {
        // Replay is 2 + 1 lines, all of them new
        assert_eq!(follow_after_appends(1, &["f", "g", "h"]).await, vec!["f", "g", "h"]);
    }

    #[tokio::test]
    async fn test_follow_cancel_drops_subscription() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod("web-1", &["app"], &["a"]);

        let mut tailer = tailer(&cluster, "web-1");
        tailer.last_lines(1).await.unwrap();

        let cancel = CancellationToken::new();
        let stopper = {
            let cluster = Arc::clone(&cluster);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cluster.wait_for_subscribers("web-1", "app", 1).await;
                cancel.cancel();
            })
        };

        let (_, end) = collect_until_end(&mut tailer, &cancel).await;
        stopper.await.unwrap();
        assert_eq!(end, FollowEnd::Cancelled);
        assert_eq!(cluster.open_subscriptions("web-1", "app"), 0);
    }

    #[tokio::test]
    async fn test_transport_error_ends_follow() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod("web-1", &["app"], &["a"]);

        let mut tailer = tailer(&cluster, "web-1");
        tailer.last_lines(1).await.unwrap();

        let breaker = {
            let cluster = Arc::clone(&cluster);
            tokio::spawn(async move {
                cluster.wait_for_subscribers("web-1", "app", 1).await;
                cluster.break_stream("web-1", "app", "connection reset");
            })
        };

        let cancel = CancellationToken::new();
        let err = tailer.follow(&cancel, |_| {}).await.unwrap_err();
        breaker.await.unwrap();
        assert!(matches!(err, TailError::Transport(_)));
    }
}
