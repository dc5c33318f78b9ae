use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::file::FileTailer;
use crate::registry::{RegistryEvent, SourceRegistry};
use crate::remote::RemoteTailer;
use crate::session::{RetryPolicy, SessionReport, TailSession};
use crate::sink::SinkHandle;
use crate::stitch::DEFAULT_STITCH_TIMEOUT;
use kubetail_k8s::RemoteClient;
use kubetail_types::{ContainerId, Result, SourceQuery, TailOptions};

/// Tails every container matching a query into one sink
///
/// Without `follow` the matching sources are tailed once and `run` returns
/// when every session is done. With `follow` new sources are picked up from
/// the discovery watch and `run` returns only after cancellation, once every
/// session has stopped.
pub struct TailOrchestrator<C> {
    client: Arc<C>,
    query: SourceQuery,
    options: TailOptions,
    retry: RetryPolicy,
    stitch_timeout: Duration,
    sink: SinkHandle,
    cancel: CancellationToken,
}

impl<C: RemoteClient> TailOrchestrator<C> {
    pub fn new(client: Arc<C>, query: SourceQuery, options: TailOptions, sink: SinkHandle) -> Self {
        Self {
            client,
            query,
            options,
            retry: RetryPolicy::default(),
            stitch_timeout: DEFAULT_STITCH_TIMEOUT,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stitch_timeout(mut self, stitch_timeout: Duration) -> Self {
        self.stitch_timeout = stitch_timeout;
        self
    }

    /// Stop the whole run when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until done (or cancelled, when following).
    ///
    /// Only a failed initial listing is an error; per-source failures show
    /// up in the sink and in the reports.
    pub async fn run(self) -> Result<Vec<SessionReport>> {
        let registry = SourceRegistry::new(
            Arc::clone(&self.client),
            self.query.clone(),
            self.options.namespace.clone(),
        );

        let initial = registry.list().await?;
        info!(
            namespace = %self.options.namespace,
            pods = self.query.pod_pattern(),
            sources = initial.len(),
            "starting tail"
        );

        let mut sessions = Sessions::new(&self);
        for id in initial {
            if registry.track(&id) {
                sessions.start(id);
            }
        }

        if !self.options.follow {
            return Ok(sessions.drain().await);
        }

        let (tx, mut events) = mpsc::unbounded_channel();
        let watch = {
            let registry = registry.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move { registry.watch(cancel, tx).await })
        };

        let mut reports = Vec::new();
        let mut watching = true;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv(), if watching => match event {
                    Some(RegistryEvent::Added(id)) => {
                        // Marker goes out before the session can emit anything
                        self.sink.added(id.clone().into());
                        sessions.start(id);
                    }
                    Some(RegistryEvent::Removed(id)) => {
                        sessions.stop(&id);
                        self.sink.removed(id.into());
                    }
                    None => {
                        debug!("discovery stopped, waiting for cancellation");
                        watching = false;
                    }
                },
                Some(report) = sessions.join_next(), if !sessions.is_empty() => {
                    reports.push(report);
                }
            }
        }

        match watch.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "source watch failed"),
            Err(e) => error!(error = %e, "source watch task failed"),
        }

        reports.extend(sessions.drain().await);
        Ok(reports)
    }
}

struct Active {
    generation: u64,
    cancel: CancellationToken,
}

/// The running sessions of one orchestration
///
/// A source that is removed and added again gets a new generation, so a
/// late finishing old session never evicts its replacement.
struct Sessions<C> {
    client: Arc<C>,
    options: TailOptions,
    retry: RetryPolicy,
    stitch_timeout: Duration,
    sink: SinkHandle,
    cancel: CancellationToken,
    tasks: JoinSet<(u64, SessionReport)>,
    active: HashMap<ContainerId, Active>,
    next_generation: u64,
}

impl<C: RemoteClient> Sessions<C> {
    fn new(orchestrator: &TailOrchestrator<C>) -> Self {
        Self {
            client: Arc::clone(&orchestrator.client),
            options: orchestrator.options.clone(),
            retry: orchestrator.retry,
            stitch_timeout: orchestrator.stitch_timeout,
            sink: orchestrator.sink.clone(),
            cancel: orchestrator.cancel.clone(),
            tasks: JoinSet::new(),
            active: HashMap::new(),
            next_generation: 0,
        }
    }

    fn start(&mut self, id: ContainerId) {
        let cancel = self.cancel.child_token();
        let namespace = &self.options.namespace;
        let source = RemoteTailer::new(Arc::clone(&self.client), id.clone(), namespace)
            .with_stitch_timeout(self.stitch_timeout);
        let session = TailSession::new(
            source,
            &self.options,
            self.retry,
            self.sink.clone(),
            cancel.clone(),
        );

        let generation = self.next_generation;
        self.next_generation += 1;
        debug!(source = %id, generation, "starting session");

        self.tasks.spawn(async move { (generation, session.run().await) });
        self.active.insert(id, Active { generation, cancel });
    }

    fn stop(&mut self, id: &ContainerId) -> bool {
        match self.active.remove(id) {
            Some(active) => {
                debug!(source = %id, "stopping session");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    async fn join_next(&mut self) -> Option<SessionReport> {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((generation, report)) => {
                    self.active.retain(|_, active| active.generation != generation);
                    debug!(
                        source = %report.identity,
                        state = %report.state,
                        lines = report.lines,
                        "session complete"
                    );
                    return Some(report);
                }
                Err(e) => error!(error = %e, "tail session task failed"),
            }
        }
        None
    }

    async fn drain(&mut self) -> Vec<SessionReport> {
        let mut reports = Vec::new();
        while let Some(report) = self.join_next().await {
            reports.push(report);
        }
        reports
    }
}

/// Tail one local file into `sink`.
///
/// A missing file is reported as `NotFound` before any session starts.
pub async fn tail_file(
    path: impl AsRef<Path>,
    options: &TailOptions,
    poll_interval: Duration,
    sink: SinkHandle,
    cancel: CancellationToken,
) -> Result<SessionReport> {
    let source = FileTailer::open(path)?.with_poll_interval(poll_interval);
    Ok(TailSession::new(source, options, RetryPolicy::none(), sink, cancel)
        .run()
        .await)
}
