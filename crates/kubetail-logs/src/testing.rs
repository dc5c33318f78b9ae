//! In-memory cluster and output buffer for engine tests

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use kubetail_k8s::{LineStream, RemoteClient, SourceEventStream};
use kubetail_types::{ContainerId, PodSources, Result, SourceEvent, TailError};

#[derive(Default)]
struct FakeContainer {
    history: Vec<String>,
    /// Replaces the replay + live stream with a fixed, finite stream
    script: Option<Vec<String>>,
    subscribers: Vec<mpsc::UnboundedSender<Result<String>>>,
    not_ready: usize,
}

/// Scripted pods, logs and pod events served through [`RemoteClient`]
pub(crate) struct FakeCluster {
    pods: Mutex<Vec<PodSources>>,
    containers: Mutex<HashMap<ContainerId, FakeContainer>>,
    events_tx: mpsc::UnboundedSender<SourceEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SourceEvent>>>,
    subscribed: Notify,
}

impl FakeCluster {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            pods: Mutex::new(Vec::new()),
            containers: Mutex::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            subscribed: Notify::new(),
        }
    }

    /// Register a pod whose containers all share `history`
    pub fn add_pod(&self, name: &str, containers: &[&str], history: &[&str]) {
        let pod = PodSources::new(name, containers.iter().map(|c| c.to_string()).collect());
        let mut state = self.containers.lock();
        for id in pod.container_ids() {
            state.insert(
                id,
                FakeContainer {
                    history: history.iter().map(|l| l.to_string()).collect(),
                    ..Default::default()
                },
            );
        }
        self.pods.lock().push(pod);
    }

    /// Register a pod and announce it on the watch stream
    pub fn spawn_pod(&self, name: &str, containers: &[&str], history: &[&str]) {
        self.add_pod(name, containers, history);
        let pod = PodSources::new(name, containers.iter().map(|c| c.to_string()).collect());
        let _ = self.events_tx.send(SourceEvent::Added(pod));
    }

    /// Forget a pod, announce it, and end its log streams
    pub fn delete_pod(&self, name: &str) {
        let removed = {
            let mut pods = self.pods.lock();
            let index = pods.iter().position(|p| p.name == name);
            index.map(|i| pods.remove(i))
        };
        if let Some(pod) = removed {
            let mut state = self.containers.lock();
            for id in pod.container_ids() {
                state.remove(&id);
            }
            let _ = self.events_tx.send(SourceEvent::Removed(pod));
        }
    }

    pub fn script_follow(&self, pod: &str, container: &str, lines: &[&str]) {
        self.with_container(pod, container, |c| {
            c.script = Some(lines.iter().map(|l| l.to_string()).collect());
        });
    }

    /// The next `times` history fetches fail with `NotReady`
    pub fn fail_not_ready(&self, pod: &str, container: &str, times: usize) {
        self.with_container(pod, container, |c| c.not_ready = times);
    }

    pub fn push_line(&self, pod: &str, container: &str, line: &str) {
        self.with_container(pod, container, |c| {
            c.history.push(line.to_string());
            c.subscribers.retain(|tx| tx.send(Ok(line.to_string())).is_ok());
        });
    }

    pub fn break_stream(&self, pod: &str, container: &str, reason: &str) {
        self.with_container(pod, container, |c| {
            for tx in c.subscribers.drain(..) {
                let _ = tx.send(Err(TailError::Transport(reason.to_string())));
            }
        });
    }

    pub fn close_stream(&self, pod: &str, container: &str) {
        self.with_container(pod, container, |c| c.subscribers.clear());
    }

    pub fn open_subscriptions(&self, pod: &str, container: &str) -> usize {
        self.containers
            .lock()
            .get(&ContainerId::new(pod, container))
            .map(|c| c.subscribers.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub async fn wait_for_subscribers(&self, pod: &str, container: &str, count: usize) {
        loop {
            let notified = self.subscribed.notified();
            if self.open_subscriptions(pod, container) >= count {
                return;
            }
            notified.await;
        }
    }

    fn with_container(&self, pod: &str, container: &str, f: impl FnOnce(&mut FakeContainer)) {
        let mut state = self.containers.lock();
        let c = state
            .get_mut(&ContainerId::new(pod, container))
            .expect("container registered with add_pod");
        f(c);
    }
}

impl RemoteClient for FakeCluster {
    async fn list_sources(&self, _namespace: &str) -> Result<Vec<PodSources>> {
        Ok(self.pods.lock().clone())
    }

    async fn watch_sources(&self, _namespace: &str) -> Result<SourceEventStream> {
        let Some(rx) = self.events_rx.lock().take() else {
            return Ok(futures::stream::pending().boxed());
        };
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (Ok(event), rx))
        })
        .boxed())
    }

    async fn historical_lines(
        &self,
        id: &ContainerId,
        _namespace: &str,
        lines: usize,
    ) -> Result<Vec<String>> {
        let mut state = self.containers.lock();
        let c = state
            .get_mut(id)
            .ok_or_else(|| TailError::NotFound(id.to_string()))?;

        if c.not_ready > 0 {
            c.not_ready -= 1;
            return Err(TailError::NotReady(format!("No log returned from {}", id)));
        }
        if c.history.is_empty() {
            return Err(TailError::NotReady(format!("No log returned from {}", id)));
        }

        let skip = c.history.len().saturating_sub(lines);
        Ok(c.history[skip..].to_vec())
    }

    async fn subscribe(
        &self,
        id: &ContainerId,
        _namespace: &str,
        replay: usize,
    ) -> Result<LineStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let replayed = {
            let mut state = self.containers.lock();
            let c = state
                .get_mut(id)
                .ok_or_else(|| TailError::NotFound(id.to_string()))?;

            if let Some(script) = &c.script {
                return Ok(futures::stream::iter(script.clone().into_iter().map(Ok)).boxed());
            }

            c.subscribers.push(tx);
            let skip = c.history.len().saturating_sub(replay);
            c.history[skip..].to_vec()
        };
        self.subscribed.notify_waiters();

        let live = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|line| (line, rx))
        });
        Ok(futures::stream::iter(replayed.into_iter().map(Ok))
            .chain(live)
            .boxed())
    }
}

/// Clonable in-memory writer
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// Wait up to two seconds for `predicate` to hold on the output
    pub async fn wait_for(&self, predicate: impl Fn(&str) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            if predicate(&self.contents()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        predicate(&self.contents())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
