use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sink::SinkHandle;
use crate::source::{FollowEnd, LineSource};
use kubetail_types::{Result, SessionState, SourceIdentity, TailOptions};

/// Bounded retry for sources that are not ready yet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: u32 = 120;
    pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Fail on the first error
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS, Self::DEFAULT_BACKOFF)
    }
}

/// How a session ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub identity: SourceIdentity,
    pub state: SessionState,
    /// Lines handed to the sink, before filtering
    pub lines: u64,
    pub error: Option<String>,
}

/// Runtime state of one tailed source: history, then optionally follow
pub struct TailSession<S> {
    source: S,
    identity: SourceIdentity,
    tail_lines: usize,
    follow: bool,
    retry: RetryPolicy,
    sink: SinkHandle,
    cancel: CancellationToken,
    state: SessionState,
    lines: u64,
}

impl<S: LineSource> TailSession<S> {
    pub fn new(
        source: S,
        options: &TailOptions,
        retry: RetryPolicy,
        sink: SinkHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            identity: source.identity().clone(),
            source,
            tail_lines: options.tail_lines,
            follow: options.follow,
            retry,
            sink,
            cancel,
            state: SessionState::Starting,
            lines: 0,
        }
    }

    /// Drive the session to a terminal state. Per-source failures are
    /// reported to the sink and in the returned report, never returned as
    /// errors.
    pub async fn run(mut self) -> SessionReport {
        self.transition(SessionState::FetchingHistory);

        let history = match self.fetch_history().await {
            Ok(Some(lines)) => lines,
            Ok(None) => return self.finish(SessionState::Cancelled, None),
            Err(e) => {
                let message = e.to_string();
                self.sink.failed(&self.identity, message.clone());
                return self.finish(SessionState::FailedPermanently, Some(message));
            }
        };

        for line in history {
            self.sink.line(&self.identity, line);
            self.lines += 1;
        }

        if !self.follow {
            return self.finish(SessionState::Done, None);
        }

        self.transition(SessionState::Streaming);

        let sink = self.sink.clone();
        let identity = self.identity.clone();
        let mut streamed = 0u64;
        let end = self
            .source
            .follow(&self.cancel, |line| {
                sink.line(&identity, line);
                streamed += 1;
            })
            .await;
        self.lines += streamed;

        match end {
            Ok(FollowEnd::Cancelled) => self.finish(SessionState::Cancelled, None),
            Ok(FollowEnd::SourceEnded) => self.finish(SessionState::SourceEnded, None),
            Err(e) => {
                let message = e.to_string();
                self.sink.failed(&self.identity, message.clone());
                self.finish(SessionState::SourceEnded, Some(message))
            }
        }
    }

    /// `Ok(None)` when cancelled before the history arrived
    async fn fetch_history(&mut self) -> Result<Option<Vec<String>>> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                result = self.source.last_lines(self.tail_lines) => result,
            };

            match result {
                Ok(lines) => return Ok(Some(lines)),
                Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                    warn!(
                        source = %self.identity,
                        attempt,
                        max_attempts = self.retry.attempts,
                        error = %e,
                        "source not ready, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(self.retry.backoff) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn transition(&mut self, state: SessionState) {
        debug!(source = %self.identity, from = %self.state, to = %state, "session state");
        self.state = state;
    }

    fn finish(mut self, state: SessionState, error: Option<String>) -> SessionReport {
        self.transition(state);
        SessionReport {
            identity: self.identity.clone(),
            state,
            lines: self.lines,
            error,
        }
    }
}
