use std::future::Future;

use tokio_util::sync::CancellationToken;

use kubetail_types::{Result, SourceIdentity};

/// Why a follow loop returned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FollowEnd {
    Cancelled,
    /// The backend closed the stream
    SourceEnded,
}

/// One line-oriented, append-only backend
pub trait LineSource: Send {
    fn identity(&self) -> &SourceIdentity;

    /// The last `n` lines, oldest first
    fn last_lines(&mut self, n: usize) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Deliver every line produced after the ones returned by
    /// [`last_lines`](Self::last_lines) until `cancel` fires or the source ends.
    /// Any live subscription is dropped before this returns.
    fn follow<F>(
        &mut self,
        cancel: &CancellationToken,
        on_line: F,
    ) -> impl Future<Output = Result<FollowEnd>> + Send
    where
        F: FnMut(String) + Send;
}
