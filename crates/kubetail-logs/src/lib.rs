//! Tail engine for kubetail
//!
//! This crate provides the "last N lines then follow" readers for local files
//! and remote containers, stream stitching, source discovery, and the
//! orchestrator that fans every source into one output.

mod file;
mod filter;
mod format;
mod orchestrator;
mod registry;
mod remote;
mod session;
mod sink;
mod source;
mod stitch;

#[cfg(test)]
mod testing;

pub use file::{DEFAULT_POLL_INTERVAL, FileTailer};
pub use filter::{LineFilter, LogFilter};
pub use format::{JsonFormatter, LineFormatter, Painter, RawFormatter, SourcePrefixFormatter};
pub use orchestrator::{TailOrchestrator, tail_file};
pub use registry::{RegistryEvent, SourceRegistry};
pub use remote::RemoteTailer;
pub use session::{RetryPolicy, SessionReport, TailSession};
pub use sink::{FanInSink, OutputPipeline, SinkEvent, SinkHandle};
pub use source::{FollowEnd, LineSource};
pub use stitch::{DEFAULT_STITCH_TIMEOUT, StreamStitcher};

// Re-export types used in our public API
pub use kubetail_types::{
    ContainerId, ExcludeTag, Line, SessionState, SourceIdentity, SourceQuery, TailError,
    TailOptions,
};
