//! Shared types for kubetail
//!
//! This crate contains the data model used by the client and the tail engine:
//! source identities, selection queries, resolved options and session states.

mod error;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use regex::Regex;
use serde::Deserialize;

pub use error::{Result, TailError};

/// Pattern used when no sub-unit query is given
pub const MATCH_ALL: &str = ".*";

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_TAIL_LINES: usize = 10;

// ============================================================================
// Source Identity
// ============================================================================

/// One container inside one pod
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId {
    pub pod: String,
    pub container: String,
}

impl ContainerId {
    pub fn new(pod: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pod, self.container)
    }
}

/// Stable key for "is this source already being tailed"
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceIdentity {
    Container(ContainerId),
    File(PathBuf),
}

impl SourceIdentity {
    pub fn container(pod: impl Into<String>, container: impl Into<String>) -> Self {
        Self::Container(ContainerId::new(pod, container))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }
}

impl From<ContainerId> for SourceIdentity {
    fn from(id: ContainerId) -> Self {
        Self::Container(id)
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container(id) => id.fmt(f),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A single line of text and where it came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    pub source: SourceIdentity,
    pub text: String,
}

impl Line {
    pub fn new(source: SourceIdentity, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
        }
    }
}

// ============================================================================
// Discovery Types
// ============================================================================

/// A pod and the names of its containers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodSources {
    pub name: String,
    pub containers: Vec<String>,
}

impl PodSources {
    pub fn new(name: impl Into<String>, containers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            containers,
        }
    }

    /// Every container of this pod as an identity
    pub fn container_ids(&self) -> impl Iterator<Item = ContainerId> + '_ {
        self.containers
            .iter()
            .map(|c| ContainerId::new(self.name.clone(), c.clone()))
    }
}

/// Raw discovery event reported by the backing system
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    /// Pod created or updated
    Added(PodSources),
    /// Pod deleted
    Removed(PodSources),
}

// ============================================================================
// Selection
// ============================================================================

/// Regex selection over pod names and container names
///
/// A container is eligible only if both patterns match. There is no implicit
/// default: "every container" is the explicit [`MATCH_ALL`] pattern.
#[derive(Clone, Debug)]
pub struct SourceQuery {
    pod: Regex,
    container: Regex,
}

impl SourceQuery {
    pub fn new(pod_pattern: &str, container_pattern: &str) -> Result<Self> {
        Ok(Self {
            pod: compile(pod_pattern, "Pod query")?,
            container: compile(container_pattern, "Container query")?,
        })
    }

    /// Select every container of the pods matching `pod_pattern`
    pub fn pods(pod_pattern: &str) -> Result<Self> {
        Self::new(pod_pattern, MATCH_ALL)
    }

    pub fn matches_pod(&self, pod: &str) -> bool {
        self.pod.is_match(pod)
    }

    pub fn matches_container(&self, container: &str) -> bool {
        self.container.is_match(container)
    }

    pub fn matches(&self, id: &ContainerId) -> bool {
        self.matches_pod(&id.pod) && self.matches_container(&id.container)
    }

    /// Identities of the containers of `pod` selected by this query
    pub fn select(&self, pod: &PodSources) -> Vec<ContainerId> {
        if !self.matches_pod(&pod.name) {
            return Vec::new();
        }
        pod.container_ids()
            .filter(|id| self.matches_container(&id.container))
            .collect()
    }

    pub fn pod_pattern(&self) -> &str {
        self.pod.as_str()
    }

    pub fn container_pattern(&self) -> &str {
        self.container.as_str()
    }
}

fn compile(pattern: &str, what: &str) -> Result<Regex> {
    if pattern.trim().is_empty() {
        return Err(TailError::invalid(format!("{what} not set.")));
    }
    Regex::new(pattern).map_err(|e| TailError::invalid(format!("{what} is invalid: {e}")))
}

// ============================================================================
// Options
// ============================================================================

/// Content exclusion tags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExcludeTag {
    /// HTTP access logs
    AccessLogs,
    /// Datadog agent logs
    DdLogs,
}

impl ExcludeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessLogs => "access-logs",
            Self::DdLogs => "dd-logs",
        }
    }
}

impl FromStr for ExcludeTag {
    type Err = TailError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "access-logs" => Ok(Self::AccessLogs),
            "dd-logs" => Ok(Self::DdLogs),
            other => Err(TailError::invalid(format!(
                "Unknown exclude tag: {other}. Expected access-logs or dd-logs."
            ))),
        }
    }
}

/// Per-invocation options, resolved and validated once
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TailOptions {
    pub namespace: String,
    pub tail_lines: usize,
    pub follow: bool,
    pub raw: bool,
    pub display_names: bool,
    pub excludes: Vec<ExcludeTag>,
    pub mdcs: Vec<String>,
}

impl TailOptions {
    pub fn new(namespace: impl Into<String>, tail_lines: usize) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.trim().is_empty() {
            return Err(TailError::invalid("Namespace not set."));
        }
        if tail_lines == 0 {
            return Err(TailError::invalid(format!(
                "Invalid last_nb_lines: {tail_lines}."
            )));
        }

        Ok(Self {
            namespace,
            tail_lines,
            follow: false,
            raw: false,
            display_names: false,
            excludes: Vec::new(),
            mdcs: Vec::new(),
        })
    }

    pub fn with_follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_display_names(mut self, display_names: bool) -> Self {
        self.display_names = display_names;
        self
    }

    pub fn with_excludes(mut self, excludes: Vec<ExcludeTag>) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn with_mdcs(mut self, mdcs: Vec<String>) -> Self {
        self.mdcs = mdcs;
        self
    }

    pub fn excludes(&self, tag: ExcludeTag) -> bool {
        self.excludes.contains(&tag)
    }
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            tail_lines: DEFAULT_TAIL_LINES,
            follow: false,
            raw: false,
            display_names: false,
            excludes: Vec::new(),
            mdcs: Vec::new(),
        }
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle of one tailed source
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    FetchingHistory,
    Streaming,
    /// History printed, not following
    Done,
    Cancelled,
    /// The live stream ended or broke
    SourceEnded,
    /// Gave up while fetching history
    FailedPermanently,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Cancelled | Self::SourceEnded | Self::FailedPermanently
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::FetchingHistory => "fetching-history",
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::SourceEnded => "source-ended",
            Self::FailedPermanently => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_requires_both_patterns() {
        let query = SourceQuery::new("pay.*", "app").unwrap();
        assert!(query.matches(&ContainerId::new("payments-7", "app")));
        assert!(!query.matches(&ContainerId::new("payments-7", "sidecar")));
        assert!(!query.matches(&ContainerId::new("billing-3", "app")));
    }

    #[test]
    fn test_query_rejects_blank_and_invalid() {
        for blank in ["", "   "] {
            let err = SourceQuery::pods(blank).unwrap_err();
            assert_eq!(err.to_string(), "invalid configuration: Pod query not set.");
        }
        assert!(SourceQuery::new("pay", "").is_err());
        assert!(SourceQuery::pods("pay(").is_err());
    }

    #[test]
    fn test_query_select_expands_containers() {
        let query = SourceQuery::pods("pay.*").unwrap();
        assert_eq!(query.container_pattern(), MATCH_ALL);

        let pod = PodSources::new("payments-7", vec!["app".into(), "proxy".into()]);
        assert_eq!(
            query.select(&pod),
            vec![
                ContainerId::new("payments-7", "app"),
                ContainerId::new("payments-7", "proxy"),
            ]
        );
        assert!(query.select(&PodSources::new("billing-3", vec!["app".into()])).is_empty());
    }

    #[test]
    fn test_options_validation() {
        assert!(TailOptions::new("default", 0).is_err());
        assert!(TailOptions::new(" ", 3).is_err());

        let opts = TailOptions::new("prod", 3)
            .unwrap()
            .with_follow(true)
            .with_excludes(vec![ExcludeTag::DdLogs]);
        assert!(opts.follow);
        assert!(opts.excludes(ExcludeTag::DdLogs));
        assert!(!opts.excludes(ExcludeTag::AccessLogs));
    }

    #[test]
    fn test_exclude_tag_parse() {
        assert_eq!("access-logs".parse::<ExcludeTag>().unwrap(), ExcludeTag::AccessLogs);
        assert_eq!("dd-logs".parse::<ExcludeTag>().unwrap(), ExcludeTag::DdLogs);
        assert!("nginx".parse::<ExcludeTag>().is_err());
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(SourceIdentity::container("web-1", "app").to_string(), "web-1/app");
        assert_eq!(SourceIdentity::file("/var/log/app.log").to_string(), "/var/log/app.log");
    }
}
