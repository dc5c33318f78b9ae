//! Kubernetes client for kubetail
//!
//! This crate provides the [`RemoteClient`] seam consumed by the tail engine
//! and its implementation over the Kubernetes API.

mod client;
mod remote;

pub use client::KubeClient;
pub use remote::{LineStream, RemoteClient, SourceEventStream};

// Re-export types that are used in our public API
pub use kubetail_types::{ContainerId, PodSources, SourceEvent, TailError};
