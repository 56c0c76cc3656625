//! Kubernetes access for the deploy command.
//!
//! All calls go through typed kube-rs APIs.

pub mod apply;
pub mod client;
pub mod endpoint;

/// Namespace used when neither the manifest nor the caller names one.
pub const DEFAULT_NAMESPACE: &str = "default";
