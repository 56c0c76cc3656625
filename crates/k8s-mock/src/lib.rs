//! Mock Kubernetes API server for testing.
//!
//! Provides an HTTP server that can be used with kubeconfig-based connections.

pub mod catalog;
mod helpers;
pub mod http;

pub use catalog::MockCatalog;
pub use helpers::NODE_PORT_BASE;
pub use http::{HttpMockK8sServer, InjectedFailure, RunningHttpMockK8sServer};
