//! Working out where an applied service can be reached from outside the cluster.

use std::{fmt, str::FromStr};

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::ResourceExt;
use thiserror::Error;

/// Placeholder shown instead of a host when no node address is known.
pub const UNKNOWN_HOST: &str = "<ip-address>";

/// Errors while reading a service's external port.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
	#[error("service {0} exposes no ports")]
	NoPorts(String),

	#[error("service {0} has no node port assigned (is its type NodePort or LoadBalancer?)")]
	NoNodePort(String),
}

/// Reference to a pod by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
	pub namespace: String,
	pub name: String,
}

impl PodRef {
	pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			namespace: namespace.into(),
			name: name.into(),
		}
	}

	/// The addon manager pod of a minikube cluster, which runs on the host network.
	pub fn minikube_addon_manager() -> Self {
		Self::new("kube-system", "kube-addon-manager-minikube")
	}
}

impl Default for PodRef {
	fn default() -> Self {
		Self::minikube_addon_manager()
	}
}

impl fmt::Display for PodRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.namespace, self.name)
	}
}

impl FromStr for PodRef {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.split_once('/') {
			Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
				Ok(Self::new(ns, name))
			}
			_ => Err(format!("expected <namespace>/<name>, got '{s}'")),
		}
	}
}

/// URL of a node port service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrl {
	pub host: Option<String>,
	pub node_port: i32,
}

impl ServiceUrl {
	pub fn is_resolved(&self) -> bool {
		self.host.is_some()
	}
}

impl fmt::Display for ServiceUrl {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let host = self.host.as_deref().unwrap_or(UNKNOWN_HOST);
		write!(f, "http://{}:{}", host, self.node_port)
	}
}

/// Node port of the service's first port.
pub fn node_port(service: &Service) -> Result<i32, EndpointError> {
	let first = service
		.spec
		.as_ref()
		.and_then(|spec| spec.ports.as_ref())
		.and_then(|ports| ports.first())
		.ok_or_else(|| EndpointError::NoPorts(service.name_any()))?;

	first
		.node_port
		.ok_or_else(|| EndpointError::NoNodePort(service.name_any()))
}

/// IP of the node a pod is scheduled on.
pub fn host_ip(pod: &Pod) -> Option<&str> {
	pod.status
		.as_ref()
		.and_then(|status| status.host_ip.as_deref())
		.filter(|ip| !ip.is_empty())
}

#[cfg(test)]
mod tests {
	use k8s_openapi::api::core::v1::{PodStatus, ServicePort, ServiceSpec};
	use kube::api::ObjectMeta;
	use rstest::rstest;

	use super::*;

	fn service(ports: Option<Vec<ServicePort>>) -> Service {
		Service {
			metadata: ObjectMeta {
				name: Some("web".to_string()),
				..Default::default()
			},
			spec: Some(ServiceSpec {
				type_: Some("NodePort".to_string()),
				ports,
				..Default::default()
			}),
			..Default::default()
		}
	}

	#[test]
	fn test_node_port_of_first_port() {
		let svc = service(Some(vec![
			ServicePort {
				port: 80,
				node_port: Some(30080),
				..Default::default()
			},
			ServicePort {
				port: 443,
				node_port: Some(30443),
				..Default::default()
			},
		]));
		assert_eq!(node_port(&svc), Ok(30080));
	}

	#[test]
	fn test_node_port_missing() {
		let svc = service(Some(vec![ServicePort {
			port: 80,
			..Default::default()
		}]));
		assert_eq!(node_port(&svc), Err(EndpointError::NoNodePort("web".to_string())));
	}

	#[test]
	fn test_node_port_no_ports() {
		assert_eq!(
			node_port(&service(Some(vec![]))),
			Err(EndpointError::NoPorts("web".to_string()))
		);
		assert_eq!(
			node_port(&service(None)),
			Err(EndpointError::NoPorts("web".to_string()))
		);
	}

	#[rstest]
	#[case(Some("192.168.49.2"), "http://192.168.49.2:30080")]
	#[case(None, "http://<ip-address>:30080")]
	fn test_service_url_display(#[case] host: Option<&str>, #[case] expected: &str) {
		let url = ServiceUrl {
			host: host.map(str::to_string),
			node_port: 30080,
		};
		assert_eq!(url.to_string(), expected);
	}

	#[test]
	fn test_host_ip_ignores_empty() {
		let pod = Pod {
			status: Some(PodStatus {
				host_ip: Some(String::new()),
				..Default::default()
			}),
			..Default::default()
		};
		assert_eq!(host_ip(&pod), None);

		let pod = Pod {
			status: Some(PodStatus {
				host_ip: Some("10.0.0.7".to_string()),
				..Default::default()
			}),
			..Default::default()
		};
		assert_eq!(host_ip(&pod), Some("10.0.0.7"));
	}

	#[rstest]
	#[case("kube-system/addon", Ok(PodRef::new("kube-system", "addon")))]
	#[case("addon", Err(()))]
	#[case("/addon", Err(()))]
	#[case("ns/", Err(()))]
	#[case("a/b/c", Err(()))]
	fn test_pod_ref_parse(#[case] input: &str, #[case] expected: Result<PodRef, ()>) {
		assert_eq!(input.parse::<PodRef>().map_err(|_| ()), expected);
	}
}
