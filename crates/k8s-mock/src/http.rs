//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual kubeconfig-based
//! connections. Objects live in memory for the lifetime of the server.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, RwLock,
	},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use tracing::{debug, trace};
use wiremock::{
	matchers::{method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	catalog::MockCatalog,
	helpers::{
		allocate_node_ports, namespace_from_path, parse_resource_path,
		preserve_service_allocations, qualified_resource, set_server_metadata, status_response,
		used_node_ports,
	},
};

/// Type alias for the shared mutable resources map, keyed by (collection path, name).
pub type SharedResources = Arc<RwLock<HashMap<(String, String), serde_json::Value>>>;

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	/// Objects present before the first request, as raw manifests. The server
	/// derives API paths from apiVersion/kind using the catalog.
	#[builder(default)]
	resources: Vec<serde_json::Value>,
	/// Requests answered with an error instead of being served.
	#[builder(default)]
	failures: Vec<InjectedFailure>,
}

/// A canned error for one method and request path.
///
/// POST failures match the collection path, PUT and GET failures the object
/// path (e.g. `/api/v1/namespaces/default/services/web`).
#[derive(Debug, Clone)]
pub struct InjectedFailure {
	method: String,
	path: String,
	code: u16,
	message: String,
}

impl InjectedFailure {
	pub fn new(method: &str, path: impl Into<String>, code: u16) -> Self {
		Self {
			method: method.to_string(),
			path: path.into(),
			code,
			message: format!("injected {code} response"),
		}
	}

	#[must_use]
	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = message.into();
		self
	}

	fn reason(&self) -> &'static str {
		match self.code {
			404 => "NotFound",
			409 => "Conflict",
			500 => "InternalError",
			503 => "ServiceUnavailable",
			_ => "Unknown",
		}
	}
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	resources: SharedResources,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		let catalog = MockCatalog::default();

		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut resources: HashMap<(String, String), serde_json::Value> = HashMap::new();
		for manifest in self.resources {
			if let Some((api_path, name)) = catalog.api_path_for_manifest(&manifest) {
				trace!(api_path = %api_path, name = %name, "Registered resource");
				resources.insert((api_path, name), manifest);
			}
		}

		let ns_key = ("/api/v1/namespaces".to_string(), "default".to_string());
		resources.entry(ns_key).or_insert_with(|| {
			serde_json::json!({
				"apiVersion": "v1",
				"kind": "Namespace",
				"metadata": {
					"name": "default"
				}
			})
		});

		let shared_resources = Arc::new(RwLock::new(resources));

		mount_version(&server).await;
		mount_failures(&server, &self.failures).await;
		mount_resources(&server, &shared_resources).await;

		RunningHttpMockK8sServer {
			server,
			resources: shared_resources,
		}
	}
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// A stored object, looked up by collection path and name.
	///
	/// `api_path` is e.g. `/api/v1/namespaces/default/services`.
	pub fn resource(&self, api_path: &str, name: &str) -> Option<serde_json::Value> {
		let resources = self.resources.read().unwrap();
		resources
			.get(&(api_path.to_string(), name.to_string()))
			.cloned()
	}

	/// Methods and paths (with query) of every request received so far.
	pub async fn requests(&self) -> Vec<(String, String)> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.map(|req| {
				let target = match req.url.query() {
					Some(query) => format!("{}?{}", req.url.path(), query),
					None => req.url.path().to_string(),
				};
				(req.method.to_string(), target)
			})
			.collect()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"major": "1",
			"minor": "31",
			"gitVersion": "v1.31.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-08-13T00:00:00Z",
			"goVersion": "go1.22.5",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

/// Mounted ahead of the resource handlers so they take precedence.
async fn mount_failures(server: &MockServer, failures: &[InjectedFailure]) {
	for failure in failures {
		debug!(method = %failure.method, path = %failure.path, code = failure.code, "Injecting failure");
		Mock::given(method(failure.method.as_str()))
			.and(path(failure.path.as_str()))
			.respond_with(status_response(
				failure.code,
				failure.reason(),
				failure.message.clone(),
			))
			.with_priority(1)
			.mount(server)
			.await;
	}
}

fn is_dry_run(req: &Request) -> bool {
	req.url.query_pairs().any(|(key, _)| key == "dryRun")
}

async fn mount_resources(server: &MockServer, resources: &SharedResources) {
	let post_resources = Arc::clone(resources);
	let put_resources = Arc::clone(resources);
	let get_resources = Arc::clone(resources);
	let revision = Arc::new(AtomicU64::new(1));
	let put_revision = Arc::clone(&revision);

	// POST creates; an existing object with the same name is a conflict
	Mock::given(method("POST"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let api_path = req.url.path().trim_end_matches('/').to_string();
			let mut body: serde_json::Value =
				serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);

			let name = body
				.pointer("/metadata/name")
				.and_then(|v| v.as_str())
				.unwrap_or("")
				.to_string();
			if name.is_empty() {
				return status_response(422, "Invalid", "metadata.name: Required value".into());
			}

			let mut resources = post_resources.write().unwrap();
			let key = (api_path.clone(), name.clone());
			if resources.contains_key(&key) {
				return status_response(
					409,
					"AlreadyExists",
					format!("{} \"{name}\" already exists", qualified_resource(&api_path)),
				);
			}

			let mut used = used_node_ports(resources.values());
			allocate_node_ports(&mut body, &mut used);
			set_server_metadata(
				&mut body,
				namespace_from_path(&api_path),
				revision.fetch_add(1, Ordering::SeqCst),
			);

			if !is_dry_run(req) {
				trace!(api_path = %api_path, name = %name, "Created resource");
				resources.insert(key, body.clone());
			}

			ResponseTemplate::new(201).set_body_json(body)
		})
		.mount(server)
		.await;

	// PUT replaces an existing object
	Mock::given(method("PUT"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let (api_path, name) = parse_resource_path(req.url.path());
			let mut body: serde_json::Value =
				serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);

			let mut resources = put_resources.write().unwrap();
			let key = (api_path.clone(), name.clone());
			let Some(existing) = resources.get(&key) else {
				return status_response(
					404,
					"NotFound",
					format!("{} \"{name}\" not found", qualified_resource(&api_path)),
				);
			};

			preserve_service_allocations(existing, &mut body);
			set_server_metadata(
				&mut body,
				namespace_from_path(&api_path),
				put_revision.fetch_add(1, Ordering::SeqCst),
			);

			if !is_dry_run(req) {
				trace!(api_path = %api_path, name = %name, "Replaced resource");
				resources.insert(key, body.clone());
			}

			ResponseTemplate::new(200).set_body_json(body)
		})
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let (api_path, name) = parse_resource_path(req.url.path());
			let resources = get_resources.read().unwrap();

			match resources.get(&(api_path.clone(), name.clone())) {
				Some(resource) => ResponseTemplate::new(200).set_body_json(resource.clone()),
				None => status_response(
					404,
					"NotFound",
					format!("{} \"{name}\" not found", qualified_resource(&api_path)),
				),
			}
		})
		.mount(server)
		.await;
}
