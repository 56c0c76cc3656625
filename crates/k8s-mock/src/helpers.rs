//! Helper functions for mock Kubernetes testing.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use wiremock::ResponseTemplate;

/// First port handed out to `NodePort` services.
pub const NODE_PORT_BASE: i64 = 30000;

/// A `metav1.Status` failure response, as the API server sends for errors.
pub fn status_response(code: u16, reason: &str, message: String) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

/// Resource name as the API server prints it in messages.
///
/// Examples:
/// - `/apis/apps/v1/namespaces/default/deployments` -> `deployments.apps`
/// - `/api/v1/namespaces/default/services` -> `services`
pub fn qualified_resource(api_path: &str) -> String {
	let plural = api_path.rsplit('/').next().unwrap_or_default();
	match api_path.strip_prefix("/apis/").and_then(|rest| rest.split('/').next()) {
		Some(group) => format!("{plural}.{group}"),
		None => plural.to_string(),
	}
}

/// Namespace segment of a namespaced API path.
pub fn namespace_from_path(api_path: &str) -> Option<&str> {
	let (_, rest) = api_path.split_once("/namespaces/")?;
	let ns = rest.split('/').next()?;
	// `/api/v1/namespaces` itself has no namespace segment
	rest.contains('/').then_some(ns)
}

/// Parse a Kubernetes API path into (api_path, resource_name).
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps/my-config` -> (`/api/v1/namespaces/default/configmaps`, `my-config`)
/// - `/apis/apps/v1/namespaces/default/deployments/my-deploy` -> (`/apis/apps/v1/namespaces/default/deployments`, `my-deploy`)
/// - `/api/v1/namespaces/my-ns` -> (`/api/v1/namespaces`, `my-ns`)
pub fn parse_resource_path(path: &str) -> (String, String) {
	let path = path.trim_end_matches('/');
	match path.rsplit_once('/') {
		Some((api_path, name)) => (api_path.to_string(), name.to_string()),
		None => (path.to_string(), String::new()),
	}
}

/// Fill in the metadata the server owns.
pub fn set_server_metadata(obj: &mut Value, namespace: Option<&str>, resource_version: u64) {
	let Some(metadata) = obj
		.as_object_mut()
		.map(|o| o.entry("metadata").or_insert_with(|| serde_json::json!({})))
		.and_then(Value::as_object_mut)
	else {
		return;
	};

	if let Some(ns) = namespace {
		metadata.insert("namespace".to_string(), Value::from(ns));
	}
	metadata.insert(
		"resourceVersion".to_string(),
		Value::from(resource_version.to_string()),
	);
}

/// Node ports already taken by the stored services.
pub fn used_node_ports<'a>(objects: impl IntoIterator<Item = &'a Value>) -> BTreeSet<i64> {
	objects
		.into_iter()
		.filter_map(|obj| obj.pointer("/spec/ports")?.as_array())
		.flatten()
		.filter_map(|port| port.get("nodePort")?.as_i64())
		.collect()
}

fn exposes_node_ports(service: &Value) -> bool {
	matches!(
		service.pointer("/spec/type").and_then(Value::as_str),
		Some("NodePort" | "LoadBalancer")
	)
}

/// Give every port of a `NodePort`/`LoadBalancer` service a node port if it has none.
pub fn allocate_node_ports(service: &mut Value, used: &mut BTreeSet<i64>) {
	if !exposes_node_ports(service) {
		return;
	}
	let Some(ports) = service
		.pointer_mut("/spec/ports")
		.and_then(Value::as_array_mut)
	else {
		return;
	};

	for port in ports.iter_mut().filter_map(Value::as_object_mut) {
		if port.get("nodePort").and_then(Value::as_i64).is_some() {
			continue;
		}
		let next = (NODE_PORT_BASE..)
			.find(|candidate| !used.contains(candidate))
			.unwrap_or(NODE_PORT_BASE);
		used.insert(next);
		port.insert("nodePort".to_string(), Value::from(next));
	}
}

/// Carry allocated fields of a stored service over to its replacement.
///
/// `clusterIP` and per-port `nodePort` are kept when the new object leaves
/// them unset, matching ports by their `port` number.
pub fn preserve_service_allocations(existing: &Value, replacement: &mut Value) {
	let old_ports: HashMap<i64, i64> = existing
		.pointer("/spec/ports")
		.and_then(Value::as_array)
		.into_iter()
		.flatten()
		.filter_map(|p| Some((p.get("port")?.as_i64()?, p.get("nodePort")?.as_i64()?)))
		.collect();

	let cluster_ip = existing.pointer("/spec/clusterIP").cloned();
	let Some(spec) = replacement.get_mut("spec").and_then(Value::as_object_mut) else {
		return;
	};
	if let Some(ip) = cluster_ip {
		spec.entry("clusterIP").or_insert(ip);
	}

	let Some(ports) = spec.get_mut("ports").and_then(Value::as_array_mut) else {
		return;
	};
	for port in ports.iter_mut().filter_map(Value::as_object_mut) {
		if port.contains_key("nodePort") {
			continue;
		}
		let allocated = port
			.get("port")
			.and_then(Value::as_i64)
			.and_then(|p| old_ports.get(&p));
		if let Some(node_port) = allocated {
			port.insert("nodePort".to_string(), Value::from(*node_port));
		}
	}
}
