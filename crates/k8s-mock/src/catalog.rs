//! Resource types known to the mock server.

use std::collections::HashMap;

/// Maps `apiVersion`/`kind` pairs to API paths.
pub struct MockCatalog {
	pub core_resources: Vec<MockApiResource>,
	pub group_resources: HashMap<String, Vec<MockApiResource>>,
}

impl Default for MockCatalog {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::namespaced("pods", "Pod"),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: HashMap::from([(
				"apps/v1".to_string(),
				vec![MockApiResource::namespaced("deployments", "Deployment")],
			)]),
		}
	}
}

/// A mock API resource definition.
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
}

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: true,
		}
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: false,
		}
	}
}

impl MockCatalog {
	/// Collection path and object name for a raw manifest.
	///
	/// Namespaced objects without `metadata.namespace` land in `default`.
	/// Returns `None` for kinds the catalog does not know.
	pub fn api_path_for_manifest(&self, manifest: &serde_json::Value) -> Option<(String, String)> {
		let api_version = manifest.get("apiVersion")?.as_str()?;
		let kind = manifest.get("kind")?.as_str()?;
		let name = manifest.pointer("/metadata/name")?.as_str()?.to_string();
		let namespace = manifest
			.pointer("/metadata/namespace")
			.and_then(|n| n.as_str())
			.unwrap_or("default");

		let grouped = api_version.contains('/');
		let resource = if grouped {
			self.group_resources
				.get(api_version)?
				.iter()
				.find(|r| r.kind == kind)?
		} else {
			self.core_resources.iter().find(|r| r.kind == kind)?
		};

		let prefix = if grouped { "apis" } else { "api" };
		let path = if resource.namespaced {
			format!("/{prefix}/{api_version}/namespaces/{namespace}/{}", resource.name)
		} else {
			format!("/{prefix}/{api_version}/{}", resource.name)
		};

		Some((path, name))
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_paths_for_known_kinds() {
		let catalog = MockCatalog::default();

		let deployment = json!({
			"apiVersion": "apps/v1",
			"kind": "Deployment",
			"metadata": {"name": "web"}
		});
		assert_eq!(
			catalog.api_path_for_manifest(&deployment),
			Some((
				"/apis/apps/v1/namespaces/default/deployments".to_string(),
				"web".to_string()
			))
		);

		let pod = json!({
			"apiVersion": "v1",
			"kind": "Pod",
			"metadata": {"name": "kube-addon-manager-minikube", "namespace": "kube-system"}
		});
		assert_eq!(
			catalog.api_path_for_manifest(&pod),
			Some((
				"/api/v1/namespaces/kube-system/pods".to_string(),
				"kube-addon-manager-minikube".to_string()
			))
		);

		let ns = json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "demo"}});
		assert_eq!(
			catalog.api_path_for_manifest(&ns),
			Some(("/api/v1/namespaces".to_string(), "demo".to_string()))
		);
	}

	#[test]
	fn test_unknown_kind() {
		let catalog = MockCatalog::default();
		let cron = json!({
			"apiVersion": "batch/v1",
			"kind": "CronJob",
			"metadata": {"name": "nightly"}
		});
		assert_eq!(catalog.api_path_for_manifest(&cron), None);
	}
}
