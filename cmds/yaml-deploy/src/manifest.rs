//! Loading the Deployment + Service manifest file.
//!
//! The file is a YAML stream of exactly two documents, a Deployment followed
//! by a Service. Each document is first read as a generic value and then
//! decoded into its typed `k8s-openapi` struct; the typed decoder rejects a
//! document whose `apiVersion`/`kind` do not match the position it is in.

use std::{
	fs,
	path::{Path, PathBuf},
};

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::core::GroupVersionKind;
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tracing::instrument;

/// Default manifest file, relative to the working directory.
pub const DEFAULT_MANIFEST_FILE: &str = "configuration.yaml";

#[derive(Debug, Error)]
pub enum ManifestError {
	#[error("resolving path {}", path.display())]
	Resolve {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("reading {}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("parsing YAML in {}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("expected a {kind} as document {position} in {}, but the file has only {found} document(s)", path.display())]
	MissingDocument {
		path: PathBuf,
		kind: &'static str,
		position: usize,
		found: usize,
	},

	#[error("document {position} is missing apiVersion or kind")]
	MissingApiVersionOrKind { position: usize },

	#[error("decoding document {position} ({api_version}/{found_kind}) as a {kind}")]
	Decode {
		position: usize,
		kind: &'static str,
		api_version: String,
		found_kind: String,
		#[source]
		source: serde_json::Error,
	},
}

/// The decoded contents of a manifest file.
#[derive(Debug, Clone)]
pub struct ManifestBundle {
	/// Absolute path the manifests were read from.
	pub source: PathBuf,
	pub deployment: Deployment,
	pub deployment_gvk: GroupVersionKind,
	pub service: Service,
	pub service_gvk: GroupVersionKind,
}

/// Split a YAML stream into its documents, skipping empty ones.
///
/// Merge keys (`<<: *anchor`) are resolved before the conversion to JSON.
pub fn split_documents(content: &str) -> Result<Vec<serde_json::Value>, serde_yaml::Error> {
	let mut documents = Vec::new();
	for doc in serde_yaml::Deserializer::from_str(content) {
		let mut value = serde_yaml::Value::deserialize(doc)?;
		if value.is_null() {
			continue;
		}
		value.apply_merge()?;
		documents.push(serde_yaml::from_value(value)?);
	}
	Ok(documents)
}

/// Extract a GroupVersionKind from a Kubernetes manifest.
pub fn gvk_from_manifest(manifest: &serde_json::Value) -> Option<GroupVersionKind> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
	Some(GroupVersionKind::gvk(group, version, kind))
}

/// Read and decode the manifest file at `path`.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_bundle(path: &Path) -> Result<ManifestBundle, ManifestError> {
	let source = std::path::absolute(path).map_err(|source| ManifestError::Resolve {
		path: path.to_path_buf(),
		source,
	})?;

	let content = fs::read_to_string(&source).map_err(|e| ManifestError::Read {
		path: source.clone(),
		source: e,
	})?;

	let documents = split_documents(&content).map_err(|e| ManifestError::Parse {
		path: source.clone(),
		source: e,
	})?;
	tracing::debug!(documents = documents.len(), "split manifest file");

	let found = documents.len();
	let mut documents = documents.into_iter();
	let mut next_document = |position: usize, kind: &'static str| {
		documents.next().ok_or_else(|| ManifestError::MissingDocument {
			path: source.clone(),
			kind,
			position,
			found,
		})
	};

	let (deployment, deployment_gvk) = decode::<Deployment>(next_document(1, "Deployment")?, 1)?;
	let (service, service_gvk) = decode::<Service>(next_document(2, "Service")?, 2)?;

	if found > 2 {
		tracing::warn!(
			ignored = found - 2,
			"manifest file has more than two documents; only the first two are applied"
		);
	}

	Ok(ManifestBundle {
		source,
		deployment,
		deployment_gvk,
		service,
		service_gvk,
	})
}

/// Decode one document into a typed resource, going through `serde_json::Value`.
fn decode<K>(
	document: serde_json::Value,
	position: usize,
) -> Result<(K, GroupVersionKind), ManifestError>
where
	K: k8s_openapi::Resource + DeserializeOwned,
{
	let gvk = gvk_from_manifest(&document)
		.ok_or(ManifestError::MissingApiVersionOrKind { position })?;

	let resource = serde_json::from_value::<K>(document).map_err(|source| ManifestError::Decode {
		position,
		kind: K::KIND,
		api_version: gvk.api_version(),
		found_kind: gvk.kind.clone(),
		source,
	})?;

	Ok((resource, gvk))
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use indoc::indoc;
	use rstest::rstest;
	use tempfile::TempDir;

	use super::*;

	const DEPLOYMENT: &str = indoc! {"
		apiVersion: apps/v1
		kind: Deployment
		metadata:
		  name: web
		spec:
		  replicas: 2
		  selector:
		    matchLabels:
		      app: web
		  template:
		    metadata:
		      labels:
		        app: web
		    spec:
		      containers:
		        - name: web
		          image: nginx:1.27
		          ports:
		            - containerPort: 80
	"};

	const SERVICE: &str = indoc! {"
		apiVersion: v1
		kind: Service
		metadata:
		  name: web
		spec:
		  type: NodePort
		  selector:
		    app: web
		  ports:
		    - port: 80
		      targetPort: 80
	"};

	fn write_manifest(dir: &TempDir, content: &str) -> PathBuf {
		let path = dir.path().join("configuration.yaml");
		fs::write(&path, content).unwrap();
		path
	}

	#[test]
	fn test_split_documents_skips_empty() {
		let docs = split_documents("---\na: 1\n---\n---\nb: 2\n").unwrap();
		assert_eq!(
			docs,
			vec![serde_json::json!({"a": 1}), serde_json::json!({"b": 2})]
		);
	}

	#[test]
	fn test_split_documents_resolves_merge_keys() {
		let docs = split_documents(indoc! {"
			metadata:
			  labels: &labels
			    app: web
			spec:
			  selector:
			    matchLabels:
			      <<: *labels
			      tier: frontend
		"})
		.unwrap();
		assert_eq!(
			docs[0].pointer("/spec/selector/matchLabels"),
			Some(&serde_json::json!({"app": "web", "tier": "frontend"}))
		);
	}

	#[test]
	fn test_load_bundle_with_anchored_labels() {
		let dir = TempDir::new().unwrap();
		let path = write_manifest(
			&dir,
			indoc! {"
				apiVersion: apps/v1
				kind: Deployment
				metadata:
				  name: web
				  labels: &labels
				    app: web
				spec:
				  selector:
				    matchLabels:
				      <<: *labels
				  template:
				    metadata:
				      labels:
				        <<: *labels
				    spec:
				      containers:
				        - name: web
				          image: nginx:1.27
				---
				apiVersion: v1
				kind: Service
				metadata:
				  name: web
				spec:
				  type: NodePort
				  selector:
				    app: web
				  ports:
				    - port: 80
			"},
		);

		let bundle = load_bundle(&path).unwrap();
		let match_labels = bundle
			.deployment
			.spec
			.and_then(|s| s.selector.match_labels)
			.unwrap();
		assert_eq!(match_labels.get("app").map(String::as_str), Some("web"));
	}

	#[rstest]
	#[case("apps/v1", "Deployment", "apps", "v1")]
	#[case("v1", "Service", "", "v1")]
	fn test_gvk_from_manifest(
		#[case] api_version: &str,
		#[case] kind: &str,
		#[case] group: &str,
		#[case] version: &str,
	) {
		let manifest = serde_json::json!({"apiVersion": api_version, "kind": kind});
		let gvk = gvk_from_manifest(&manifest).unwrap();
		assert_eq!(gvk.group, group);
		assert_eq!(gvk.version, version);
		assert_eq!(gvk.kind, kind);
	}

	#[test]
	fn test_load_bundle() {
		let dir = TempDir::new().unwrap();
		let path = write_manifest(&dir, &format!("{DEPLOYMENT}---\n{SERVICE}"));

		let bundle = load_bundle(&path).unwrap();
		assert!(bundle.source.is_absolute());
		assert_eq!(bundle.deployment.metadata.name.as_deref(), Some("web"));
		assert_eq!(
			bundle.deployment.spec.as_ref().and_then(|s| s.replicas),
			Some(2)
		);
		assert_eq!(bundle.deployment_gvk.group, "apps");
		assert_eq!(bundle.service.metadata.name.as_deref(), Some("web"));
		assert_eq!(
			bundle.service.spec.as_ref().and_then(|s| s.type_.as_deref()),
			Some("NodePort")
		);
		assert_eq!(bundle.service_gvk.kind, "Service");
	}

	#[test]
	fn test_load_bundle_ignores_extra_documents() {
		let dir = TempDir::new().unwrap();
		let path = write_manifest(
			&dir,
			&format!("{DEPLOYMENT}---\n{SERVICE}---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: extra\n"),
		);

		let bundle = load_bundle(&path).unwrap();
		assert_eq!(bundle.service.metadata.name.as_deref(), Some("web"));
	}

	#[test]
	fn test_load_bundle_missing_service() {
		let dir = TempDir::new().unwrap();
		let path = write_manifest(&dir, DEPLOYMENT);

		assert_matches!(
			load_bundle(&path),
			Err(ManifestError::MissingDocument { kind: "Service", position: 2, found: 1, .. })
		);
	}

	#[test]
	fn test_load_bundle_wrong_order() {
		let dir = TempDir::new().unwrap();
		let path = write_manifest(&dir, &format!("{SERVICE}---\n{DEPLOYMENT}"));

		assert_matches!(
			load_bundle(&path),
			Err(ManifestError::Decode { kind: "Deployment", position: 1, ref found_kind, .. }) if found_kind == "Service"
		);
	}

	#[test]
	fn test_load_bundle_missing_kind() {
		let dir = TempDir::new().unwrap();
		let path = write_manifest(&dir, "metadata:\n  name: web\n");

		assert_matches!(
			load_bundle(&path),
			Err(ManifestError::MissingApiVersionOrKind { position: 1 })
		);
	}

	#[test]
	fn test_load_bundle_missing_file() {
		let dir = TempDir::new().unwrap();

		assert_matches!(
			load_bundle(&dir.path().join("absent.yaml")),
			Err(ManifestError::Read { .. })
		);
	}

	#[test]
	fn test_load_bundle_invalid_yaml() {
		let dir = TempDir::new().unwrap();
		let path = write_manifest(&dir, "apiVersion: [unclosed\n");

		assert_matches!(load_bundle(&path), Err(ManifestError::Parse { .. }));
	}
}
