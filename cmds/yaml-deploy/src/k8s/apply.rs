//! Create-or-update of typed namespaced resources.
//!
//! The engine only issues the individual API calls. Choosing between
//! create and update, and reporting what happened, is left to the caller.

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::{
	api::{Api, PostParams},
	Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::instrument;

/// Field manager recorded on objects written by this tool.
pub const FIELD_MANAGER: &str = "yaml-deploy";

/// Errors that can occur during apply operations.
#[derive(Debug, Error)]
pub enum ApplyError {
	#[error("{kind} manifest is missing metadata.name")]
	MissingName { kind: String },

	#[error("creating {kind} {namespace}/{name}")]
	CreateFailed {
		kind: String,
		namespace: String,
		name: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("updating {kind} {namespace}/{name}")]
	UpdateFailed {
		kind: String,
		namespace: String,
		name: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("getting {kind} {namespace}/{name}")]
	GetFailed {
		kind: String,
		namespace: String,
		name: String,
		#[source]
		source: Box<kube::Error>,
	},
}

impl ApplyError {
	/// The Kubernetes API error behind this failure.
	pub fn kube_error(&self) -> Option<&kube::Error> {
		match self {
			Self::MissingName { .. } => None,
			Self::CreateFailed { source, .. }
			| Self::UpdateFailed { source, .. }
			| Self::GetFailed { source, .. } => Some(source),
		}
	}

	/// HTTP status code returned by the API server, if the request got that far.
	pub fn status_code(&self) -> Option<u16> {
		match self.kube_error()? {
			kube::Error::Api(err) => Some(err.code),
			_ => None,
		}
	}
}

/// Which call ended up persisting a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
	Created,
	Updated,
}

/// Engine for writing resources to a Kubernetes cluster.
#[derive(Clone)]
pub struct ApplyEngine {
	client: Client,
	default_namespace: String,
	dry_run: bool,
}

impl ApplyEngine {
	/// Create a new apply engine.
	///
	/// `default_namespace` is used for objects whose manifest leaves
	/// `metadata.namespace` unset. With `dry_run` every write is sent as a
	/// server-side dry run.
	pub fn new(client: Client, default_namespace: String, dry_run: bool) -> Self {
		Self {
			client,
			default_namespace,
			dry_run,
		}
	}

	pub fn dry_run(&self) -> bool {
		self.dry_run
	}

	/// Namespace an object is written to.
	pub fn namespace_for<K: ResourceExt>(&self, obj: &K) -> String {
		obj.namespace()
			.unwrap_or_else(|| self.default_namespace.clone())
	}

	/// Create the object. Fails if it already exists.
	#[instrument(skip_all, fields(kind = %K::kind(&()), name = obj.meta().name.as_deref().unwrap_or("unknown")))]
	pub async fn create<K>(&self, obj: &K) -> Result<K, ApplyError>
	where
		K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
			+ Clone
			+ Debug
			+ Serialize
			+ DeserializeOwned,
	{
		let (namespace, name) = self.target(obj)?;
		let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);

		let created = api
			.create(&self.post_params(), obj)
			.await
			.map_err(|e| ApplyError::CreateFailed {
				kind: K::kind(&()).to_string(),
				namespace: namespace.clone(),
				name: name.clone(),
				source: Box::new(e),
			})?;

		tracing::debug!(namespace = %namespace, dry_run = self.dry_run, "created");
		Ok(created)
	}

	/// Replace the live object with this one (HTTP PUT).
	#[instrument(skip_all, fields(kind = %K::kind(&()), name = obj.meta().name.as_deref().unwrap_or("unknown")))]
	pub async fn replace<K>(&self, obj: &K) -> Result<K, ApplyError>
	where
		K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
			+ Clone
			+ Debug
			+ Serialize
			+ DeserializeOwned,
	{
		let (namespace, name) = self.target(obj)?;
		let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);

		let updated = api
			.replace(&name, &self.post_params(), obj)
			.await
			.map_err(|e| ApplyError::UpdateFailed {
				kind: K::kind(&()).to_string(),
				namespace: namespace.clone(),
				name: name.clone(),
				source: Box::new(e),
			})?;

		tracing::debug!(namespace = %namespace, dry_run = self.dry_run, "updated");
		Ok(updated)
	}

	/// Fetch a live object by namespace and name.
	#[instrument(skip(self), fields(kind = %K::kind(&())))]
	pub async fn get<K>(&self, namespace: &str, name: &str) -> Result<K, ApplyError>
	where
		K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
			+ Clone
			+ Debug
			+ DeserializeOwned,
	{
		let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
		api.get(name).await.map_err(|e| ApplyError::GetFailed {
			kind: K::kind(&()).to_string(),
			namespace: namespace.to_string(),
			name: name.to_string(),
			source: Box::new(e),
		})
	}

	fn target<K: Resource<DynamicType = ()>>(&self, obj: &K) -> Result<(String, String), ApplyError> {
		let name = obj
			.meta()
			.name
			.clone()
			.ok_or_else(|| ApplyError::MissingName {
				kind: K::kind(&()).to_string(),
			})?;
		Ok((self.namespace_for(obj), name))
	}

	fn post_params(&self) -> PostParams {
		PostParams {
			dry_run: self.dry_run,
			field_manager: Some(FIELD_MANAGER.to_string()),
			..Default::default()
		}
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use k8s_openapi::api::apps::v1::Deployment;
	use kube::api::ObjectMeta;

	use super::*;

	fn engine() -> ApplyEngine {
		// The client is never used by these tests; building one needs a runtime
		// but not a reachable server.
		let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
		let client = Client::try_from(config).unwrap();
		ApplyEngine::new(client, "default".to_string(), false)
	}

	#[tokio::test]
	async fn test_namespace_falls_back_to_default() {
		let engine = engine();
		let deployment = Deployment {
			metadata: ObjectMeta {
				name: Some("web".to_string()),
				..Default::default()
			},
			..Default::default()
		};
		assert_eq!(engine.namespace_for(&deployment), "default");
	}

	#[tokio::test]
	async fn test_manifest_namespace_wins() {
		let engine = engine();
		let deployment = Deployment {
			metadata: ObjectMeta {
				name: Some("web".to_string()),
				namespace: Some("staging".to_string()),
				..Default::default()
			},
			..Default::default()
		};
		assert_eq!(engine.namespace_for(&deployment), "staging");
	}

	#[tokio::test]
	async fn test_target_falls_back_to_default_namespace() {
		let engine = engine();
		let named = Deployment {
			metadata: ObjectMeta {
				name: Some("web".to_string()),
				..Default::default()
			},
			..Default::default()
		};
		assert_eq!(
			engine.target(&named).unwrap(),
			("default".to_string(), "web".to_string())
		);
	}

	#[tokio::test]
	async fn test_post_params() {
		let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
		let client = Client::try_from(config).unwrap();
		let params = ApplyEngine::new(client, "default".to_string(), true).post_params();
		assert!(params.dry_run);
		assert_eq!(params.field_manager.as_deref(), Some(FIELD_MANAGER));
	}

	#[tokio::test]
	async fn test_create_without_name_is_rejected() {
		let engine = engine();
		let result = engine.create(&Deployment::default()).await;
		assert_matches!(
			result,
			Err(ApplyError::MissingName { kind }) if kind == "Deployment"
		);
	}
}
