//! Kubernetes cluster connection management.

use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

/// Default timeout for Kubernetes API requests.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("reading kubeconfig {}", path.display())]
	ReadKubeconfig {
		path: PathBuf,
		#[source]
		source: KubeconfigError,
	},

	#[error("no context named `{0}` was found. Please check your kubeconfig")]
	ContextNotFound(String),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// How to reach the cluster.
#[derive(Debug, Clone)]
pub struct ConnectOpts {
	/// Explicit kubeconfig file. `None` falls back to `$KUBECONFIG`, then `~/.kube/config`.
	pub kubeconfig: Option<PathBuf>,
	/// Context to use instead of the kubeconfig's current context.
	pub context: Option<String>,
	/// Read timeout applied to every API request.
	pub timeout: Duration,
}

impl Default for ConnectOpts {
	fn default() -> Self {
		Self {
			kubeconfig: None,
			context: None,
			timeout: DEFAULT_API_TIMEOUT,
		}
	}
}

/// Represents a connection to a Kubernetes cluster.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	/// Context name, or "(current)" when the kubeconfig's current context was used
	/// without naming it.
	cluster_identifier: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("cluster_identifier", &self.cluster_identifier)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Read the kubeconfig named by `opts` and connect with it.
	#[instrument(skip_all, fields(kubeconfig = ?opts.kubeconfig, context = ?opts.context))]
	pub async fn connect(opts: &ConnectOpts) -> Result<Self, ConnectionError> {
		let kubeconfig = match &opts.kubeconfig {
			Some(path) => read_kubeconfig(path)?,
			None => Kubeconfig::read()?,
		};
		Self::from_kubeconfig(kubeconfig, opts.context.as_deref(), opts.timeout).await
	}

	/// Connect using an already loaded kubeconfig.
	#[instrument(skip_all, fields(context = ?context))]
	pub async fn from_kubeconfig(
		kubeconfig: Kubeconfig,
		context: Option<&str>,
		timeout: Duration,
	) -> Result<Self, ConnectionError> {
		if let Some(name) = context {
			if !kubeconfig.contexts.iter().any(|c| c.name == name) {
				return Err(ConnectionError::ContextNotFound(name.to_string()));
			}
		}

		let cluster_identifier = context
			.map(str::to_string)
			.or_else(|| kubeconfig.current_context.clone())
			.unwrap_or_else(|| "(current)".to_string());

		let mut config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: context.map(str::to_string),
				..Default::default()
			},
		)
		.await?;

		config.read_timeout = Some(timeout);
		let client = Client::try_from(config)?;

		let server_version = client.apiserver_version().await?;

		tracing::debug!(
			cluster = %cluster_identifier,
			server_version = %format!("{}.{}", server_version.major, server_version.minor),
			"connected to cluster"
		);

		Ok(Self {
			client,
			server_version,
			cluster_identifier,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Get the server version.
	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	/// Get the cluster identifier (context name).
	pub fn cluster_identifier(&self) -> &str {
		&self.cluster_identifier
	}
}

fn read_kubeconfig(path: &Path) -> Result<Kubeconfig, ConnectionError> {
	Kubeconfig::read_from(path).map_err(|source| ConnectionError::ReadKubeconfig {
		path: path.to_path_buf(),
		source,
	})
}
