//! Deploy command handler.
//!
//! Reads the Deployment + Service manifest file, creates both objects in the
//! cluster (updating them when creation fails), and prints the URL the
//! service is reachable at.

use std::{
	fmt::Debug,
	io::Write,
	path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Args;
use k8s_openapi::{
	api::{
		apps::v1::Deployment,
		core::v1::{Pod, Service},
	},
	NamespaceResourceScope,
};
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{instrument, Level};

use super::output::StatusPrinter;
use crate::{
	config::DeployConfig,
	k8s::{
		apply::{ApplyAction, ApplyEngine, ApplyError},
		client::{ClusterConnection, ConnectOpts, DEFAULT_API_TIMEOUT},
		endpoint::{self, PodRef, ServiceUrl},
		DEFAULT_NAMESPACE,
	},
	manifest::{self, DEFAULT_MANIFEST_FILE},
};

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
	/// (optional) absolute path to the kubeconfig file [default: $KUBECONFIG, then ~/.kube/config]
	#[arg(long)]
	pub kubeconfig: Option<PathBuf>,

	/// (optional) path to the YAML file holding the Deployment and the Service
	#[arg(short = 'f', long = "filename", default_value = DEFAULT_MANIFEST_FILE)]
	pub file: PathBuf,

	/// Kubeconfig context to use instead of the current one
	#[arg(long)]
	pub context: Option<String>,

	/// Namespace for manifests that do not set one [default: default]
	#[arg(short = 'n', long)]
	pub namespace: Option<String>,

	/// Pod whose host IP is used in the printed URL [default: kube-system/kube-addon-manager-minikube]
	#[arg(long, value_name = "NAMESPACE/NAME")]
	pub host_pod: Option<PodRef>,

	/// Send every write as a server-side dry run; nothing is persisted
	#[arg(long)]
	pub dry_run: bool,

	/// Config file to use instead of searching for .yaml-deploy.yaml
	#[arg(long)]
	pub config: Option<PathBuf>,

	/// Log level (trace, debug, info, warn, error). Overrides RUST_LOG
	#[arg(long)]
	pub log_level: Option<Level>,
}

/// Options for running a deploy, with flags and config file already merged.
#[derive(Debug, Clone)]
pub struct DeployOpts {
	pub connect: ConnectOpts,
	/// Namespace for manifests without `metadata.namespace`.
	pub namespace: String,
	/// Pod looked up for the host part of the URL.
	pub host_pod: PodRef,
	pub dry_run: bool,
}

impl Default for DeployOpts {
	fn default() -> Self {
		Self {
			connect: ConnectOpts::default(),
			namespace: DEFAULT_NAMESPACE.to_string(),
			host_pod: PodRef::default(),
			dry_run: false,
		}
	}
}

impl DeployOpts {
	/// Merge command-line flags over a config file; flags win.
	pub fn resolve(args: &DeployArgs, config: DeployConfig) -> Self {
		let timeout = config.request_timeout().unwrap_or(DEFAULT_API_TIMEOUT);
		Self {
			connect: ConnectOpts {
				kubeconfig: args.kubeconfig.clone().or(config.kubeconfig),
				context: args.context.clone().or(config.context),
				timeout,
			},
			namespace: args
				.namespace
				.clone()
				.or(config.namespace)
				.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
			host_pod: args
				.host_pod
				.clone()
				.or_else(|| config.host_pod.map(PodRef::from))
				.unwrap_or_default(),
			dry_run: args.dry_run,
		}
	}
}

/// Outcome of a successful deploy.
#[derive(Debug, Clone)]
pub struct DeployReport {
	pub deployment: Deployment,
	pub deployment_action: ApplyAction,
	pub service: Service,
	pub service_action: ApplyAction,
	pub url: ServiceUrl,
}

/// Run the deploy command.
pub async fn run<W: Write>(args: DeployArgs, writer: W) -> Result<()> {
	let config = load_config(&args)?;
	let opts = DeployOpts::resolve(&args, config.unwrap_or_default());
	tracing::debug!(?opts, "resolved options");

	deploy(&args.file, None, opts, writer).await?;
	Ok(())
}

fn load_config(args: &DeployArgs) -> Result<Option<DeployConfig>> {
	if let Some(path) = &args.config {
		return DeployConfig::load_from_file(path).map(Some);
	}

	let manifest_path = std::path::absolute(&args.file)
		.with_context(|| format!("resolving path {}", args.file.display()))?;
	match manifest_path.parent() {
		Some(dir) => DeployConfig::load_from_directory(dir),
		None => Ok(None),
	}
}

/// Apply the manifests in `manifest_path` to the cluster.
///
/// Uses `connection` when given, otherwise connects as described by
/// `opts.connect`. Status lines are written to `writer`.
#[instrument(skip_all, fields(path = %manifest_path.display(), dry_run = opts.dry_run))]
pub async fn deploy<W: Write>(
	manifest_path: &Path,
	connection: Option<ClusterConnection>,
	opts: DeployOpts,
	writer: W,
) -> Result<DeployReport> {
	let mut out = StatusPrinter::new(writer);

	let bundle = manifest::load_bundle(manifest_path)
		.with_context(|| format!("loading manifests from {}", manifest_path.display()))?;
	out.decoded(&bundle.deployment_gvk)?;

	let connection = match connection {
		Some(conn) => conn,
		None => ClusterConnection::connect(&opts.connect)
			.await
			.context("connecting to Kubernetes cluster")?,
	};

	let engine = ApplyEngine::new(
		connection.client().clone(),
		opts.namespace.clone(),
		opts.dry_run,
	);

	let (deployment, deployment_action) =
		create_or_update(&engine, &bundle.deployment, "deployment", &mut out).await?;
	let (service, service_action) =
		create_or_update(&engine, &bundle.service, "service", &mut out).await?;

	// A dry run persisted nothing, so there is no live object to read back.
	let running_service = if engine.dry_run() {
		service.clone()
	} else {
		engine
			.get::<Service>(&engine.namespace_for(&service), &service.name_any())
			.await
			.context("fetching the running service")?
	};
	let node_port = endpoint::node_port(&running_service)?;

	let host = lookup_host(&engine, &opts.host_pod, &mut out).await?;
	let url = ServiceUrl { host, node_port };
	out.url(&url)?;

	Ok(DeployReport {
		deployment,
		deployment_action,
		service,
		service_action,
		url,
	})
}

/// Create `obj`, or update it if creation fails for any reason.
async fn create_or_update<K, W>(
	engine: &ApplyEngine,
	obj: &K,
	label: &str,
	out: &mut StatusPrinter<W>,
) -> Result<(K, ApplyAction)>
where
	K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
		+ Clone
		+ Debug
		+ Serialize
		+ DeserializeOwned,
	W: Write,
{
	let name = obj.name_any();
	out.attempting(ApplyAction::Created, label, &name)?;

	let (applied, action) = match engine.create(obj).await {
		Ok(created) => (created, ApplyAction::Created),
		Err(err @ ApplyError::MissingName { .. }) => return Err(err.into()),
		Err(err) => {
			tracing::info!(
				error = %describe(&err),
				status = ?err.status_code(),
				"create failed, trying update"
			);
			out.create_failed(&describe(&err))?;
			out.attempting(ApplyAction::Updated, label, &name)?;

			let updated = engine.replace(obj).await?;
			(updated, ApplyAction::Updated)
		}
	};

	out.applied(action, label, &applied.name_any())?;
	Ok((applied, action))
}

/// Best-effort lookup of the node IP for the URL. Failures are reported but not fatal.
async fn lookup_host<W: Write>(
	engine: &ApplyEngine,
	pod: &PodRef,
	out: &mut StatusPrinter<W>,
) -> Result<Option<String>> {
	match engine.get::<Pod>(&pod.namespace, &pod.name).await {
		Ok(found) => match endpoint::host_ip(&found) {
			Some(ip) => Ok(Some(ip.to_string())),
			None => {
				out.host_lookup_failed(&format!("pod {pod} has no host IP"))?;
				Ok(None)
			}
		},
		Err(err) => {
			tracing::debug!(pod = %pod, error = %describe(&err), "host pod lookup failed");
			out.host_lookup_failed(&describe(&err))?;
			Ok(None)
		}
	}
}

/// One-line description including the API server's message.
fn describe(err: &ApplyError) -> String {
	match err.kube_error() {
		Some(source) => format!("{err}: {source}"),
		None => err.to_string(),
	}
}
