//! Configuration file support for yaml-deploy
//!
//! A `.yaml-deploy.yaml` file can be placed next to the manifest file or in
//! any parent directory. Values from it are used when the matching
//! command-line flag is not given.

use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::k8s::endpoint::PodRef;

/// The name of the config file yaml-deploy looks for
pub const CONFIG_FILE_NAME: &str = ".yaml-deploy.yaml";

/// Root configuration structure for .yaml-deploy.yaml
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeployConfig {
	/// Kubeconfig file, relative paths are resolved against the config file's directory
	#[serde(default)]
	pub kubeconfig: Option<PathBuf>,

	/// Kubeconfig context to use
	#[serde(default)]
	pub context: Option<String>,

	/// Namespace for manifests that do not set one
	#[serde(default)]
	pub namespace: Option<String>,

	/// Pod whose host IP is shown in the service URL
	#[serde(default)]
	pub host_pod: Option<HostPodConfig>,

	/// Read timeout for API requests, in seconds
	#[serde(default)]
	pub request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HostPodConfig {
	pub namespace: String,
	pub name: String,
}

impl From<HostPodConfig> for PodRef {
	fn from(value: HostPodConfig) -> Self {
		PodRef::new(value.namespace, value.name)
	}
}

impl DeployConfig {
	/// Load config by searching from the given directory upward
	pub fn load_from_directory(start_dir: &Path) -> Result<Option<Self>> {
		if let Some(config_path) = find_config_file(start_dir) {
			let config = Self::load_from_file(&config_path)?;
			Ok(Some(config))
		} else {
			Ok(None)
		}
	}

	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)
			.with_context(|| format!("failed to read config file: {}", path.display()))?;
		let mut config: DeployConfig = serde_yaml::from_str(&content)
			.with_context(|| format!("failed to parse config file: {}", path.display()))?;

		if let (Some(kubeconfig), Some(base)) = (&config.kubeconfig, path.parent()) {
			if kubeconfig.is_relative() {
				config.kubeconfig = Some(base.join(kubeconfig));
			}
		}

		tracing::debug!(path = %path.display(), "loaded config file");
		Ok(config)
	}

	pub fn request_timeout(&self) -> Option<Duration> {
		self.request_timeout_seconds.map(Duration::from_secs)
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let mut current = start_dir.to_path_buf();

	// Canonicalize if possible to handle relative paths
	if let Ok(canonical) = current.canonicalize() {
		current = canonical;
	}

	loop {
		let config_path = current.join(CONFIG_FILE_NAME);
		if config_path.is_file() {
			return Some(config_path);
		}

		match current.parent() {
			Some(parent) if parent != current => current = parent.to_path_buf(),
			_ => break,
		}
	}

	None
}

#[cfg(test)]
mod tests {
	use indoc::indoc;
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn test_find_config_in_current_dir() {
		let temp = TempDir::new().unwrap();
		let config_path = temp.path().join(CONFIG_FILE_NAME);
		fs::write(&config_path, "namespace: staging\n").unwrap();

		let found = find_config_file(temp.path());
		// Compare file names only to avoid canonicalization issues on macOS
		assert!(found.is_some());
		assert_eq!(found.unwrap().file_name(), config_path.file_name());
	}

	#[test]
	fn test_find_config_in_parent_dir() {
		let temp = TempDir::new().unwrap();
		fs::write(temp.path().join(CONFIG_FILE_NAME), "namespace: staging\n").unwrap();

		let subdir = temp.path().join("manifests").join("web");
		fs::create_dir_all(&subdir).unwrap();

		let config = DeployConfig::load_from_directory(&subdir)
			.unwrap()
			.expect("config should be found in a parent directory");
		assert_eq!(config.namespace.as_deref(), Some("staging"));
	}

	#[test]
	fn test_load_full_config() {
		let temp = TempDir::new().unwrap();
		let config_path = temp.path().join(CONFIG_FILE_NAME);
		fs::write(
			&config_path,
			indoc! {"
				kubeconfig: kube/config
				context: minikube
				namespace: demo
				hostPod:
				  namespace: kube-system
				  name: kube-proxy-abcde
				requestTimeoutSeconds: 5
			"},
		)
		.unwrap();

		let config = DeployConfig::load_from_file(&config_path).unwrap();
		assert_eq!(config.kubeconfig, Some(temp.path().join("kube/config")));
		assert_eq!(config.context.as_deref(), Some("minikube"));
		assert_eq!(config.namespace.as_deref(), Some("demo"));
		assert_eq!(
			config.host_pod.map(PodRef::from),
			Some(PodRef::new("kube-system", "kube-proxy-abcde"))
		);
		assert_eq!(config.request_timeout_seconds, Some(5));
	}

	#[test]
	fn test_absolute_kubeconfig_is_kept() {
		let temp = TempDir::new().unwrap();
		let config_path = temp.path().join(CONFIG_FILE_NAME);
		fs::write(&config_path, "kubeconfig: /etc/kube/config\n").unwrap();

		let config = DeployConfig::load_from_file(&config_path).unwrap();
		assert_eq!(config.kubeconfig, Some(PathBuf::from("/etc/kube/config")));
	}

	#[test]
	fn test_unknown_key_is_rejected() {
		let temp = TempDir::new().unwrap();
		let config_path = temp.path().join(CONFIG_FILE_NAME);
		fs::write(&config_path, "namespaces: typo\n").unwrap();

		let err = DeployConfig::load_from_file(&config_path).unwrap_err();
		assert!(err.to_string().contains("failed to parse config file"));
	}

	#[test]
	fn test_no_config_found() {
		let temp = TempDir::new().unwrap();
		// Walking up from a temp dir could still hit a stray config file on the
		// host, so only assert on the directory itself.
		assert!(!temp.path().join(CONFIG_FILE_NAME).exists());
		assert_eq!(
			find_config_file(temp.path()).filter(|p| p.starts_with(temp.path())),
			None
		);
	}
}
