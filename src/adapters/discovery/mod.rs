//! Target Discovery Adapters
//!
//! Implementations of the `TargetProvider` port: the Kubernetes pod
//! list (in-cluster service account or kubeconfig) and a static list.

pub mod kubeconfig;
pub mod kubernetes;
pub mod static_list;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{DiscoveryConfig, DiscoverySource};
use crate::ports::target_provider::TargetProvider;

pub use kubeconfig::{ApiAuth, ApiCredentials};
pub use kubernetes::KubernetesProvider;
pub use static_list::StaticProvider;

/// Resolve `auto` to a concrete source.
///
/// An explicit kubeconfig always wins. Without one, the in-cluster service
/// account is used when running in a pod, the default kubeconfig otherwise.
fn resolve_source(config: &DiscoveryConfig, in_cluster: bool) -> DiscoverySource {
    match config.source {
        DiscoverySource::Auto if config.kubeconfig.is_some() => DiscoverySource::Kubeconfig,
        DiscoverySource::Auto if in_cluster => DiscoverySource::InCluster,
        DiscoverySource::Auto => DiscoverySource::Kubeconfig,
        other => other,
    }
}

/// Build the provider selected by the discovery configuration.
///
/// # Errors
/// Fails when the selected credentials cannot be loaded.
pub fn build_provider(config: &DiscoveryConfig) -> Result<Arc<dyn TargetProvider>> {
    let in_cluster = std::env::var_os("KUBERNETES_SERVICE_HOST").is_some();
    let source = resolve_source(config, in_cluster);

    let credentials = match source {
        DiscoverySource::Static => {
            info!(targets = config.static_targets.len(), "Using static target list");
            return Ok(Arc::new(StaticProvider::new(config.static_targets.clone())));
        }
        DiscoverySource::InCluster => {
            ApiCredentials::in_cluster().context("Failed to load in-cluster credentials")?
        }
        DiscoverySource::Kubeconfig | DiscoverySource::Auto => {
            let path = config
                .kubeconfig_path()
                .context("No kubeconfig path given and no home directory found")?;
            ApiCredentials::from_kubeconfig(&path)?
        }
    };

    // The context namespace is informational; discovery is cluster-wide
    // unless `discovery.namespace` is set.
    let context_namespace = credentials.namespace.clone();
    let provider = KubernetesProvider::new(
        credentials,
        config.namespace.as_deref(),
        Duration::from_millis(config.request_timeout_ms),
    )?;
    info!(
        source = ?source,
        url = %provider.pods_url(),
        context_namespace = ?context_namespace,
        "Using Kubernetes pod discovery"
    );
    Ok(Arc::new(provider))
}
