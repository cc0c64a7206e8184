//! Kubernetes Pod Discovery - Pod IPs from the API Server
//!
//! Lists pods through the core/v1 REST API with reqwest and turns every
//! pod with its own network address (pod IP different from host IP)
//! into a probe target. Read-only; a single list call per discovery.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::kubeconfig::{ApiAuth, ApiCredentials};
use crate::domain::target::{Target, is_probe_target};
use crate::ports::target_provider::{DiscoveryError, TargetProvider};

/// Longest error body kept in a [`DiscoveryError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Minimal core/v1 `PodList`.
#[derive(Debug, Default, Deserialize)]
pub struct PodList {
    /// Pods in the list.
    #[serde(default)]
    pub items: Vec<Pod>,
}

/// Minimal core/v1 `Pod`.
#[derive(Debug, Default, Deserialize)]
pub struct Pod {
    /// Object metadata.
    #[serde(default)]
    pub metadata: PodMetadata,
    /// Observed status.
    #[serde(default)]
    pub status: PodStatus,
}

/// Pod name and namespace.
#[derive(Debug, Default, Deserialize)]
pub struct PodMetadata {
    /// Pod name.
    #[serde(default)]
    pub name: String,
    /// Pod namespace.
    #[serde(default)]
    pub namespace: String,
}

/// Addresses reported in the pod status.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    /// Address of the node running the pod.
    #[serde(rename = "hostIP", default)]
    pub host_ip: String,
    /// Address of the pod itself.
    #[serde(rename = "podIP", default)]
    pub pod_ip: String,
}

/// Probe targets of a pod list, in list order.
pub fn targets_from_pod_list(list: &PodList) -> Vec<Target> {
    list.items
        .iter()
        .filter(|pod| is_probe_target(&pod.status.host_ip, &pod.status.pod_ip))
        .map(|pod| Target::new(pod.status.pod_ip.as_str()))
        .collect()
}

/// Target provider backed by the Kubernetes API server.
pub struct KubernetesProvider {
    /// HTTP client configured with the cluster CA and client identity.
    http: Client,
    /// Credentials for every request.
    credentials: ApiCredentials,
    /// Pod list URL (cluster-wide or one namespace).
    pods_url: String,
}

impl KubernetesProvider {
    /// Create a provider listing pods in `namespace`, or cluster-wide.
    ///
    /// # Errors
    /// Fails when the CA bundle or client identity is not valid PEM.
    pub fn new(
        credentials: ApiCredentials,
        namespace: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(credentials.insecure_skip_tls_verify);

        if let Some(ca) = &credentials.ca_pem {
            for cert in Certificate::from_pem_bundle(ca).context("Invalid cluster CA PEM")? {
                builder = builder.add_root_certificate(cert);
            }
        }
        if let ApiAuth::ClientCertificate { cert_pem, key_pem } = &credentials.auth {
            let mut pem = cert_pem.clone();
            pem.push(b'\n');
            pem.extend_from_slice(key_pem);
            let identity = Identity::from_pem(&pem).context("Invalid client certificate/key PEM")?;
            builder = builder.identity(identity);
        }

        let http = builder
            .build()
            .context("Failed to build Kubernetes HTTP client")?;

        let pods_url = match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => format!("{}/api/v1/namespaces/{ns}/pods", credentials.server),
            None => format!("{}/api/v1/pods", credentials.server),
        };

        Ok(Self {
            http,
            credentials,
            pods_url,
        })
    }

    /// URL queried on every discovery.
    pub fn pods_url(&self) -> &str {
        &self.pods_url
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, DiscoveryError> {
        let request = match &self.credentials.auth {
            ApiAuth::Bearer(token) => request.bearer_auth(token),
            ApiAuth::BearerFile(path) => {
                let token = std::fs::read_to_string(path).map_err(|e| {
                    DiscoveryError::Credentials(format!("{}: {e}", path.display()))
                })?;
                request.bearer_auth(token.trim())
            }
            ApiAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
            ApiAuth::ClientCertificate { .. } | ApiAuth::None => request,
        };
        Ok(request)
    }
}

#[async_trait]
impl TargetProvider for KubernetesProvider {
    #[instrument(skip(self), fields(url = %self.pods_url))]
    async fn discover(&self) -> Result<Vec<Target>, DiscoveryError> {
        let request = self.authorize(self.http.get(&self.pods_url))?;

        let response = request
            .send()
            .await
            .map_err(|e| DiscoveryError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if let Some((cut, _)) = body.char_indices().nth(MAX_ERROR_BODY) {
                body.truncate(cut);
            }
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let list: PodList = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Decode(e.to_string()))?;

        let targets = targets_from_pod_list(&list);
        debug!(
            pods = list.items.len(),
            targets = targets.len(),
            "Pod list retrieved"
        );
        Ok(targets)
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }
}
