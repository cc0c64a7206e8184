//! Kubeconfig and service-account credential loading.
//!
//! Resolves the API server URL and client authentication either from a
//! kubeconfig file (current context) or from the service account mounted
//! into the pod. Only the fields needed for a read-only pod list are
//! understood; exec/auth-provider plugins are not supported.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

/// Service account directory mounted into every pod.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// How requests to the API server authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiAuth {
    /// No client authentication.
    None,
    /// Static bearer token.
    Bearer(String),
    /// Bearer token re-read from a file on every request (rotated tokens).
    BearerFile(PathBuf),
    /// TLS client certificate and key, PEM encoded.
    ClientCertificate {
        /// Certificate chain PEM.
        cert_pem: Vec<u8>,
        /// Private key PEM.
        key_pem: Vec<u8>,
    },
    /// HTTP basic auth.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

/// Everything needed to talk to the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    /// API server base URL, without trailing slash.
    pub server: String,
    /// Cluster CA bundle, PEM encoded.
    pub ca_pem: Option<Vec<u8>>,
    /// Skip server certificate verification.
    pub insecure_skip_tls_verify: bool,
    /// Client authentication.
    pub auth: ApiAuth,
    /// Namespace of the selected context, if any.
    pub namespace: Option<String>,
}

impl ApiCredentials {
    /// Credentials of the pod's own service account.
    ///
    /// # Errors
    /// Fails when not running inside a cluster (service env vars or the
    /// mounted service account are missing).
    pub fn in_cluster() -> Result<Self> {
        Self::in_cluster_from(
            std::env::var("KUBERNETES_SERVICE_HOST").ok(),
            std::env::var("KUBERNETES_SERVICE_PORT").ok(),
            Path::new(SERVICE_ACCOUNT_DIR),
        )
    }

    fn in_cluster_from(host: Option<String>, port: Option<String>, dir: &Path) -> Result<Self> {
        let host = host
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow!("KUBERNETES_SERVICE_HOST is not set, not running in a cluster"))?;
        let port = port
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("KUBERNETES_SERVICE_PORT is not set, not running in a cluster"))?;

        // IPv6 service hosts need brackets in the URL
        let server = if host.contains(':') {
            format!("https://[{host}]:{port}")
        } else {
            format!("https://{host}:{port}")
        };

        let token_path = dir.join("token");
        anyhow::ensure!(
            token_path.exists(),
            "Service account token not found at {}",
            token_path.display()
        );

        let ca_path = dir.join("ca.crt");
        let ca_pem = std::fs::read(&ca_path)
            .with_context(|| format!("Failed to read cluster CA: {}", ca_path.display()))?;
        let namespace = std::fs::read_to_string(dir.join("namespace"))
            .ok()
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());

        Ok(Self {
            server,
            ca_pem: Some(ca_pem),
            insecure_skip_tls_verify: false,
            auth: ApiAuth::BearerFile(token_path),
            namespace,
        })
    }

    /// Credentials of the current context of a kubeconfig file.
    ///
    /// Relative file references are resolved against the kubeconfig's
    /// directory.
    ///
    /// # Errors
    /// Fails when the file cannot be read or parsed, or the current
    /// context references a missing cluster or user.
    pub fn from_kubeconfig(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read kubeconfig: {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_kubeconfig_str(&content, base_dir)
            .with_context(|| format!("Invalid kubeconfig: {}", path.display()))
    }

    fn from_kubeconfig_str(content: &str, base_dir: &Path) -> Result<Self> {
        let config: Kubeconfig =
            serde_yaml::from_str(content).context("Failed to parse kubeconfig YAML")?;

        let context_name = config
            .current_context
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow!("kubeconfig has no current-context"))?;
        let context = config
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| anyhow!("context {context_name:?} not found"))?;
        let cluster = config
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| anyhow!("cluster {:?} not found", context.cluster))?;
        let user = match &context.user {
            Some(name) => config
                .users
                .iter()
                .find(|u| &u.name == name)
                .map(|u| u.user.clone())
                .ok_or_else(|| anyhow!("user {name:?} not found"))?,
            None => UserInfo::default(),
        };

        let ca_pem = load_data(
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
            base_dir,
        )
        .context("Failed to load cluster certificate authority")?;

        Ok(Self {
            server: cluster.server.trim_end_matches('/').to_string(),
            ca_pem,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            auth: user_auth(&user, base_dir)?,
            namespace: context.namespace.clone(),
        })
    }
}

fn user_auth(user: &UserInfo, base_dir: &Path) -> Result<ApiAuth> {
    if let Some(token) = user.token.as_deref().filter(|t| !t.is_empty()) {
        return Ok(ApiAuth::Bearer(token.to_string()));
    }
    if let Some(file) = &user.token_file {
        return Ok(ApiAuth::BearerFile(resolve(base_dir, file)));
    }

    let cert = load_data(
        user.client_certificate_data.as_deref(),
        user.client_certificate.as_deref(),
        base_dir,
    )
    .context("Failed to load client certificate")?;
    let key = load_data(
        user.client_key_data.as_deref(),
        user.client_key.as_deref(),
        base_dir,
    )
    .context("Failed to load client key")?;
    match (cert, key) {
        (Some(cert_pem), Some(key_pem)) => {
            return Ok(ApiAuth::ClientCertificate { cert_pem, key_pem });
        }
        (Some(_), None) | (None, Some(_)) => {
            anyhow::bail!("client certificate and client key must be configured together");
        }
        (None, None) => {}
    }

    if let (Some(username), Some(password)) = (&user.username, &user.password) {
        return Ok(ApiAuth::Basic {
            username: username.clone(),
            password: password.clone(),
        });
    }

    Ok(ApiAuth::None)
}

/// Inline base64 data wins over a file reference.
fn load_data(data: Option<&str>, file: Option<&Path>, base_dir: &Path) -> Result<Option<Vec<u8>>> {
    if let Some(data) = data.filter(|d| !d.is_empty()) {
        let bytes = STANDARD
            .decode(data.trim())
            .context("Invalid base64 in kubeconfig data field")?;
        return Ok(Some(bytes));
    }
    match file {
        Some(file) => {
            let path = resolve(base_dir, file);
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(Some(bytes))
        }
        None => Ok(None),
    }
}

fn resolve(base_dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        base_dir.join(file)
    }
}

// ---- kubeconfig YAML model ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterInfo {
    server: String,
    certificate_authority: Option<PathBuf>,
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextInfo,
}

#[derive(Debug, Deserialize)]
struct ContextInfo {
    cluster: String,
    user: Option<String>,
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserInfo {
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<PathBuf>,
    client_certificate: Option<PathBuf>,
    client_certificate_data: Option<String>,
    client_key: Option<PathBuf>,
    client_key_data: Option<String>,
    username: Option<String>,
    password: Option<String>,
}
