//! Kubeconfig and in-cluster credential loading.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::{debug, instrument, trace};

use crate::error::ConfigError;

/// Mount point of the service account secret inside a pod.
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// How requests authenticate to the API server.
#[derive(Clone, PartialEq, Eq)]
pub enum ClusterAuth {
    /// No credentials.
    None,
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// HTTP basic authentication.
    Basic { username: String, password: String },
    /// TLS client certificate; PEM containing certificate and private key.
    ClientCertificate { identity_pem: Vec<u8> },
}

impl std::fmt::Debug for ClusterAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bearer(_) => write!(f, "Bearer(<redacted>)"),
            Self::Basic { username, .. } => write!(f, "Basic({username})"),
            Self::ClientCertificate { .. } => write!(f, "ClientCertificate(<redacted>)"),
        }
    }
}

/// Everything needed to reach one API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCredentials {
    /// Base URL of the API server, e.g. `https://10.0.0.1:6443`.
    pub server: String,
    /// PEM bundle of extra trusted certificate authorities.
    pub ca_pem: Option<Vec<u8>>,
    /// Skip server certificate verification.
    pub insecure_skip_tls_verify: bool,
    /// Request authentication.
    pub auth: ClusterAuth,
    /// Namespace of the selected context, if any.
    pub namespace: Option<String>,
}

impl ClusterCredentials {
    /// Credentials for a plain URL without authentication.
    #[must_use]
    pub fn anonymous(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ca_pem: None,
            insecure_skip_tls_verify: false,
            auth: ClusterAuth::None,
            namespace: None,
        }
    }

    /// Resolves credentials the way kubectl does.
    ///
    /// An explicit path wins; otherwise `$KUBECONFIG` and `~/.kube/config`
    /// are tried, and finally the in-cluster service account.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoCredentials` if nothing is found, or the
    /// parse error of the selected source.
    #[instrument(skip_all, fields(explicit = ?explicit.map(Path::display), context = ?context))]
    pub fn discover(explicit: Option<&Path>, context: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_kubeconfig(path, context);
        }

        if let Some(path) = default_kubeconfig_path() {
            if path.exists() {
                return Self::from_kubeconfig(&path, context);
            }
            trace!(path = %path.display(), "Default kubeconfig not present");
        }

        if std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
            return Self::in_cluster();
        }

        Err(ConfigError::NoCredentials)
    }

    /// Loads credentials from a kubeconfig file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is unreadable, malformed, or does not
    /// contain the selected context.
    pub fn from_kubeconfig(path: &Path, context: Option<&str>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let kubeconfig: Kubeconfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Kubeconfig {
                path: path.to_path_buf(),
                source: e,
            })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let credentials = kubeconfig.resolve(context, base_dir)?;
        debug!(
            path = %path.display(),
            server = %credentials.server,
            "Loaded kubeconfig credentials"
        );
        Ok(credentials)
    }

    /// Loads the service account credentials of the pod we run in.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the environment or the token is missing.
    pub fn in_cluster() -> Result<Self, ConfigError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| ConfigError::NoCredentials)?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let dir = Path::new(SERVICE_ACCOUNT_DIR);

        let token = read_file(&dir.join("token"))?;
        let ca_path = dir.join("ca.crt");
        let ca_pem = if ca_path.exists() {
            Some(std::fs::read(&ca_path).map_err(|e| ConfigError::Read {
                path: ca_path.clone(),
                source: e,
            })?)
        } else {
            None
        };
        let namespace = std::fs::read_to_string(dir.join("namespace"))
            .ok()
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());

        debug!(%host, %port, "Using in-cluster service account credentials");
        Ok(Self {
            server: format!("https://{}:{port}", bracket_ipv6(&host)),
            ca_pem,
            insecure_skip_tls_verify: false,
            auth: ClusterAuth::Bearer(String::from_utf8_lossy(&token).trim().to_string()),
            namespace,
        })
    }
}

/// Returns `$KUBECONFIG` (first entry) or `$HOME/.kube/config`.
#[must_use]
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    if let Some(value) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&value).find(|p| !p.as_os_str().is_empty()) {
            return Some(first);
        }
    }

    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".kube").join("config"))
}

fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    #[serde(default)]
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    token_file: Option<PathBuf>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    client_certificate: Option<PathBuf>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key: Option<PathBuf>,
    #[serde(default)]
    client_key_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

impl Kubeconfig {
    fn resolve(&self, context: Option<&str>, base_dir: &Path) -> Result<ClusterCredentials, ConfigError> {
        let context_name = context
            .map(str::to_string)
            .or_else(|| self.current_context.clone().filter(|c| !c.is_empty()))
            .ok_or(ConfigError::MissingEntry {
                kind: "context",
                name: String::from("<current-context>"),
            })?;

        let ctx = self
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| ConfigError::MissingEntry {
                kind: "context",
                name: context_name.clone(),
            })?;

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == ctx.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| ConfigError::MissingEntry {
                kind: "cluster",
                name: ctx.cluster.clone(),
            })?;

        let user = match &ctx.user {
            Some(name) => Some(
                self.users
                    .iter()
                    .find(|u| &u.name == name)
                    .map(|u| &u.user)
                    .ok_or_else(|| ConfigError::MissingEntry {
                        kind: "user",
                        name: name.clone(),
                    })?,
            ),
            None => None,
        };

        let ca_pem = load_material(
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
            base_dir,
            "certificate-authority",
        )?;

        let auth = match user {
            Some(user) => user.auth(base_dir)?,
            None => ClusterAuth::None,
        };

        Ok(ClusterCredentials {
            server: cluster.server.trim_end_matches('/').to_string(),
            ca_pem,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            auth,
            namespace: ctx.namespace.clone().filter(|ns| !ns.is_empty()),
        })
    }
}

impl UserEntry {
    fn auth(&self, base_dir: &Path) -> Result<ClusterAuth, ConfigError> {
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(ClusterAuth::Bearer(token.to_string()));
        }

        if let Some(path) = &self.token_file {
            let token = read_file(&resolve(base_dir, path))?;
            return Ok(ClusterAuth::Bearer(String::from_utf8_lossy(&token).trim().to_string()));
        }

        let cert = load_material(
            self.client_certificate_data.as_deref(),
            self.client_certificate.as_deref(),
            base_dir,
            "client-certificate",
        )?;
        let key = load_material(
            self.client_key_data.as_deref(),
            self.client_key.as_deref(),
            base_dir,
            "client-key",
        )?;

        match (cert, key) {
            (Some(mut identity_pem), Some(key)) => {
                if !identity_pem.ends_with(b"\n") {
                    identity_pem.push(b'\n');
                }
                identity_pem.extend_from_slice(&key);
                return Ok(ClusterAuth::ClientCertificate { identity_pem });
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::InvalidCredential {
                    context: String::from("user"),
                    reason: String::from("client certificate and client key must be set together"),
                });
            }
            (None, None) => {}
        }

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Ok(ClusterAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            });
        }

        Ok(ClusterAuth::None)
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Inline base64 data wins over a file reference.
fn load_material(
    data: Option<&str>,
    file: Option<&Path>,
    base_dir: &Path,
    field: &str,
) -> Result<Option<Vec<u8>>, ConfigError> {
    if let Some(data) = data.filter(|d| !d.is_empty()) {
        let decoded = STANDARD
            .decode(data.trim())
            .map_err(|e| ConfigError::InvalidCredential {
                context: format!("{field}-data"),
                reason: e.to_string(),
            })?;
        return Ok(Some(decoded));
    }

    match file {
        Some(path) => read_file(&resolve(base_dir, path)).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
  - name: dev-cluster
    cluster:
      server: https://dev.example.com:6443/
      certificate-authority-data: LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0tCg==
  - name: prod-cluster
    cluster:
      server: https://prod.example.com
      insecure-skip-tls-verify: true
users:
  - name: dev-user
    user:
      token: dev-token
  - name: prod-user
    user:
      username: admin
      password: secret
contexts:
  - name: dev
    context:
      cluster: dev-cluster
      user: dev-user
      namespace: team-a
  - name: prod
    context:
      cluster: prod-cluster
      user: prod-user
"#;

    fn parse() -> Kubeconfig {
        serde_yaml::from_str(KUBECONFIG).unwrap()
    }

    #[test]
    fn test_current_context_resolution() {
        let creds = parse().resolve(None, Path::new("/")).unwrap();
        assert_eq!(creds.server, "https://dev.example.com:6443");
        assert_eq!(creds.auth, ClusterAuth::Bearer("dev-token".into()));
        assert_eq!(creds.namespace.as_deref(), Some("team-a"));
        assert_eq!(
            creds.ca_pem.as_deref(),
            Some(b"-----BEGIN CERTIFICATE-----\n".as_slice())
        );
        assert!(!creds.insecure_skip_tls_verify);
    }

    #[test]
    fn test_explicit_context_resolution() {
        let creds = parse().resolve(Some("prod"), Path::new("/")).unwrap();
        assert_eq!(creds.server, "https://prod.example.com");
        assert!(creds.insecure_skip_tls_verify);
        assert!(creds.namespace.is_none());
        assert_eq!(
            creds.auth,
            ClusterAuth::Basic {
                username: "admin".into(),
                password: "secret".into()
            }
        );
    }

    #[test]
    fn test_missing_context() {
        let err = parse().resolve(Some("staging"), Path::new("/")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEntry { kind: "context", name } if name == "staging"));
    }

    #[test]
    fn test_client_certificate_files_relative_to_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("client.crt"), "CERT").unwrap();
        std::fs::write(dir.path().join("client.key"), "KEY\n").unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            r#"
current-context: c
clusters: [{ name: k, cluster: { server: "https://k" } }]
users: [{ name: u, user: { client-certificate: client.crt, client-key: client.key } }]
contexts: [{ name: c, context: { cluster: k, user: u } }]
"#,
        )
        .unwrap();

        let creds = ClusterCredentials::from_kubeconfig(&path, None).unwrap();
        assert_eq!(
            creds.auth,
            ClusterAuth::ClientCertificate {
                identity_pem: b"CERT\nKEY\n".to_vec()
            }
        );
    }

    #[test]
    fn test_half_configured_client_certificate_rejected() {
        let config: Kubeconfig = serde_yaml::from_str(
            r#"
current-context: c
clusters: [{ name: k, cluster: { server: "https://k" } }]
users: [{ name: u, user: { client-certificate-data: Q0VSVA== } }]
contexts: [{ name: c, context: { cluster: k, user: u } }]
"#,
        )
        .unwrap();
        assert!(matches!(
            config.resolve(None, Path::new("/")),
            Err(ConfigError::InvalidCredential { .. })
        ));
    }

    #[test]
    fn test_bearer_debug_is_redacted() {
        let auth = ClusterAuth::Bearer("super-secret".into());
        assert!(!format!("{auth:?}").contains("super-secret"));
    }

    #[test]
    fn test_ipv6_host_is_bracketed() {
        assert_eq!(bracket_ipv6("fd00::1"), "[fd00::1]");
        assert_eq!(bracket_ipv6("10.96.0.1"), "10.96.0.1");
    }
}
