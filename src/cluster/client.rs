//! HTTPS client for the Kubernetes API server.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Certificate, Client, ClientBuilder, Identity, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, instrument, trace};

use super::{Pod, PodApi, Status};
use crate::config::{ClusterAuth, ClusterCredentials};
use crate::error::{ClusterError, ConfigError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("node-files-mcp/", env!("CARGO_PKG_VERSION"));

/// Client for one API server.
///
/// Cheap to clone; both inner clients share connection pools with their clones.
#[derive(Debug, Clone)]
pub struct KubeClient {
    base: Url,
    http: Client,
    upgrade: Client,
}

impl KubeClient {
    /// Builds a client from resolved credentials.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the server URL or TLS material is invalid.
    pub fn new(credentials: &ClusterCredentials) -> Result<Self, ConfigError> {
        let base = Url::parse(&credentials.server).map_err(|e| ConfigError::InvalidCredential {
            context: String::from("server"),
            reason: format!("{}: {e}", credentials.server),
        })?;

        let http = client_builder(credentials)?
            .build()
            .map_err(ConfigError::Client)?;
        // Upgrades (exec) need HTTP/1.1; h2 has no Connection: Upgrade.
        let upgrade = client_builder(credentials)?
            .http1_only()
            .build()
            .map_err(ConfigError::Client)?;

        debug!(server = %base, "Created cluster client");
        Ok(Self {
            base,
            http,
            upgrade,
        })
    }

    /// The API server base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// HTTP/1.1-only client for protocol upgrades.
    #[must_use]
    pub fn upgrade_client(&self) -> &Client {
        &self.upgrade
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ClusterError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ClusterError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn pods_url(&self, namespace: &str) -> Result<Url, ClusterError> {
        self.url(&["api", "v1", "namespaces", namespace, "pods"])
    }

    fn pod_url(&self, namespace: &str, name: &str) -> Result<Url, ClusterError> {
        self.url(&["api", "v1", "namespaces", namespace, "pods", name])
    }

    /// URL of the `exec` sub-resource for a command in one container.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InvalidUrl` if the base URL cannot take a path.
    pub fn exec_url(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<Url, ClusterError> {
        let mut url = self.url(&["api", "v1", "namespaces", namespace, "pods", pod, "exec"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("container", container);
            for arg in command {
                query.append_pair("command", arg);
            }
            query.append_pair("stdout", "true");
            query.append_pair("stderr", "true");
        }
        Ok(url)
    }
}

#[async_trait]
impl PodApi for KubeClient {
    #[instrument(skip(self, pod), fields(pod = ?pod.metadata.name))]
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
        let response = self
            .http
            .post(self.pods_url(namespace)?)
            .json(pod)
            .send()
            .await
            .map_err(ClusterError::Transport)?;
        decode(response, "created pod").await
    }

    #[instrument(skip(self))]
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        let response = self
            .http
            .get(self.pod_url(namespace, name)?)
            .send()
            .await
            .map_err(ClusterError::Transport)?;
        decode(response, "pod").await
    }

    #[instrument(skip(self))]
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let options = json!({
            "kind": "DeleteOptions",
            "apiVersion": "v1",
            "gracePeriodSeconds": 0,
            "propagationPolicy": "Background",
        });
        let response = self
            .http
            .delete(self.pod_url(namespace, name)?)
            .json(&options)
            .send()
            .await
            .map_err(ClusterError::Transport)?;

        match check_status(response).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                trace!("Pod already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn client_builder(credentials: &ClusterCredentials) -> Result<ClientBuilder, ConfigError> {
    let mut headers = HeaderMap::new();
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .danger_accept_invalid_certs(credentials.insecure_skip_tls_verify);

    if let Some(pem) = &credentials.ca_pem {
        for cert in split_pem_certificates(pem) {
            let cert = Certificate::from_pem(&cert).map_err(ConfigError::Client)?;
            builder = builder.add_root_certificate(cert);
        }
    }

    match &credentials.auth {
        ClusterAuth::None => {}
        ClusterAuth::Bearer(token) => {
            headers.insert(AUTHORIZATION, sensitive(&format!("Bearer {token}"))?);
        }
        ClusterAuth::Basic { username, password } => {
            let encoded = STANDARD.encode(format!("{username}:{password}"));
            headers.insert(AUTHORIZATION, sensitive(&format!("Basic {encoded}"))?);
        }
        ClusterAuth::ClientCertificate { identity_pem } => {
            let identity = Identity::from_pem(identity_pem).map_err(ConfigError::Client)?;
            builder = builder.identity(identity);
        }
    }

    Ok(builder.default_headers(headers))
}

fn sensitive(value: &str) -> Result<HeaderValue, ConfigError> {
    let mut value = HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidCredential {
        context: String::from("authorization header"),
        reason: e.to_string(),
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Splits a PEM bundle into one buffer per certificate.
fn split_pem_certificates(pem: &[u8]) -> Vec<Vec<u8>> {
    const END: &str = "-----END CERTIFICATE-----";
    let text = String::from_utf8_lossy(pem);
    text.split_inclusive(END)
        .filter(|chunk| chunk.contains("-----BEGIN CERTIFICATE-----"))
        .map(|chunk| chunk.trim_start().as_bytes().to_vec())
        .collect()
}

/// Returns the body of a successful response, or the API error it carries.
async fn check_status(response: Response) -> Result<bytes::Bytes, ClusterError> {
    let status = response.status();
    let body = response.bytes().await.map_err(ClusterError::Transport)?;
    if status.is_success() {
        return Ok(body);
    }

    let message = serde_json::from_slice::<Status>(&body)
        .ok()
        .and_then(|s| s.message)
        .unwrap_or_else(|| {
            let text = String::from_utf8_lossy(&body).trim().to_string();
            if text.is_empty() {
                status.to_string()
            } else {
                text
            }
        });

    Err(ClusterError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response, context: &str) -> Result<T, ClusterError> {
    let body = check_status(response).await?;
    serde_json::from_slice(&body).map_err(|e| ClusterError::Decode {
        context: context.to_string(),
        source: e,
    })
}
