//! Skiff kubehub: the cluster directory and the per-cluster API proxy.
//!
//! Every cluster request the protocols make goes through [`ClusterProxy`].
//! [`KubeProxy`] backs it with one kube client per kubeconfig context.

#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};

use kube::{
    config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
    Client, Config,
};
use metrics::counter;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub mod mock;

pub const MERGE_PATCH: &str = "application/merge-patch+json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Patch,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Patch => "PATCH",
        }
    }
}

/// A request against one cluster's API surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub method: Method,
    pub path: String,
    pub content_type: Option<String>,
    pub body: Option<serde_json::Value>,
}

impl ProxyRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::Get, path: path.into(), content_type: None, body: None }
    }

    pub fn merge_patch(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self { method: Method::Patch, path: path.into(), content_type: Some(MERGE_PATCH.to_string()), body: Some(body) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub status: u16,
    pub status_text: String,
    pub body: serde_json::Value,
}

impl ProxyResponse {
    pub fn ok_json(body: serde_json::Value) -> Self { Self { status: 200, status_text: "OK".into(), body } }

    pub fn error(status: u16, status_text: impl Into<String>) -> Self {
        Self { status, status_text: status_text.into(), body: serde_json::Value::Null }
    }

    pub fn ok(&self) -> bool { (200..300).contains(&self.status) }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProxyError> {
        serde_json::from_value(self.body.clone()).map_err(|e| ProxyError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxyError {
    #[error("cluster {0} not found in kubeconfig")]
    UnknownCluster(String),
    #[error("kubeconfig: {0}")]
    Kubeconfig(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("decode: {0}")]
    Decode(String),
}

/// Performs requests against a named cluster. Non-2xx answers are `Ok`
/// responses; `Err` means the request never got an answer.
#[async_trait::async_trait]
pub trait ClusterProxy: Send + Sync {
    async fn request(&self, cluster: &str, req: ProxyRequest) -> Result<ProxyResponse, ProxyError>;
}

/// A reachable cluster and the identity we talk to it as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    pub auth_identity: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),
}

#[async_trait::async_trait]
pub trait ClusterDirectory: Send + Sync {
    async fn list(&self) -> Result<Vec<Cluster>, DirectoryError>;
}

/// Fixed cluster list.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory(pub Vec<Cluster>);

#[async_trait::async_trait]
impl ClusterDirectory for StaticDirectory {
    async fn list(&self) -> Result<Vec<Cluster>, DirectoryError> { Ok(self.0.clone()) }
}

/// Clusters are kubeconfig contexts; the auth identity is the context's user.
pub struct KubeconfigDirectory {
    kubeconfig: Kubeconfig,
    only: Option<BTreeSet<String>>,
}

impl KubeconfigDirectory {
    pub fn new(kubeconfig: Kubeconfig) -> Self { Self { kubeconfig, only: None } }

    /// Reads `KUBECONFIG` or `~/.kube/config`.
    pub fn from_default() -> Result<Self, DirectoryError> { Ok(Self::new(Kubeconfig::read()?)) }

    /// Restrict the directory to the named contexts; empty means all.
    pub fn restrict_to<I: IntoIterator<Item = String>>(mut self, names: I) -> Self {
        let set: BTreeSet<String> = names.into_iter().collect();
        self.only = if set.is_empty() { None } else { Some(set) };
        self
    }

    fn clusters(&self) -> Vec<Cluster> {
        self.kubeconfig
            .contexts
            .iter()
            .filter(|c| self.only.as_ref().map(|o| o.contains(&c.name)).unwrap_or(true))
            .map(|c| Cluster {
                name: c.name.clone(),
                auth_identity: c.context.as_ref().map(|ctx| ctx.user.clone()).unwrap_or_default(),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ClusterDirectory for KubeconfigDirectory {
    async fn list(&self) -> Result<Vec<Cluster>, DirectoryError> {
        let out = self.clusters();
        debug!(count = out.len(), "kubeconfig directory listed");
        Ok(out)
    }
}

/// Proxy backed by kube clients, one per kubeconfig context, built lazily.
pub struct KubeProxy {
    kubeconfig: Kubeconfig,
    clients: Mutex<HashMap<String, Client>>,
}

impl KubeProxy {
    pub fn new(kubeconfig: Kubeconfig) -> Self { Self { kubeconfig, clients: Mutex::new(HashMap::new()) } }

    pub fn from_default() -> Result<Self, ProxyError> {
        let kc = Kubeconfig::read().map_err(|e| ProxyError::Kubeconfig(e.to_string()))?;
        Ok(Self::new(kc))
    }

    async fn client(&self, cluster: &str) -> Result<Client, ProxyError> {
        let mut clients = self.clients.lock().await;
        if let Some(c) = clients.get(cluster) {
            return Ok(c.clone());
        }
        if !self.kubeconfig.contexts.iter().any(|c| c.name == cluster) {
            return Err(ProxyError::UnknownCluster(cluster.to_string()));
        }
        let opts = KubeConfigOptions { context: Some(cluster.to_string()), ..Default::default() };
        let config = Config::from_custom_kubeconfig(self.kubeconfig.clone(), &opts)
            .await
            .map_err(|e| ProxyError::Kubeconfig(e.to_string()))?;
        let client = Client::try_from(config).map_err(|e| ProxyError::Transport(e.to_string()))?;
        info!(cluster = %cluster, "kube client ready");
        clients.insert(cluster.to_string(), client.clone());
        Ok(client)
    }
}

pub fn to_http(req: &ProxyRequest) -> Result<http::Request<Vec<u8>>, ProxyError> {
    let method = match req.method {
        Method::Get => http::Method::GET,
        Method::Patch => http::Method::PATCH,
    };
    let mut builder = http::Request::builder().method(method).uri(req.path.as_str());
    if let Some(ct) = req.content_type.as_deref() {
        builder = builder.header(http::header::CONTENT_TYPE, ct);
    }
    let body = match &req.body {
        Some(b) => serde_json::to_vec(b).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?,
        None => Vec::new(),
    };
    builder.body(body).map_err(|e| ProxyError::InvalidRequest(e.to_string()))
}

#[async_trait::async_trait]
impl ClusterProxy for KubeProxy {
    async fn request(&self, cluster: &str, req: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let client = self.client(cluster).await?;
        let http_req = to_http(&req)?;
        counter!("proxy_requests", 1u64, "method" => req.method.as_str());
        debug!(cluster = %cluster, method = req.method.as_str(), path = %req.path, "proxy request");
        match client.request_text(http_req).await {
            Ok(text) => {
                let body = if text.trim().is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::from_str(&text).map_err(|e| ProxyError::Decode(e.to_string()))?
                };
                Ok(ProxyResponse::ok_json(body))
            }
            Err(kube::Error::Api(ae)) => {
                warn!(cluster = %cluster, path = %req.path, code = ae.code, reason = %ae.reason, "proxy request rejected");
                Ok(ProxyResponse {
                    status: ae.code,
                    status_text: ae.reason.clone(),
                    body: serde_json::json!({ "message": ae.message, "reason": ae.reason }),
                })
            }
            Err(e) => {
                counter!("proxy_transport_errors", 1u64);
                Err(ProxyError::Transport(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kubeconfig() -> Kubeconfig {
        let yaml = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{"name": "c1", "cluster": {"server": "https://c1.example:6443"}}],
            "users": [{"name": "alice", "user": {}}, {"name": "bob", "user": {}}],
            "contexts": [
                {"name": "prod", "context": {"cluster": "c1", "user": "alice"}},
                {"name": "dev", "context": {"cluster": "c1", "user": "bob"}}
            ],
            "current-context": "prod"
        });
        serde_json::from_value(yaml).expect("kubeconfig")
    }

    #[test]
    fn merge_patch_sets_content_type_and_body() {
        let req = ProxyRequest::merge_patch("/apis/g/v/namespaces/ns/p/n", serde_json::json!({"spec": {"suspend": true}}));
        let http_req = to_http(&req).expect("http request");
        assert_eq!(http_req.method(), http::Method::PATCH);
        assert_eq!(http_req.uri().path(), "/apis/g/v/namespaces/ns/p/n");
        assert_eq!(http_req.headers().get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()), Some(MERGE_PATCH));
        assert_eq!(http_req.body().as_slice(), br#"{"spec":{"suspend":true}}"#);
    }

    #[test]
    fn get_has_no_body_and_keeps_query() {
        let http_req = to_http(&ProxyRequest::get("/api/v1/namespaces?labelSelector=a%3Db&limit=500")).expect("http request");
        assert_eq!(http_req.method(), http::Method::GET);
        assert_eq!(http_req.uri().query(), Some("labelSelector=a%3Db&limit=500"));
        assert!(http_req.body().is_empty());
        assert!(http_req.headers().get(http::header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn response_ok_is_2xx() {
        assert!(ProxyResponse::ok_json(serde_json::Value::Null).ok());
        assert!(!ProxyResponse::error(404, "Not Found").ok());
        assert!(!ProxyResponse::error(500, "Internal Server Error").ok());
    }

    #[tokio::test]
    async fn kubeconfig_directory_lists_contexts() {
        let dir = KubeconfigDirectory::new(kubeconfig());
        let clusters = dir.list().await.expect("list");
        assert_eq!(
            clusters,
            vec![
                Cluster { name: "prod".into(), auth_identity: "alice".into() },
                Cluster { name: "dev".into(), auth_identity: "bob".into() },
            ]
        );
        let only_dev = KubeconfigDirectory::new(kubeconfig()).restrict_to(vec!["dev".to_string()]);
        assert_eq!(only_dev.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn proxy_rejects_unknown_context() {
        let proxy = KubeProxy::new(kubeconfig());
        let err = proxy.request("staging", ProxyRequest::get("/api/v1/namespaces")).await.expect_err("unknown");
        assert!(matches!(err, ProxyError::UnknownCluster(c) if c == "staging"));
    }
}
