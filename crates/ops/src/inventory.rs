//! Cross-cluster inventory of Flux controller deployments.
//!
//! Every cluster from the directory is listed concurrently: first its Flux
//! namespaces, then the Flux deployments of each namespace. All calls share
//! one concurrency budget. Results are flattened and deduplicated; order is
//! not meaningful.

use std::time::{Duration, Instant};

use futures::future::{join_all, try_join_all};
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Namespace};
use kube::core::{params::ListParams, request::Error as RequestError, ObjectList, Request};
use metrics::{counter, histogram};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use skiff_core::{dedup_inventory, InventoryItem, FLUX_PART_OF_SELECTOR, LIST_LIMIT};
use skiff_kubehub::{ClusterDirectory, ClusterProxy, DirectoryError, ProxyRequest};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Keep whatever could be listed and report the rest in [`Inventory::errors`].
    #[default]
    BestEffort,
    /// Any failed listing fails the whole aggregation.
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryOptions {
    pub max_concurrency: usize,
    pub call_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
}

impl Default for InventoryOptions {
    fn default() -> Self {
        Self { max_concurrency: 8, call_timeout: Some(Duration::from_secs(30)), failure_policy: FailurePolicy::BestEffort }
    }
}

impl InventoryOptions {
    /// Overrides defaults from `SKIFF_FANOUT` and `SKIFF_CALL_TIMEOUT_SECS` (0 disables the timeout).
    pub fn from_env() -> Self {
        let d = Self::default();
        let fanout: Option<usize> = std::env::var("SKIFF_FANOUT").ok().and_then(|s| s.parse().ok());
        let timeout_secs: Option<u64> = std::env::var("SKIFF_CALL_TIMEOUT_SECS").ok().and_then(|s| s.parse().ok());
        Self {
            max_concurrency: fanout.filter(|n| *n > 0).unwrap_or(d.max_concurrency),
            call_timeout: match timeout_secs {
                Some(0) => None,
                Some(s) => Some(Duration::from_secs(s)),
                None => d.call_timeout,
            },
            failure_policy: d.failure_policy,
        }
    }
}

/// A listing call that produced nothing. `namespace` is `None` when the
/// cluster's namespace listing itself failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingError {
    pub cluster: String,
    pub namespace: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ListingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}: {}", self.cluster, ns, self.message),
            None => write!(f, "{}: {}", self.cluster, self.message),
        }
    }
}

impl std::error::Error for ListingError {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub items: Vec<InventoryItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ListingError>,
}

impl Inventory {
    pub fn is_complete(&self) -> bool { self.errors.is_empty() }
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("listing failed: {0}")]
    Listing(ListingError),
}

/// Namespace listing path, filtered by the Flux part-of selector.
pub fn namespaces_path() -> Result<String, RequestError> { listing_path("/api/v1/namespaces") }

/// Deployment listing path for one namespace, same selector and cap as [`namespaces_path`].
pub fn deployments_path(namespace: &str) -> Result<String, RequestError> {
    listing_path(format!("/apis/apps/v1/namespaces/{namespace}/deployments"))
}

fn listing_path(url_path: impl Into<String>) -> Result<String, RequestError> {
    let lp = ListParams::default().labels(FLUX_PART_OF_SELECTOR).limit(LIST_LIMIT);
    let req = Request::new(url_path).list(&lp)?;
    Ok(req.uri().to_string())
}

#[derive(Default)]
struct ClusterListing {
    items: Vec<InventoryItem>,
    errors: Vec<ListingError>,
}

/// List Flux controller deployments across every cluster in `directory`.
pub async fn list_deployments(
    proxy: &dyn ClusterProxy,
    directory: &dyn ClusterDirectory,
    opts: &InventoryOptions,
) -> Result<Inventory, InventoryError> {
    let started = Instant::now();
    let clusters = directory.list().await?;
    info!(clusters = clusters.len(), fanout = opts.max_concurrency, policy = ?opts.failure_policy, "inventory: listing");
    let limiter = Semaphore::new(opts.max_concurrency.max(1));

    let calls = clusters.iter().map(|c| list_cluster(proxy, &c.name, &limiter, opts));
    let listings: Vec<ClusterListing> = match opts.failure_policy {
        FailurePolicy::FailFast => try_join_all(calls).await.map_err(|e| {
            counter!("inventory_listing_errors", 1u64);
            warn!(error = %e, "inventory: aborted");
            InventoryError::Listing(e)
        })?,
        FailurePolicy::BestEffort => join_all(calls)
            .await
            .into_iter()
            .map(|r| r.unwrap_or_else(|e| ClusterListing { items: Vec::new(), errors: vec![e] }))
            .collect(),
    };

    let mut items = Vec::new();
    let mut errors = Vec::new();
    for l in listings {
        items.extend(l.items);
        errors.extend(l.errors);
    }
    let items = dedup_inventory(items);
    for e in &errors {
        warn!(cluster = %e.cluster, namespace = ?e.namespace, message = %e.message, "inventory: listing failed");
    }
    counter!("inventory_items", items.len() as u64);
    counter!("inventory_listing_errors", errors.len() as u64);
    histogram!("inventory_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
    info!(items = items.len(), errors = errors.len(), took_ms = started.elapsed().as_millis() as u64, "inventory: done");
    Ok(Inventory { items, errors })
}

// Namespaces first; deployment listings for this cluster start only once they are known.
async fn list_cluster(
    proxy: &dyn ClusterProxy,
    cluster: &str,
    limiter: &Semaphore,
    opts: &InventoryOptions,
) -> Result<ClusterListing, ListingError> {
    let fail = |message: String| ListingError { cluster: cluster.to_string(), namespace: None, message };
    let path = namespaces_path().map_err(|e| fail(e.to_string()))?;
    let namespaces: ObjectList<Namespace> = get_list(proxy, cluster, &path, limiter, opts).await.map_err(fail)?;
    let names: Vec<String> = namespaces.items.into_iter().filter_map(|n| n.metadata.name).collect();
    debug!(cluster = %cluster, namespaces = names.len(), "inventory: namespaces");

    let calls = names.iter().map(|ns| list_namespace(proxy, cluster, ns, limiter, opts));
    let mut out = ClusterListing::default();
    match opts.failure_policy {
        FailurePolicy::FailFast => {
            for items in try_join_all(calls).await? {
                out.items.extend(items);
            }
        }
        FailurePolicy::BestEffort => {
            for r in join_all(calls).await {
                match r {
                    Ok(items) => out.items.extend(items),
                    Err(e) => out.errors.push(e),
                }
            }
        }
    }
    Ok(out)
}

async fn list_namespace(
    proxy: &dyn ClusterProxy,
    cluster: &str,
    namespace: &str,
    limiter: &Semaphore,
    opts: &InventoryOptions,
) -> Result<Vec<InventoryItem>, ListingError> {
    let fail =
        |message: String| ListingError { cluster: cluster.to_string(), namespace: Some(namespace.to_string()), message };
    let path = deployments_path(namespace).map_err(|e| fail(e.to_string()))?;
    let list: ObjectList<Deployment> = get_list(proxy, cluster, &path, limiter, opts).await.map_err(fail)?;
    Ok(list
        .items
        .into_iter()
        .filter_map(|d| {
            let meta = d.metadata;
            Some(InventoryItem {
                cluster_name: cluster.to_string(),
                namespace: namespace.to_string(),
                name: meta.name?,
                labels: meta.labels.unwrap_or_default(),
                annotations: meta.annotations.unwrap_or_default(),
            })
        })
        .collect())
}

// The permit covers one call only, never a nested listing.
async fn get_list<T: DeserializeOwned>(
    proxy: &dyn ClusterProxy,
    cluster: &str,
    path: &str,
    limiter: &Semaphore,
    opts: &InventoryOptions,
) -> Result<T, String> {
    let _permit = limiter.acquire().await.map_err(|e| e.to_string())?;
    let call = proxy.request(cluster, ProxyRequest::get(path));
    let resp = match opts.call_timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| format!("timed out after {limit:?}"))?,
        None => call.await,
    }
    .map_err(|e| e.to_string())?;
    if !resp.ok() {
        return Err(format!("{} {}", resp.status, resp.status_text));
    }
    resp.json().map_err(|e| e.to_string())
}
