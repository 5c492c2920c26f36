//! Reconcile request/poll protocol.
//!
//! A reconcile is requested by stamping the Flux requested-at annotation with
//! a fresh timestamp, then polling until the controller echoes that exact
//! value back in `status.lastHandledReconcileAt`.

use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use metrics::{counter, histogram};
use serde_json::{json, Value as Json};
use skiff_core::{FluxKind, FluxObject, PathError, ResourceRef, UnknownKind, RECONCILE_REQUEST_ANNOTATION};
use skiff_kubehub::{ClusterProxy, ProxyError, ProxyRequest, ProxyResponse};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for SyncOptions {
    fn default() -> Self { Self { poll_interval: Duration::from_millis(2000), max_attempts: 10 } }
}

impl SyncOptions {
    /// Overrides defaults from `SKIFF_POLL_INTERVAL_MS` and `SKIFF_MAX_ATTEMPTS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        let poll_ms: Option<u64> = std::env::var("SKIFF_POLL_INTERVAL_MS").ok().and_then(|s| s.parse().ok());
        let attempts: Option<u32> = std::env::var("SKIFF_MAX_ATTEMPTS").ok().and_then(|s| s.parse().ok());
        Self {
            poll_interval: poll_ms.map(Duration::from_millis).unwrap_or(d.poll_interval),
            max_attempts: attempts.unwrap_or(d.max_attempts),
        }
    }

    /// Upper bound on time spent polling.
    pub fn timeout(&self) -> Duration { self.poll_interval * self.max_attempts }
}

/// State threaded through one request/poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTicket {
    pub requested_at: String,
    pub resource: ResourceRef,
    pub attempts_remaining: u32,
    pub poll_interval: Duration,
}

impl SyncTicket {
    pub fn new(resource: ResourceRef, requested_at: impl Into<String>, opts: &SyncOptions) -> Self {
        Self {
            requested_at: requested_at.into(),
            resource,
            attempts_remaining: opts.max_attempts,
            poll_interval: opts.poll_interval,
        }
    }

    /// True once the controller reports our exact timestamp as handled.
    pub fn is_handled(&self, object: &Json) -> bool {
        object.pointer("/status/lastHandledReconcileAt").and_then(|v| v.as_str()) == Some(self.requested_at.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("request failed: {status} {status_text}")]
    Request { status: u16, status_text: String },
    #[error("request failed: {0}")]
    RequestTransport(#[source] ProxyError),
    #[error("poll failed: {status} {status_text}")]
    Poll { status: u16, status_text: String },
    #[error("poll failed: {0}")]
    PollTransport(#[source] ProxyError),
    #[error("timed out waiting for status to update")]
    Timeout { attempts: u32 },
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),
    #[error(transparent)]
    Path(#[from] PathError),
}

/// RFC3339 UTC timestamp with sub-second precision, unique per request in practice.
pub fn now_timestamp() -> String { Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true) }

/// Patch body stamping the reconcile request annotation.
pub fn reconcile_patch(requested_at: &str) -> Json {
    json!({ "metadata": { "annotations": { RECONCILE_REQUEST_ANNOTATION: requested_at } } })
}

/// Request a reconcile of `resource` and wait until it has been handled.
pub async fn request_sync(
    proxy: &dyn ClusterProxy,
    resource: &ResourceRef,
    requested_at: &str,
    opts: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<(), SyncError> {
    let started = Instant::now();
    counter!("sync_requests", 1u64);
    let res = request_and_poll(proxy, resource, requested_at, opts, cancel).await;
    let ms = started.elapsed().as_secs_f64() * 1000.0;
    match &res {
        Ok(()) => {
            counter!("sync_ok", 1u64);
            histogram!("sync_latency_ms", ms);
            info!(resource = %resource, requested_at, took_ms = ms as u64, "sync handled");
        }
        Err(SyncError::Timeout { attempts }) => {
            counter!("sync_timeout", 1u64);
            warn!(resource = %resource, attempts, "sync timed out");
        }
        Err(e) => {
            counter!("sync_err", 1u64);
            warn!(resource = %resource, error = %e, "sync failed");
        }
    }
    res
}

async fn request_and_poll(
    proxy: &dyn ClusterProxy,
    resource: &ResourceRef,
    requested_at: &str,
    opts: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<(), SyncError> {
    let path = resource.path()?;
    let mut ticket = SyncTicket::new(resource.clone(), requested_at, opts);
    info!(resource = %resource, requested_at, attempts = ticket.attempts_remaining, "sync requested");

    // The whole exchange shares one deadline so a call that never answers still times out.
    let deadline = tokio::time::Instant::now() + opts.timeout();
    let exchange = async {
        let patch = ProxyRequest::merge_patch(path.clone(), reconcile_patch(requested_at));
        let resp = send(proxy, &resource.cluster_name, patch, cancel).await?.map_err(SyncError::RequestTransport)?;
        if !resp.ok() {
            return Err(SyncError::Request { status: resp.status, status_text: resp.status_text });
        }
        poll_until_handled(proxy, &path, &mut ticket, cancel).await
    };
    match tokio::time::timeout_at(deadline, exchange).await {
        Ok(res) => res,
        Err(_) => Err(SyncError::Timeout { attempts: opts.max_attempts }),
    }
}

/// One proxy call, abandoned as soon as `cancel` fires.
async fn send(
    proxy: &dyn ClusterProxy,
    cluster: &str,
    req: ProxyRequest,
    cancel: &CancellationToken,
) -> Result<Result<ProxyResponse, ProxyError>, SyncError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        resp = proxy.request(cluster, req) => Ok(resp),
    }
}

async fn poll_until_handled(
    proxy: &dyn ClusterProxy,
    path: &str,
    ticket: &mut SyncTicket,
    cancel: &CancellationToken,
) -> Result<(), SyncError> {
    let attempts = ticket.attempts_remaining;
    while ticket.attempts_remaining > 0 {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = tokio::time::sleep(ticket.poll_interval) => {}
        }
        ticket.attempts_remaining -= 1;
        let resp = send(proxy, &ticket.resource.cluster_name, ProxyRequest::get(path), cancel)
            .await?
            .map_err(SyncError::PollTransport)?;
        if !resp.ok() {
            return Err(SyncError::Poll { status: resp.status, status_text: resp.status_text });
        }
        if ticket.is_handled(&resp.body) {
            return Ok(());
        }
        debug!(resource = %ticket.resource, remaining = ticket.attempts_remaining, "not handled yet");
    }
    Err(SyncError::Timeout { attempts })
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("get failed: {status} {status_text}")]
    Rejected { status: u16, status_text: String },
    #[error("get failed: {0}")]
    Transport(#[from] ProxyError),
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Fetch one Flux object and read it into its variant.
pub async fn fetch_object(proxy: &dyn ClusterProxy, resource: &ResourceRef, kind: FluxKind) -> Result<FluxObject, FetchError> {
    let raw = get_object(proxy, resource).await?;
    Ok(FluxObject::from_json(kind, &resource.cluster_name, &raw))
}

/// Fetch a Flux controller deployment; `resource` should carry [`skiff_core::CONTROLLER_GVK`].
pub async fn fetch_controller(proxy: &dyn ClusterProxy, resource: &ResourceRef) -> Result<FluxObject, FetchError> {
    let raw = get_object(proxy, resource).await?;
    Ok(FluxObject::controller_from_json(&resource.cluster_name, &raw))
}

async fn get_object(proxy: &dyn ClusterProxy, resource: &ResourceRef) -> Result<Json, FetchError> {
    let path = resource.path()?;
    let resp = proxy.request(&resource.cluster_name, ProxyRequest::get(path)).await?;
    if !resp.ok() {
        return Err(FetchError::Rejected { status: resp.status, status_text: resp.status_text });
    }
    debug!(resource = %resource, "fetched");
    Ok(resp.body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(at: &str) -> SyncTicket {
        let r = ResourceRef::new(FluxKind::Kustomization.gvk(), "apps", "flux-system", "prod");
        SyncTicket::new(r, at, &SyncOptions::default())
    }

    #[test]
    fn defaults_give_twenty_second_budget() {
        let o = SyncOptions::default();
        assert_eq!(o.max_attempts, 10);
        assert_eq!(o.timeout(), Duration::from_secs(20));
    }

    #[test]
    fn handled_requires_exact_match() {
        let t = ticket("2024-05-01T10:00:00.123Z");
        assert!(t.is_handled(&json!({"status": {"lastHandledReconcileAt": "2024-05-01T10:00:00.123Z"}})));
        assert!(!t.is_handled(&json!({"status": {"lastHandledReconcileAt": "2024-05-01T10:00:00.123000Z"}})));
        assert!(!t.is_handled(&json!({"status": {}})));
        assert!(!t.is_handled(&json!({})));
    }

    #[test]
    fn patch_body_carries_annotation() {
        let body = reconcile_patch("T1");
        assert_eq!(body.pointer("/metadata/annotations/reconcile.fluxcd.io~1requestedAt"), Some(&json!("T1")));
    }

    #[test]
    fn timestamps_are_rfc3339_utc() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
        assert!(ts.contains('.'));
    }
}
