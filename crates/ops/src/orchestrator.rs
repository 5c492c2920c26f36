//! Composite sync: reconcile the upstream source first, then the target.
//! This is the only layer that reports outcomes to the alert sink.

use serde::{Deserialize, Serialize};
use skiff_core::{gvk_from_kind, FluxObject, ResourceRef, SourceRef};
use skiff_kubehub::ClusterProxy;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::alert::{Alert, AlertSink};
use crate::suspend::{request_toggle_suspend, ToggleError};
use crate::sync::{now_timestamp, request_sync, SyncError, SyncOptions};

pub const SYNC_OK_MESSAGE: &str = "Sync request successful";

/// What the user asked to sync. `kind` is the raw kind name and may be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTarget {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub cluster_name: String,
    #[serde(default)]
    pub source_ref: Option<SourceRef>,
}

impl SyncTarget {
    pub fn from_object(object: &FluxObject) -> Self {
        let meta = object.meta();
        Self {
            kind: object.kind_name().to_string(),
            name: meta.name.clone(),
            namespace: meta.namespace.clone(),
            cluster_name: meta.cluster_name.clone(),
            source_ref: object.source_ref().cloned(),
        }
    }

    /// Same target without its source, so only the target itself is reconciled.
    pub fn without_source(mut self) -> Self {
        self.source_ref = None;
        self
    }

    fn resource(&self) -> Result<ResourceRef, SyncError> {
        let gvk = gvk_from_kind(&self.kind)?;
        Ok(ResourceRef::new(gvk, &self.name, &self.namespace, &self.cluster_name))
    }

    /// The referenced source lives in the same cluster; namespace defaults to the target's.
    fn source(&self) -> Result<Option<ResourceRef>, SyncError> {
        let Some(sr) = &self.source_ref else { return Ok(None) };
        let gvk = gvk_from_kind(&sr.kind)?;
        Ok(Some(ResourceRef::new(gvk, &sr.name, sr.namespace_or(&self.namespace), &self.cluster_name)))
    }
}

/// Reconcile `target`, preceded by its source when it has one. Posts exactly one alert.
pub async fn sync(
    target: &SyncTarget,
    proxy: &dyn ClusterProxy,
    alerts: &dyn AlertSink,
    opts: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<(), SyncError> {
    let res = run_sync(target, proxy, opts, cancel).await;
    match &res {
        Ok(()) => alerts.post(Alert::success(SYNC_OK_MESSAGE)),
        Err(e) => alerts.post(Alert::error(format!("Sync error: {}", e))),
    }
    res
}

async fn run_sync(
    target: &SyncTarget,
    proxy: &dyn ClusterProxy,
    opts: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<(), SyncError> {
    // Both kinds resolve before any request goes out.
    let resource = target.resource()?;
    let source = target.source()?;
    if let Some(src) = source {
        info!(source = %src, target = %resource, "syncing source first");
        request_sync(proxy, &src, &now_timestamp(), opts, cancel).await?;
    }
    request_sync(proxy, &resource, &now_timestamp(), opts, cancel).await
}

/// Suspend or resume `target`, reporting the outcome to the alert sink.
pub async fn toggle_suspend(
    target: &SyncTarget,
    suspend: bool,
    proxy: &dyn ClusterProxy,
    alerts: &dyn AlertSink,
) -> Result<(), ToggleError> {
    let res = match gvk_from_kind(&target.kind) {
        Ok(gvk) => {
            let resource = ResourceRef::new(gvk, &target.name, &target.namespace, &target.cluster_name);
            request_toggle_suspend(proxy, &resource, suspend).await
        }
        Err(e) => Err(e.into()),
    };
    match &res {
        Ok(()) if suspend => alerts.post(Alert::success(format!("Successfully suspended {}", target.name))),
        Ok(()) => alerts.post(Alert::success(format!("Successfully resumed {}", target.name))),
        Err(e) => alerts.post(Alert::error(e.to_string())),
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::FluxKind;

    #[test]
    fn target_from_helmrelease_keeps_source_ref() {
        let raw = serde_json::json!({
            "metadata": {"name": "podinfo", "namespace": "apps"},
            "spec": {"chart": {"spec": {"sourceRef": {"kind": "HelmRepository", "name": "podinfo", "namespace": "flux-system"}}}}
        });
        let obj = FluxObject::from_json(FluxKind::HelmRelease, "prod", &raw);
        let t = SyncTarget::from_object(&obj);
        assert_eq!(t.kind, "HelmRelease");
        assert_eq!(t.cluster_name, "prod");
        let src = t.source().expect("resolves").expect("has source");
        assert_eq!(src.gvk.kind, "HelmRepository");
        assert_eq!(src.namespace, "flux-system");
        assert_eq!(src.cluster_name, "prod");
    }

    #[test]
    fn source_namespace_defaults_to_target() {
        let t = SyncTarget {
            kind: "Kustomization".into(),
            name: "apps".into(),
            namespace: "team-a".into(),
            cluster_name: "dev".into(),
            source_ref: Some(SourceRef { kind: "GitRepository".into(), name: "repo".into(), namespace: None }),
        };
        assert_eq!(t.source().expect("ok").expect("some").namespace, "team-a");
        assert!(t.without_source().source().expect("ok").is_none());
    }
}
