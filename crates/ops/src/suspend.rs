//! Suspend/resume: one merge patch on `spec.suspend`, no polling.

use metrics::counter;
use serde_json::{json, Value as Json};
use skiff_core::{PathError, ResourceRef, UnknownKind};
use skiff_kubehub::{ClusterProxy, ProxyError, ProxyRequest};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendVerb {
    Suspend,
    Resume,
}

impl From<bool> for SuspendVerb {
    fn from(suspend: bool) -> Self { if suspend { Self::Suspend } else { Self::Resume } }
}

impl std::fmt::Display for SuspendVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Suspend => "Suspend",
            Self::Resume => "Resume",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToggleError {
    #[error("Failed to {verb} resource: {status} {status_text}")]
    Rejected { verb: SuspendVerb, status: u16, status_text: String },
    #[error("Failed to {verb} resource: {source}")]
    Transport {
        verb: SuspendVerb,
        #[source]
        source: ProxyError,
    },
    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),
    #[error(transparent)]
    Path(#[from] PathError),
}

pub fn suspend_patch(suspend: bool) -> Json { json!({ "spec": { "suspend": suspend } }) }

/// Set `spec.suspend` on the resource.
pub async fn request_toggle_suspend(proxy: &dyn ClusterProxy, resource: &ResourceRef, suspend: bool) -> Result<(), ToggleError> {
    let verb = SuspendVerb::from(suspend);
    let path = resource.path()?;
    info!(resource = %resource, suspend, "toggle suspend");
    let resp = match proxy.request(&resource.cluster_name, ProxyRequest::merge_patch(path, suspend_patch(suspend))).await {
        Ok(r) => r,
        Err(source) => {
            counter!("toggle_err", 1u64);
            warn!(resource = %resource, error = %source, "toggle suspend transport error");
            return Err(ToggleError::Transport { verb, source });
        }
    };
    if !resp.ok() {
        counter!("toggle_err", 1u64);
        warn!(resource = %resource, status = resp.status, "toggle suspend rejected");
        return Err(ToggleError::Rejected { verb, status: resp.status, status_text: resp.status_text });
    }
    counter!("toggle_ok", 1u64);
    Ok(())
}
