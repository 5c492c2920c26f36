//! Skiff Ops: the cluster-facing protocols.
//!
//! Reconcile request/poll, suspend/resume, composite source-then-target sync
//! and the cross-cluster controller inventory. Everything talks to clusters
//! through [`skiff_kubehub::ClusterProxy`] and reports user-facing outcomes
//! through [`alert::AlertSink`].

#![forbid(unsafe_code)]

use std::sync::Arc;

use skiff_core::{FluxKind, FluxObject, ResourceRef};
use skiff_kubehub::{Cluster, ClusterDirectory, ClusterProxy, DirectoryError};
use tokio_util::sync::CancellationToken;

pub mod alert;
pub mod inventory;
pub mod orchestrator;
pub mod suspend;
pub mod sync;

pub use alert::{Alert, AlertDisplay, AlertSink, RecordingAlerts, Severity};
pub use inventory::{
    deployments_path, list_deployments, namespaces_path, FailurePolicy, Inventory, InventoryError, InventoryOptions,
    ListingError,
};
pub use orchestrator::{sync, toggle_suspend, SyncTarget};
pub use suspend::{request_toggle_suspend, SuspendVerb, ToggleError};
pub use sync::{fetch_controller, fetch_object, now_timestamp, request_sync, FetchError, SyncError, SyncOptions, SyncTicket};

/// Operations a front end drives. [`ProxyOps`] is the default implementation.
#[async_trait::async_trait]
pub trait SkiffOps: Send + Sync {
    async fn clusters(&self) -> Result<Vec<Cluster>, DirectoryError>;

    async fn status(&self, resource: &ResourceRef, kind: FluxKind) -> Result<FluxObject, FetchError>;

    /// One controller deployment with its `Available` readiness.
    async fn controller(&self, resource: &ResourceRef) -> Result<FluxObject, FetchError>;

    /// Reconcile and wait; the alert sink hears the outcome.
    async fn reconcile(&self, target: &SyncTarget, cancel: &CancellationToken) -> Result<(), SyncError>;

    async fn set_suspended(&self, target: &SyncTarget, suspend: bool) -> Result<(), ToggleError>;

    async fn controllers(&self, policy: FailurePolicy) -> Result<Inventory, InventoryError>;
}

/// Binds the protocols to one proxy, directory and alert sink.
pub struct ProxyOps {
    proxy: Arc<dyn ClusterProxy>,
    directory: Arc<dyn ClusterDirectory>,
    alerts: Arc<dyn AlertSink>,
    pub sync_opts: SyncOptions,
    pub inventory_opts: InventoryOptions,
}

impl ProxyOps {
    pub fn new(proxy: Arc<dyn ClusterProxy>, directory: Arc<dyn ClusterDirectory>, alerts: Arc<dyn AlertSink>) -> Self {
        Self { proxy, directory, alerts, sync_opts: SyncOptions::from_env(), inventory_opts: InventoryOptions::from_env() }
    }

    pub fn with_sync_options(mut self, opts: SyncOptions) -> Self {
        self.sync_opts = opts;
        self
    }

    pub fn with_inventory_options(mut self, opts: InventoryOptions) -> Self {
        self.inventory_opts = opts;
        self
    }
}

#[async_trait::async_trait]
impl SkiffOps for ProxyOps {
    async fn clusters(&self) -> Result<Vec<Cluster>, DirectoryError> { self.directory.list().await }

    async fn status(&self, resource: &ResourceRef, kind: FluxKind) -> Result<FluxObject, FetchError> {
        fetch_object(self.proxy.as_ref(), resource, kind).await
    }

    async fn controller(&self, resource: &ResourceRef) -> Result<FluxObject, FetchError> {
        fetch_controller(self.proxy.as_ref(), resource).await
    }

    async fn reconcile(&self, target: &SyncTarget, cancel: &CancellationToken) -> Result<(), SyncError> {
        orchestrator::sync(target, self.proxy.as_ref(), self.alerts.as_ref(), &self.sync_opts, cancel).await
    }

    async fn set_suspended(&self, target: &SyncTarget, suspend: bool) -> Result<(), ToggleError> {
        toggle_suspend(target, suspend, self.proxy.as_ref(), self.alerts.as_ref()).await
    }

    async fn controllers(&self, policy: FailurePolicy) -> Result<Inventory, InventoryError> {
        let opts = InventoryOptions { failure_policy: policy, ..self.inventory_opts };
        list_deployments(self.proxy.as_ref(), self.directory.as_ref(), &opts).await
    }
}
