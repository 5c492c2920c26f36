//! Skiff core types: Flux conditions and readiness, the kind table, resource
//! paths and cross-cluster inventory items. No I/O lives here.

#![forbid(unsafe_code)]

pub mod conditions;
pub mod kinds;
pub mod object;

pub use conditions::{
    compute_readiness, find_condition, select_display_message, verification, Condition, ConditionStatus,
    ReadinessState, Verification,
};
pub use kinds::{
    build_path, gvk_from_kind, FluxKind, Gvk, KindRole, PathError, ResourceRef, UnknownKind, CONTROLLER_GVK,
};
pub use object::{
    dedup_inventory, sort_inventory, ControllerObject, DeploymentObject, FluxObject, FluxResource, InventoryItem,
    ObjectMeta, Reconcilable, SourceRef,
};

/// Annotation a Flux controller watches for reconcile requests. Value is an RFC3339 timestamp.
pub const RECONCILE_REQUEST_ANNOTATION: &str = "reconcile.fluxcd.io/requestedAt";

/// Label selector identifying Flux namespaces and controller deployments.
pub const FLUX_PART_OF_SELECTOR: &str = "app.kubernetes.io/part-of=flux";

/// Result cap for namespace and deployment listings.
pub const LIST_LIMIT: u32 = 500;
