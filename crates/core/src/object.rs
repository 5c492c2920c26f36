//! Object variants read from cluster JSON, and inventory items.
//!
//! Sources, deployments and controller pods carry different status fields,
//! but readiness and sync only need the shared [`Reconcilable`] capability.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::conditions::{compute_readiness, select_display_message, Condition, ReadinessState};
use crate::kinds::{FluxKind, KindRole};

/// One controller/workload observed in a cluster namespace. Equality is
/// structural over every field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub cluster_name: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Drop structurally equal duplicates, keeping the first occurrence.
pub fn dedup_inventory(items: Vec<InventoryItem>) -> Vec<InventoryItem> {
    let mut seen: HashSet<InventoryItem> = HashSet::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        if seen.insert(it.clone()) {
            out.push(it);
        }
    }
    out
}

/// Stable display order: cluster, then namespace, then name.
pub fn sort_inventory(items: &mut [InventoryItem]) {
    items.sort_by(|a, b| {
        a.cluster_name
            .cmp(&b.cluster_name)
            .then_with(|| a.namespace.cmp(&b.namespace))
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub cluster_name: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    fn from_json(cluster: &str, raw: &Json) -> Self {
        Self {
            cluster_name: cluster.to_string(),
            namespace: str_at(raw, "/metadata/namespace").unwrap_or_default(),
            name: str_at(raw, "/metadata/name").unwrap_or_default(),
            labels: string_map(raw.pointer("/metadata/labels")),
            annotations: string_map(raw.pointer("/metadata/annotations")),
        }
    }
}

/// Upstream source a deployment pulls artifacts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SourceRef {
    /// Source refs without a namespace live next to the referencing object.
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().filter(|s| !s.is_empty()).unwrap_or(default)
    }
}

/// Shared capability of everything that reports conditions.
pub trait Reconcilable {
    fn suspended(&self) -> bool;
    fn conditions(&self) -> &[Condition];

    fn readiness(&self) -> ReadinessState { compute_readiness(self.suspended(), self.conditions()) }

    fn message(&self) -> String { select_display_message(self.conditions()) }
}

/// Fields common to all Flux custom resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FluxResource {
    pub kind: FluxKind,
    pub meta: ObjectMeta,
    pub suspended: bool,
    pub conditions: Vec<Condition>,
    pub last_handled_reconcile_at: Option<String>,
}

impl FluxResource {
    fn from_json(kind: FluxKind, cluster: &str, raw: &Json) -> Self {
        Self {
            kind,
            meta: ObjectMeta::from_json(cluster, raw),
            suspended: raw.pointer("/spec/suspend").and_then(|v| v.as_bool()).unwrap_or(false),
            conditions: conditions_at(raw),
            last_handled_reconcile_at: str_at(raw, "/status/lastHandledReconcileAt"),
        }
    }
}

impl Reconcilable for FluxResource {
    fn suspended(&self) -> bool { self.suspended }
    fn conditions(&self) -> &[Condition] { &self.conditions }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentObject {
    pub resource: FluxResource,
    pub source_ref: Option<SourceRef>,
}

impl Reconcilable for DeploymentObject {
    fn suspended(&self) -> bool { self.resource.suspended }
    fn conditions(&self) -> &[Condition] { &self.resource.conditions }
}

/// A Flux controller workload (apps/v1 Deployment). Cannot be suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerObject {
    pub meta: ObjectMeta,
    pub conditions: Vec<Condition>,
    pub images: Vec<String>,
}

impl Reconcilable for ControllerObject {
    fn suspended(&self) -> bool { false }
    fn conditions(&self) -> &[Condition] { &self.conditions }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FluxObject {
    Source(FluxResource),
    Deployment(DeploymentObject),
    /// Notification and image-automation kinds: no upstream source.
    Standalone(FluxResource),
    Controller(ControllerObject),
}

impl FluxObject {
    /// Read a Flux custom resource as returned by the cluster API.
    pub fn from_json(kind: FluxKind, cluster: &str, raw: &Json) -> Self {
        let resource = FluxResource::from_json(kind, cluster, raw);
        match kind.role() {
            KindRole::Source => Self::Source(resource),
            KindRole::Deployment => {
                let source_ref = source_ref_at(kind, raw);
                Self::Deployment(DeploymentObject { resource, source_ref })
            }
            KindRole::Notification | KindRole::Automation => Self::Standalone(resource),
        }
    }

    /// Read an apps/v1 Deployment running a Flux controller.
    pub fn controller_from_json(cluster: &str, raw: &Json) -> Self {
        let images = raw
            .pointer("/spec/template/spec/containers")
            .and_then(|v| v.as_array())
            .map(|cs| cs.iter().filter_map(|c| c.get("image").and_then(|v| v.as_str())).map(str::to_string).collect())
            .unwrap_or_default();
        Self::Controller(ControllerObject { meta: ObjectMeta::from_json(cluster, raw), conditions: conditions_at(raw), images })
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Source(r) | Self::Standalone(r) => &r.meta,
            Self::Deployment(d) => &d.resource.meta,
            Self::Controller(c) => &c.meta,
        }
    }

    /// Kind name as the cluster reports it.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Source(r) | Self::Standalone(r) => r.kind.as_str(),
            Self::Deployment(d) => d.resource.kind.as_str(),
            Self::Controller(_) => "Deployment",
        }
    }

    pub fn source_ref(&self) -> Option<&SourceRef> {
        match self {
            Self::Deployment(d) => d.source_ref.as_ref(),
            _ => None,
        }
    }

    pub fn last_handled_reconcile_at(&self) -> Option<&str> {
        match self {
            Self::Source(r) | Self::Standalone(r) => r.last_handled_reconcile_at.as_deref(),
            Self::Deployment(d) => d.resource.last_handled_reconcile_at.as_deref(),
            Self::Controller(_) => None,
        }
    }
}

impl Reconcilable for FluxObject {
    fn suspended(&self) -> bool {
        match self {
            Self::Source(r) | Self::Standalone(r) => r.suspended(),
            Self::Deployment(d) => d.suspended(),
            Self::Controller(c) => c.suspended(),
        }
    }

    fn conditions(&self) -> &[Condition] {
        match self {
            Self::Source(r) | Self::Standalone(r) => r.conditions(),
            Self::Deployment(d) => d.conditions(),
            Self::Controller(c) => c.conditions(),
        }
    }
}

fn str_at(raw: &Json, ptr: &str) -> Option<String> {
    raw.pointer(ptr).and_then(|v| v.as_str()).map(str::to_string)
}

fn string_map(v: Option<&Json>) -> BTreeMap<String, String> {
    v.and_then(|m| m.as_object())
        .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
        .unwrap_or_default()
}

// Malformed entries are skipped one by one so a single bad condition does not
// hide the others.
fn conditions_at(raw: &Json) -> Vec<Condition> {
    raw.pointer("/status/conditions")
        .and_then(|v| v.as_array())
        .map(|cs| cs.iter().filter_map(|c| serde_json::from_value::<Condition>(c.clone()).ok()).collect())
        .unwrap_or_default()
}

fn source_ref_at(kind: FluxKind, raw: &Json) -> Option<SourceRef> {
    let ptr = match kind {
        FluxKind::HelmRelease => "/spec/chart/spec/sourceRef",
        _ => "/spec/sourceRef",
    };
    raw.pointer(ptr).cloned().and_then(|v| serde_json::from_value::<SourceRef>(v).ok())
}
