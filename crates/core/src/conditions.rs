//! Condition model: turns a resource's raw status conditions into a
//! canonical [`ReadinessState`].
//!
//! Readiness is derived, never stored. Callers recompute it from
//! `(suspended, conditions)` every time they look at an object.

use serde::{Deserialize, Serialize};

pub const READY: &str = "Ready";
pub const AVAILABLE: &str = "Available";
pub const SOURCE_VERIFIED: &str = "SourceVerified";

pub const REASON_PROGRESSING: &str = "Progressing";
pub const REASON_PLANNED_WITH_CHANGES: &str = "TerraformPlannedWithChanges";

/// Status of a single condition. `""` (and anything unrecognised) is `Empty`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
    #[default]
    Empty,
}

impl From<String> for ConditionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "True" => Self::True,
            "False" => Self::False,
            "Unknown" => Self::Unknown,
            _ => Self::Empty,
        }
    }
}

impl From<ConditionStatus> for String {
    fn from(s: ConditionStatus) -> Self {
        match s {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
            ConditionStatus::Empty => "",
        }
        .to_string()
    }
}

/// Immutable snapshot of one status condition, in server order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    #[serde(default)]
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: String,
    /// RFC3339; Kubernetes calls it `lastTransitionTime`.
    #[serde(default, alias = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Condition {
    pub fn new(r#type: impl Into<String>, status: ConditionStatus) -> Self {
        Self { r#type: r#type.into(), status, reason: None, message: String::new(), timestamp: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    fn is_readiness(&self) -> bool {
        self.r#type == READY || self.r#type == AVAILABLE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadinessState {
    Ready,
    NotReady,
    Reconciling,
    PendingAction,
    Suspended,
    None,
    /// Object could not be read; never produced by [`compute_readiness`].
    Unknown,
}

impl std::fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "Ready",
            Self::NotReady => "Not Ready",
            Self::Reconciling => "Reconciling",
            Self::PendingAction => "Pending Action",
            Self::Suspended => "Suspended",
            Self::None => "None",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Classify a resource. The suspend flag wins over every condition.
pub fn compute_readiness(suspended: bool, conditions: &[Condition]) -> ReadinessState {
    if suspended {
        return ReadinessState::Suspended;
    }
    match conditions.iter().find(|c| c.is_readiness()) {
        Some(c) => match c.status {
            ConditionStatus::True => ReadinessState::Ready,
            ConditionStatus::Unknown => match c.reason.as_deref() {
                Some(REASON_PROGRESSING) => ReadinessState::Reconciling,
                Some(REASON_PLANNED_WITH_CHANGES) => ReadinessState::PendingAction,
                _ => ReadinessState::NotReady,
            },
            ConditionStatus::Empty => ReadinessState::None,
            ConditionStatus::False => ReadinessState::NotReady,
        },
        // No readiness condition: healthy unless something reports False.
        None if conditions.iter().any(|c| c.status == ConditionStatus::False) => ReadinessState::NotReady,
        None => ReadinessState::Ready,
    }
}

/// Message a failure banner should show. Rule order matters: a Ready/Available
/// message beats an earlier `False` condition.
pub fn select_display_message(conditions: &[Condition]) -> String {
    conditions
        .iter()
        .find(|c| c.is_readiness())
        .or_else(|| conditions.iter().find(|c| c.status == ConditionStatus::False))
        .or_else(|| conditions.first())
        .map(|c| c.message.clone())
        .unwrap_or_default()
}

pub fn find_condition<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

/// Signature verification outcome carried by `SourceVerified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verification {
    Verified,
    Failed { message: String },
    Unverified,
}

/// `None` when the source does not verify signatures at all.
pub fn verification(conditions: &[Condition]) -> Option<Verification> {
    find_condition(conditions, SOURCE_VERIFIED).map(|c| match c.status {
        ConditionStatus::True => Verification::Verified,
        ConditionStatus::False => Verification::Failed { message: c.message.clone() },
        _ => Verification::Unverified,
    })
}
