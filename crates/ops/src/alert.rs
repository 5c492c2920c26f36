//! User-facing outcome notifications.
//!
//! Every sync or toggle posts exactly one [`Alert`] to an [`AlertSink`]; the
//! front end decides how to render it.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertDisplay {
    #[default]
    Transient,
}

/// User-facing notification of a terminal sync/toggle outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub message: String,
    pub severity: Severity,
    pub display: AlertDisplay,
}

impl Alert {
    pub fn success(message: impl Into<String>) -> Self {
        Self { message: message.into(), severity: Severity::Success, display: AlertDisplay::Transient }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { message: message.into(), severity: Severity::Error, display: AlertDisplay::Transient }
    }
}

/// Fire-and-forget sink; implementations own their own synchronisation.
pub trait AlertSink: Send + Sync {
    fn post(&self, alert: Alert);
}

/// Keeps every alert, for tests and for callers that render later.
#[derive(Debug, Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerts {
    pub fn new() -> Self { Self::default() }

    pub fn alerts(&self) -> Vec<Alert> { self.alerts.lock().map(|a| a.clone()).unwrap_or_default() }
}

impl AlertSink for RecordingAlerts {
    fn post(&self, alert: Alert) {
        if let Ok(mut a) = self.alerts.lock() {
            a.push(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alerts_are_transient() {
        assert_eq!(Alert::success("ok").display, AlertDisplay::Transient);
        assert_eq!(Alert::error("bad").severity, Severity::Error);
    }

    #[test]
    fn recording_keeps_order() {
        let sink = RecordingAlerts::new();
        sink.post(Alert::success("first"));
        sink.post(Alert::error("second"));
        let got: Vec<String> = sink.alerts().into_iter().map(|a| a.message).collect();
        assert_eq!(got, vec!["first", "second"]);
    }

    #[test]
    fn alert_json_shape() {
        let v = serde_json::to_value(Alert::error("Sync error: cancelled")).expect("json");
        assert_eq!(v, serde_json::json!({"message": "Sync error: cancelled", "severity": "error", "display": "transient"}));
    }
}
