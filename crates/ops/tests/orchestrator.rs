#![forbid(unsafe_code)]

mod common;

use std::time::Duration;

use serde_json::json;
use skiff_core::{FluxKind, FluxObject, ResourceRef, SourceRef};
use skiff_kubehub::{Method, ProxyResponse};
use skiff_ops::{sync, toggle_suspend, AlertDisplay, RecordingAlerts, Severity, SyncError, SyncOptions, SyncTarget, ToggleError};
use tokio_util::sync::CancellationToken;

fn opts() -> SyncOptions { SyncOptions { poll_interval: Duration::from_millis(500), max_attempts: 5 } }

fn kustomization_with_source(source_kind: &str) -> SyncTarget {
    SyncTarget {
        kind: "Kustomization".into(),
        name: "apps".into(),
        namespace: "team-a".into(),
        cluster_name: "prod".into(),
        source_ref: Some(SourceRef { kind: source_kind.into(), name: "platform".into(), namespace: Some("flux-system".into()) }),
    }
}

fn source_path() -> String {
    ResourceRef::new(FluxKind::GitRepository.gvk(), "platform", "flux-system", "prod").path().expect("path")
}

fn target_path() -> String {
    ResourceRef::new(FluxKind::Kustomization.gvk(), "apps", "team-a", "prod").path().expect("path")
}

#[tokio::test(start_paused = true)]
async fn source_is_reconciled_before_target() {
    let proxy = common::echoing_controller();
    let alerts = RecordingAlerts::new();
    sync(&kustomization_with_source("GitRepository"), &proxy, &alerts, &opts(), &CancellationToken::new())
        .await
        .expect("sync");

    assert_eq!(proxy.paths(Method::Patch), vec![source_path(), target_path()]);
    // The target is patched only after the source poll finished.
    let calls = proxy.calls();
    let methods: Vec<(Method, String)> = calls.iter().map(|c| (c.request.method, c.request.path.clone())).collect();
    assert_eq!(
        methods,
        vec![
            (Method::Patch, source_path()),
            (Method::Get, source_path()),
            (Method::Patch, target_path()),
            (Method::Get, target_path()),
        ]
    );
    assert!(calls.iter().all(|c| c.cluster == "prod"));

    let stamps: Vec<String> = calls
        .iter()
        .filter(|c| c.request.method == Method::Patch)
        .filter_map(|c| c.request.body.as_ref())
        .filter_map(|b| b.pointer("/metadata/annotations/reconcile.fluxcd.io~1requestedAt"))
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    assert_eq!(stamps.len(), 2);

    let got = alerts.alerts();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].message, "Sync request successful");
    assert_eq!(got[0].severity, Severity::Success);
    assert_eq!(got[0].display, AlertDisplay::Transient);
}

#[tokio::test(start_paused = true)]
async fn failed_source_leaves_target_untouched() {
    let rejected = source_path();
    let proxy = common::echoing_controller_with(move |path| (path == rejected).then(|| ProxyResponse::error(403, "Forbidden")));
    let alerts = RecordingAlerts::new();
    let err = sync(&kustomization_with_source("GitRepository"), &proxy, &alerts, &opts(), &CancellationToken::new())
        .await
        .expect_err("source rejected");
    assert!(matches!(err, SyncError::Request { status: 403, .. }));
    assert_eq!(proxy.paths(Method::Patch), vec![source_path()]);
    assert_eq!(proxy.count(Method::Get), 0);

    let got = alerts.alerts();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].severity, Severity::Error);
    assert_eq!(got[0].message, "Sync error: request failed: 403 Forbidden");
}

#[tokio::test(start_paused = true)]
async fn unknown_kind_makes_no_calls() {
    let proxy = common::echoing_controller();
    let alerts = RecordingAlerts::new();
    let target = SyncTarget { kind: "Widget".into(), source_ref: None, ..kustomization_with_source("GitRepository") };
    let err = sync(&target, &proxy, &alerts, &opts(), &CancellationToken::new()).await.expect_err("unknown");
    assert!(matches!(err, SyncError::UnknownKind(_)));
    assert!(proxy.calls().is_empty());
    assert_eq!(alerts.alerts()[0].message, "Sync error: unknown kind: Widget");
}

#[tokio::test(start_paused = true)]
async fn unknown_source_kind_makes_no_calls() {
    let proxy = common::echoing_controller();
    let alerts = RecordingAlerts::new();
    let err = sync(&kustomization_with_source("Mystery"), &proxy, &alerts, &opts(), &CancellationToken::new())
        .await
        .expect_err("unknown source");
    assert!(matches!(err, SyncError::UnknownKind(_)));
    assert!(proxy.calls().is_empty());
    assert_eq!(alerts.alerts()[0].severity, Severity::Error);
}

#[tokio::test(start_paused = true)]
async fn target_without_source_syncs_alone() {
    let proxy = common::echoing_controller();
    let alerts = RecordingAlerts::new();
    let target = kustomization_with_source("GitRepository").without_source();
    sync(&target, &proxy, &alerts, &opts(), &CancellationToken::new()).await.expect("sync");
    assert_eq!(proxy.paths(Method::Patch), vec![target_path()]);
}

#[tokio::test(start_paused = true)]
async fn target_timeout_is_alerted() {
    // Accepts patches but never reports anything handled.
    let proxy = skiff_kubehub::mock::MockProxy::always(ProxyResponse::ok_json(json!({"status": {}})));
    let alerts = RecordingAlerts::new();
    let target = kustomization_with_source("GitRepository").without_source();
    let err = sync(&target, &proxy, &alerts, &opts(), &CancellationToken::new()).await.expect_err("timeout");
    assert!(matches!(err, SyncError::Timeout { attempts: 5 }));
    assert_eq!(proxy.count(Method::Get), 5);
    assert_eq!(alerts.alerts()[0].message, "Sync error: timed out waiting for status to update");
}

#[tokio::test(start_paused = true)]
async fn target_built_from_fetched_helmrelease() {
    let raw = json!({
        "metadata": {"name": "podinfo", "namespace": "apps"},
        "spec": {"chart": {"spec": {"sourceRef": {"kind": "HelmRepository", "name": "podinfo"}}}}
    });
    let target = SyncTarget::from_object(&FluxObject::from_json(FluxKind::HelmRelease, "dev", &raw));
    let proxy = common::echoing_controller();
    let alerts = RecordingAlerts::new();
    sync(&target, &proxy, &alerts, &opts(), &CancellationToken::new()).await.expect("sync");
    let repo = ResourceRef::new(FluxKind::HelmRepository.gvk(), "podinfo", "apps", "dev").path().expect("path");
    let release = ResourceRef::new(FluxKind::HelmRelease.gvk(), "podinfo", "apps", "dev").path().expect("path");
    assert_eq!(proxy.paths(Method::Patch), vec![repo, release]);
}

#[tokio::test]
async fn resume_patches_spec_and_alerts() {
    let proxy = common::echoing_controller();
    let alerts = RecordingAlerts::new();
    let target = kustomization_with_source("GitRepository");
    toggle_suspend(&target, false, &proxy, &alerts).await.expect("resume");

    let calls = proxy.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].request.path, target_path());
    assert_eq!(calls[0].request.body, Some(json!({"spec": {"suspend": false}})));
    assert_eq!(alerts.alerts()[0].message, "Successfully resumed apps");

    toggle_suspend(&target, true, &proxy, &alerts).await.expect("suspend");
    assert_eq!(proxy.calls()[1].request.body, Some(json!({"spec": {"suspend": true}})));
    assert_eq!(alerts.alerts()[1].message, "Successfully suspended apps");
}

#[tokio::test]
async fn rejected_resume_reports_verb_and_status() {
    let proxy = common::echoing_controller_with(|_| Some(ProxyResponse::error(403, "Forbidden")));
    let alerts = RecordingAlerts::new();
    let err = toggle_suspend(&kustomization_with_source("GitRepository"), false, &proxy, &alerts)
        .await
        .expect_err("rejected");
    assert!(matches!(err, ToggleError::Rejected { status: 403, .. }));
    let got = alerts.alerts();
    assert_eq!(got[0].message, "Failed to Resume resource: 403 Forbidden");
    assert_eq!(got[0].severity, Severity::Error);
    // No poll follows a toggle.
    assert_eq!(proxy.count(Method::Get), 0);
}
