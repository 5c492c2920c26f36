#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use skiff_core::RECONCILE_REQUEST_ANNOTATION;
use skiff_kubehub::{mock::MockProxy, Method, ProxyRequest, ProxyResponse};

/// A proxy that behaves like a healthy Flux controller: every GET reports
/// the last requested-at value patched onto that path as handled.
pub fn echoing_controller() -> MockProxy {
    echoing_controller_with(|_| None)
}

/// Like [`echoing_controller`], but `reject` may answer a PATCH path with a
/// canned error response instead.
pub fn echoing_controller_with<F>(reject: F) -> MockProxy
where
    F: Fn(&str) -> Option<ProxyResponse> + Send + Sync + 'static,
{
    let handled: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
    MockProxy::new(move |_cluster, req: &ProxyRequest| {
        let mut handled = handled.lock().expect("lock");
        match req.method {
            Method::Patch => {
                if let Some(resp) = reject(&req.path) {
                    return Ok(resp);
                }
                let at = req
                    .body
                    .as_ref()
                    .and_then(|b| b.pointer("/metadata/annotations"))
                    .and_then(|a| a.get(RECONCILE_REQUEST_ANNOTATION))
                    .and_then(|v| v.as_str());
                if let Some(at) = at {
                    handled.insert(req.path.clone(), at.to_string());
                }
                Ok(ProxyResponse::ok_json(json!({})))
            }
            Method::Get => {
                let at = handled.get(&req.path).cloned();
                Ok(ProxyResponse::ok_json(json!({ "status": { "lastHandledReconcileAt": at } })))
            }
        }
    })
}
