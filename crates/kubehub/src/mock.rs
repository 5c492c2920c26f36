//! Scripted in-memory proxy for tests. Records every call in arrival order.

use std::sync::{Arc, Mutex};

use crate::{ClusterProxy, Method, ProxyError, ProxyRequest, ProxyResponse};

/// One request as the proxy saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub cluster: String,
    pub request: ProxyRequest,
}

type Responder = dyn Fn(&str, &ProxyRequest) -> Result<ProxyResponse, ProxyError> + Send + Sync;

pub struct MockProxy {
    responder: Box<Responder>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockProxy {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &ProxyRequest) -> Result<ProxyResponse, ProxyError> + Send + Sync + 'static,
    {
        Self { responder: Box::new(responder), calls: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Answers every request with the same response.
    pub fn always(resp: ProxyResponse) -> Self { Self::new(move |_, _| Ok(resp.clone())) }

    pub fn calls(&self) -> Vec<RecordedCall> { self.calls.lock().map(|c| c.clone()).unwrap_or_default() }

    pub fn count(&self, method: Method) -> usize { self.calls().iter().filter(|c| c.request.method == method).count() }

    pub fn paths(&self, method: Method) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.request.method == method).map(|c| c.request.path).collect()
    }
}

#[async_trait::async_trait]
impl ClusterProxy for MockProxy {
    async fn request(&self, cluster: &str, req: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall { cluster: cluster.to_string(), request: req.clone() });
        }
        (self.responder)(cluster, &req)
    }
}
