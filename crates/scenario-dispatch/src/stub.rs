// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An in-memory scripted [`Dispatcher`], replacing `mockito` (which
//! mocks literal HTTP endpoints — moot for an injected-trait
//! dispatcher). Scripted responses are queued per URL; requests to a
//! URL with no queued response fall back to a default outcome if one
//! was configured, or a network-failure outcome otherwise. Every call
//! is recorded so tests can assert dispatch counts and bodies.

use async_trait::async_trait;
use parking_lot::Mutex;
use scenario_core::dispatcher::{DispatchFailure, DispatchOutcome, DispatchRequest, DispatchResponse, Dispatcher};
use std::collections::{HashMap, VecDeque};

/// One scripted outcome. A bare success shorthand is provided via
/// [`ScriptedResponse::ok`] for the common case.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Response(DispatchResponse),
    Failure(DispatchFailure),
}

impl ScriptedResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self::Response(DispatchResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            data,
            duration_ms: 1,
        })
    }

    pub fn status(status: u16, data: serde_json::Value) -> Self {
        Self::Response(DispatchResponse {
            status,
            status_text: String::new(),
            headers: HashMap::new(),
            data,
            duration_ms: 1,
        })
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self::Failure(DispatchFailure {
            error_code: "network".to_string(),
            message: message.into(),
            details: None,
        })
    }

    fn into_outcome(self) -> DispatchOutcome {
        match self {
            Self::Response(r) => DispatchOutcome::Response(r),
            Self::Failure(f) => DispatchOutcome::Failure(f),
        }
    }
}

struct Inner {
    queues: HashMap<String, VecDeque<ScriptedResponse>>,
    default: Option<ScriptedResponse>,
    calls: Vec<DispatchRequest>,
}

/// A scripted, in-process stand-in for a real dispatcher.
pub struct StubDispatcher {
    inner: Mutex<Inner>,
    name: String,
}

impl StubDispatcher {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queues: HashMap::new(),
                default: None,
                calls: Vec::new(),
            }),
            name: "stub".to_string(),
        }
    }

    /// Queues `response` to be returned for the next dispatch to `url`.
    /// Multiple calls for the same url queue in order.
    pub fn enqueue(&self, url: impl Into<String>, response: ScriptedResponse) -> &Self {
        self.inner.lock().queues.entry(url.into()).or_default().push_back(response);
        self
    }

    /// Sets the outcome returned for any URL with no (or an exhausted)
    /// per-URL queue.
    pub fn set_default(&self, response: ScriptedResponse) -> &Self {
        self.inner.lock().default = Some(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().calls.len()
    }

    pub fn calls(&self) -> Vec<DispatchRequest> {
        self.inner.lock().calls.clone()
    }
}

impl Default for StubDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for StubDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> DispatchOutcome {
        let mut inner = self.inner.lock();
        inner.calls.push(request.clone());

        let scripted = inner
            .queues
            .get_mut(&request.url)
            .and_then(|q| q.pop_front())
            .or_else(|| inner.default.clone());

        match scripted {
            Some(scripted) => scripted.into_outcome(),
            None => DispatchOutcome::Failure(DispatchFailure {
                error_code: "unscripted".to_string(),
                message: format!("no scripted response queued for '{}'", request.url),
                details: None,
            }),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
