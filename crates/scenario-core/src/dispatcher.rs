// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Request Dispatcher Adapter: a minimal interface to an external
//! HTTP client. The trait lives in this crate (the consumer), and
//! concrete implementations (`ReqwestDispatcher`, `StubDispatcher`)
//! live in `scenario-dispatch`, which depends on `scenario-core`
//! rather than the other way around.

use crate::model::HttpMethod;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// The request the Scheduler hands to a dispatcher, fully resolved
/// (no `${...}` left) by the time it is built.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub data: Value,
    pub duration_ms: u64,
}

/// A network-level failure reported by the dispatcher (as opposed to
/// an HTTP response with an error status, which is a `DispatchResponse`
/// with a 4xx/5xx `status`).
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub error_code: String,
    pub message: String,
    pub details: Option<Value>,
}

/// Implementations must not throw/panic: every outcome, success or
/// failure, is a value.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Response(DispatchResponse),
    Failure(DispatchFailure),
}

impl DispatchOutcome {
    pub fn is_retryable_status(&self, retry_on: &[i32]) -> bool {
        match self {
            DispatchOutcome::Response(r) => retry_on.contains(&(r.status as i32)),
            DispatchOutcome::Failure(_) => false,
        }
    }
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Performs one HTTP call. Never returns an `Err` — network
    /// failures are reported as `DispatchOutcome::Failure`.
    async fn dispatch(&self, request: DispatchRequest) -> DispatchOutcome;

    /// A short name for logging/diagnostics.
    fn name(&self) -> &str;
}
