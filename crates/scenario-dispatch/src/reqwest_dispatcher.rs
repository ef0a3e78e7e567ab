// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A `reqwest`-backed [`Dispatcher`]: a single `reqwest::Client` built
//! once and reused, with per-request timeouts applied via
//! `RequestBuilder::timeout` rather than baked into the client, since
//! every `DispatchRequest` may carry its own `timeout_ms` (step
//! timeout overriding server default).

use async_trait::async_trait;
use reqwest::{Client, Method};
use scenario_core::dispatcher::{DispatchFailure, DispatchOutcome, DispatchRequest, DispatchResponse, Dispatcher};
use scenario_core::model::HttpMethod;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct ReqwestDispatcher {
    client: Client,
    name: String,
}

impl ReqwestDispatcher {
    pub fn new() -> Self {
        Self::named("reqwest")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            client: Client::builder().build().expect("failed to build reqwest client"),
            name: name.into(),
        }
    }

    fn convert_method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    /// Classifies a `reqwest::Error` into an `error_code`. This
    /// dispatcher has no notion of provider-specific auth/rate-limit
    /// errors; those surface as an ordinary HTTP status response
    /// instead.
    fn classify_error(err: &reqwest::Error) -> &'static str {
        if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connect"
        } else if err.is_decode() {
            "decode"
        } else {
            "network"
        }
    }
}

impl Default for ReqwestDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for ReqwestDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> DispatchOutcome {
        let start = Instant::now();
        let mut builder = self
            .client
            .request(Self::convert_method(request.method), &request.url)
            .timeout(Duration::from_millis(request.timeout_ms));

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(url = %request.url, error = %err, "dispatch failed");
                return DispatchOutcome::Failure(DispatchFailure {
                    error_code: Self::classify_error(&err).to_string(),
                    message: err.to_string(),
                    details: None,
                });
            }
        };

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                return DispatchOutcome::Failure(DispatchFailure {
                    error_code: "decode".to_string(),
                    message: err.to_string(),
                    details: None,
                })
            }
        };
        let data = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        });

        DispatchOutcome::Response(DispatchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            data,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_every_http_method() {
        assert_eq!(ReqwestDispatcher::convert_method(HttpMethod::Get), Method::GET);
        assert_eq!(ReqwestDispatcher::convert_method(HttpMethod::Post), Method::POST);
        assert_eq!(ReqwestDispatcher::convert_method(HttpMethod::Put), Method::PUT);
        assert_eq!(ReqwestDispatcher::convert_method(HttpMethod::Patch), Method::PATCH);
        assert_eq!(ReqwestDispatcher::convert_method(HttpMethod::Delete), Method::DELETE);
    }

    #[test]
    fn default_dispatcher_is_named_reqwest() {
        assert_eq!(ReqwestDispatcher::default().name(), "reqwest");
    }
}
