// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution Context Store: run state — status, current step, step
//! results, saved responses, loop stacks, logs.

use crate::dispatcher::{DispatchRequest, DispatchResponse};
use crate::loop_driver::{LoopSnapshot, LoopStacks};
use crate::model::{ModeOverrides, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepRunStatus {
    Pending,
    Running,
    Waiting,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

/// A domain log entry published to observers — distinct from
/// `tracing` process logs, which this engine also emits for
/// operational visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            step_id: None,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_step(mut self, step_id: impl Into<StepId>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A typed error recorded in a failed `StepResult`, flattened to a
/// serializable shape for the observer/log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedError {
    pub kind: String,
    pub message: String,
}

impl From<&crate::error::ScenarioError> for RecordedError {
    fn from(err: &crate::error::ScenarioError) -> Self {
        use crate::error::ScenarioError::*;
        let kind = match err {
            Validation { .. } => "validation",
            Resolution { .. } => "resolution",
            Graph { .. } => "graph",
            Dispatch { .. } => "dispatch",
            HttpStatus { .. } => "httpStatus",
            LoopSafetyAbort { .. } => "loopSafetyAbort",
            Cancelled => "cancelled",
        };
        Self {
            kind: kind.to_string(),
            message: err.to_string(),
        }
    }
}

/// Request/response pair recorded for a `RequestStep`'s result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOutcome {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub attempt: u32,
}

impl RequestOutcome {
    pub fn from_dispatch(request: &DispatchRequest, response: &DispatchResponse, attempt: u32) -> Self {
        Self {
            url: request.url.clone(),
            method: request.method.to_string(),
            status: Some(response.status),
            data: Some(response.data.clone()),
            attempt,
        }
    }
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// The per-step execution record. Includes — importantly — a
/// `loop_snapshot` of the containing loop stack at the moment of
/// execution, so identical step IDs across iterations stay
/// distinguishable to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: StepId,
    pub status: StepRunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration",
        default
    )]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordedError>,
    #[serde(default)]
    pub loop_snapshot: Vec<LoopSnapshot>,
}

impl StepResult {
    pub fn new(step_id: StepId, status: StepRunStatus) -> Self {
        Self {
            step_id,
            status,
            started_at: Utc::now(),
            finished_at: None,
            duration: Duration::default(),
            request: None,
            error: None,
            loop_snapshot: Vec::new(),
        }
    }

    pub fn finish(mut self, status: StepRunStatus) -> Self {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.duration = (now - self.started_at)
            .to_std()
            .unwrap_or_default();
        self.status = status;
        self
    }
}

/// Run state. Owned exclusively by the one task running the
/// scheduler loop for this run — no shared mutation across runs, and
/// within a run, mutated only by that task.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub scenario_id: String,
    pub status: RunStatus,
    pub params: Value,
    pub mode_overrides: ModeOverrides,
    pub current_step_id: Option<StepId>,
    pub step_results: HashMap<StepId, StepResult>,
    pub responses: HashMap<String, Value>,
    pub loop_stacks: LoopStacks,
    /// itemAlias/indexAlias bindings for each active loop frame, kept
    /// at the same depth as `loop_stacks` so forEach/count aliases are
    /// addressable at the top level rather than via `loop.*`.
    pub alias_stack: Vec<HashMap<String, Value>>,
    pub logs: Vec<LogEntry>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionContext {
    pub fn new(scenario_id: impl Into<String>, params: Value, mode_overrides: ModeOverrides) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            scenario_id: scenario_id.into(),
            status: RunStatus::Idle,
            params,
            mode_overrides,
            current_step_id: None,
            step_results: HashMap::new(),
            responses: HashMap::new(),
            loop_stacks: LoopStacks::default(),
            alias_stack: Vec::new(),
            logs: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Builds a fresh `Bindings` seeded from the current `params`,
    /// `responses`, the innermost active loop frame, and every active
    /// frame's itemAlias/indexAlias (outermost first, so an inner
    /// loop's alias shadows an outer one of the same name).
    pub fn bindings(&self) -> crate::resolver::Bindings {
        let mut bindings = crate::resolver::Bindings::new(self.params.clone());
        bindings.responses = self.responses.clone();
        self.loop_stacks.seed(&mut bindings);
        for frame in &self.alias_stack {
            for (name, value) in frame {
                bindings.aliases.insert(name.clone(), value.clone());
            }
        }
        bindings
    }

    pub fn push_alias_frame(&mut self, aliases: Vec<(String, Value)>) {
        self.alias_stack.push(aliases.into_iter().collect());
    }

    pub fn pop_alias_frame(&mut self) {
        self.alias_stack.pop();
    }

    pub fn log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    /// Writes a `StepResult`. The `responses` map is always written
    /// before the next step's dispatch begins, so this must be
    /// called, and `save_response` if applicable, before advancing.
    pub fn record_result(&mut self, result: StepResult) {
        self.step_results.insert(result.step_id.clone(), result);
    }

    pub fn save_response(&mut self, key: impl Into<String>, value: Value) {
        self.responses.insert(key.into(), value);
    }
}
