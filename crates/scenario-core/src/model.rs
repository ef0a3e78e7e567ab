// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The scenario document data model: servers, steps, branches, edges,
//! parameter schemas, and the scenario itself.
//!
//! This is a plain entity-table model: everything that would be a
//! mutable object reference in a document-oriented source is instead
//! a `String` id looked up in a `Vec`/`HashMap` on the owning
//! [`Scenario`]. Nothing here holds a reference to another part of
//! the model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type StepId = String;
pub type EdgeId = String;
pub type BranchId = String;
pub type ServerId = String;

/// A header entry as authored in the UI: key/value plus an enabled flag
/// so a header can be toggled off without deleting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// An HTTP server a request step can target. Immutable during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub default_headers: Vec<HeaderEntry>,
    pub default_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
    #[default]
    Auto,
    Manual,
    Delayed,
    Bypass,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A retry policy attached to a request step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Status codes that trigger a retry. `0` is the convention for
    /// "retry on network error"; an empty list also retries network
    /// errors.
    #[serde(default)]
    pub retry_on: Vec<i32>,
}

impl RetryConfig {
    pub fn retries_network_errors(&self) -> bool {
        self.retry_on.is_empty() || self.retry_on.contains(&0)
    }
}

/// A labelled outgoing edge of a condition/request step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: BranchId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<crate::condition::ConditionExpression>,
    #[serde(default)]
    pub is_default: bool,
    /// Empty string means dangling (no edge materializes it yet).
    #[serde(default)]
    pub next_step_id: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A flow edge. Edges and branch/container pointers are two views of
/// the same topology; see `graph.rs` for how they're kept coherent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub source_step_id: StepId,
    pub target_step_id: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

impl Edge {
    pub fn branch_handle(branch_id: &str) -> String {
        format!("branch_{branch_id}")
    }

    pub fn is_loop_body(&self) -> bool {
        self.source_handle.as_deref() == Some("loop-body")
    }

    pub fn is_group_body(&self) -> bool {
        self.source_handle.as_deref() == Some("group-body")
    }

    pub fn branch_id(&self) -> Option<&str> {
        self.source_handle.as_deref()?.strip_prefix("branch_")
    }

    pub fn is_sequential(&self) -> bool {
        self.source_handle.is_none()
    }
}

/// Loop descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LoopDescriptor {
    ForEach {
        /// Path expression, must resolve to an array.
        source: String,
        item_alias: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index_alias: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count_field: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_iterations: Option<u32>,
    },
    Count {
        /// Number literal or `${...}` template resolving to a number.
        count: String,
        index_alias: String,
    },
    While {
        condition: crate::condition::ConditionExpression,
        max_iterations: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStepData {
    pub server_id: ServerId,
    pub method: HttpMethod,
    pub endpoint: String,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub query_params: Vec<HeaderEntry>,
    #[serde(default = "default_true")]
    pub wait_for_response: bool,
    #[serde(default)]
    pub save_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionStepData {
    pub branches: Vec<Branch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopStepData {
    #[serde(rename = "loop")]
    pub loop_descriptor: LoopDescriptor,
    pub step_ids: Vec<StepId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStepData {
    pub step_ids: Vec<StepId>,
    #[serde(default)]
    pub collapsed: bool,
}

/// A node in the scenario graph. Common fields are repeated per
/// variant (rather than flattened) so the JSON shape matches an
/// internally-tagged document with a single discriminating `type`
/// field; use the accessor methods below instead of matching by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Step {
    Request {
        id: StepId,
        name: String,
        #[serde(default)]
        execution_mode: ExecutionMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<crate::condition::ConditionExpression>,
        position: Position,
        #[serde(flatten)]
        data: RequestStepData,
    },
    Condition {
        id: StepId,
        name: String,
        #[serde(default)]
        execution_mode: ExecutionMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<crate::condition::ConditionExpression>,
        position: Position,
        #[serde(flatten)]
        data: ConditionStepData,
    },
    Loop {
        id: StepId,
        name: String,
        #[serde(default)]
        execution_mode: ExecutionMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<crate::condition::ConditionExpression>,
        position: Position,
        #[serde(flatten)]
        data: LoopStepData,
    },
    Group {
        id: StepId,
        name: String,
        #[serde(default)]
        execution_mode: ExecutionMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<crate::condition::ConditionExpression>,
        position: Position,
        #[serde(flatten)]
        data: GroupStepData,
    },
}

impl Step {
    pub fn id(&self) -> &StepId {
        match self {
            Self::Request { id, .. }
            | Self::Condition { id, .. }
            | Self::Loop { id, .. }
            | Self::Group { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Request { name, .. }
            | Self::Condition { name, .. }
            | Self::Loop { name, .. }
            | Self::Group { name, .. } => name,
        }
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        match self {
            Self::Request { execution_mode, .. }
            | Self::Condition { execution_mode, .. }
            | Self::Loop { execution_mode, .. }
            | Self::Group { execution_mode, .. } => *execution_mode,
        }
    }

    pub fn delay_ms(&self) -> Option<u64> {
        match self {
            Self::Request { delay_ms, .. }
            | Self::Condition { delay_ms, .. }
            | Self::Loop { delay_ms, .. }
            | Self::Group { delay_ms, .. } => *delay_ms,
        }
    }

    pub fn condition(&self) -> Option<&crate::condition::ConditionExpression> {
        match self {
            Self::Request { condition, .. }
            | Self::Condition { condition, .. }
            | Self::Loop { condition, .. }
            | Self::Group { condition, .. } => condition.as_ref(),
        }
    }

    /// The step's branches, if it has any (Request and Condition steps).
    pub fn branches(&self) -> Option<&[Branch]> {
        match self {
            Self::Request { data, .. } => Some(&data.branches),
            Self::Condition { data, .. } => Some(&data.branches),
            _ => None,
        }
    }

    pub fn branches_mut(&mut self) -> Option<&mut Vec<Branch>> {
        match self {
            Self::Request { data, .. } => Some(&mut data.branches),
            Self::Condition { data, .. } => Some(&mut data.branches),
            _ => None,
        }
    }

    /// The step's children, if it is a container (Loop and Group steps).
    pub fn step_ids(&self) -> Option<&[StepId]> {
        match self {
            Self::Loop { data, .. } => Some(&data.step_ids),
            Self::Group { data, .. } => Some(&data.step_ids),
            _ => None,
        }
    }

    pub fn step_ids_mut(&mut self) -> Option<&mut Vec<StepId>> {
        match self {
            Self::Loop { data, .. } => Some(&mut data.step_ids),
            Self::Group { data, .. } => Some(&mut data.step_ids),
            _ => None,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Self::Loop { .. } | Self::Group { .. })
    }
}

/// A parameter's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
    /// Present when `param_type == Object`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<ParameterSchema>,
    /// Present when `param_type == Array`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_schema: Option<Box<ParameterSchema>>,
}

/// The whole authored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub server_ids: Vec<ServerId>,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub parameter_schema: Vec<ParameterSchema>,
    pub steps: Vec<Step>,
    pub edges: Vec<Edge>,
    /// Existing step id, or empty for "no entry point".
    #[serde(default)]
    pub start_step_id: StepId,
}

impl Scenario {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id() == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id() == id)
    }

    pub fn server(&self, id: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn edges_from(&self, step_id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.source_step_id == step_id)
    }
}

/// Per-run mode overrides, supplied to `run()`.
pub type ModeOverrides = HashMap<StepId, ExecutionMode>;
