// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for the scenario execution engine: validation errors
//! stop a run before it starts, graph errors are fatal and caught
//! before the first step executes, resolution/dispatch/status errors
//! are recorded and may be locally recovered by a branch, and loop
//! safety aborts/cancellation are distinguished from "real" failures.

use thiserror::Error;

/// A typed error surfaced by the scenario engine.
#[derive(Debug, Error, Clone)]
pub enum ScenarioError {
    /// A supplied parameter does not match the scenario's parameter schema.
    #[error("validation failed for parameter '{param}': {reason}")]
    Validation { param: String, reason: String },

    /// A `${...}` path could not be resolved. Soft error: callers log
    /// it and substitute an empty string unless they require a
    /// non-empty value (e.g. a URL), in which case they escalate.
    #[error("could not resolve '${{{path}}}'")]
    Resolution { path: String },

    /// The scenario graph itself is malformed: missing start step,
    /// orphaned branch reference, cyclic container nesting, or
    /// multiple unhandled outgoing edges.
    #[error("graph error [{code}]: {message}")]
    Graph { code: GraphErrorCode, message: String },

    /// The external dispatcher reported a network-level failure
    /// (as opposed to an HTTP response with an error status).
    #[error("dispatch failed for step '{step_id}': {message}")]
    Dispatch { step_id: String, message: String },

    /// A response arrived but its status is treated as a failure by
    /// the step's branches or retry policy.
    #[error("step '{step_id}' received status {status}")]
    HttpStatus { step_id: String, status: u16 },

    /// A `while` loop exhausted `maxIterations` without its condition
    /// becoming false.
    #[error("loop '{step_id}' aborted after {max_iterations} iterations (safety cap)")]
    LoopSafetyAbort { step_id: String, max_iterations: u32 },

    /// The run was cancelled by the caller. Not a failure to recover from.
    #[error("run cancelled")]
    Cancelled,
}

/// Identifies the specific graph-integrity violation behind a
/// [`ScenarioError::Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GraphErrorCode {
    MissingStartStep,
    OrphanedBranchReference,
    CyclicContainerNesting,
    UnhandledOutgoingEdges,
    DanglingEdge,
    UnknownStep,
}

impl std::fmt::Display for GraphErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingStartStep => "missing_start_step",
            Self::OrphanedBranchReference => "orphaned_branch_reference",
            Self::CyclicContainerNesting => "cyclic_container_nesting",
            Self::UnhandledOutgoingEdges => "unhandled_outgoing_edges",
            Self::DanglingEdge => "dangling_edge",
            Self::UnknownStep => "unknown_step",
        };
        write!(f, "{s}")
    }
}

impl From<serde_json::Error> for ScenarioError {
    fn from(err: serde_json::Error) -> Self {
        Self::Resolution {
            path: format!("<json error: {err}>"),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScenarioError>;
