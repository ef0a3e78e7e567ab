// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scenario graph execution engine: the data model, the Value
//! Resolver, the Condition Evaluator, the Graph Model & Sync layer,
//! the Loop Driver, the Execution Context Store, the Step Scheduler,
//! and the Observer/Event Bus.
//!
//! This crate owns everything describable as the "runtime core" of a
//! scenario document: it walks the graph, resolves `${...}`
//! placeholders, drives loops, and dispatches HTTP calls through an
//! injected [`dispatcher::Dispatcher`]. The dispatcher's concrete
//! implementations, the persistence layer, and the UI are all external
//! collaborators that depend on this crate rather than the reverse.

pub mod condition;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod graph;
pub mod layout;
pub mod loop_driver;
pub mod model;
pub mod observer;
pub mod resolver;
pub mod scheduler;
pub mod schema;

pub use context::{ExecutionContext, LogEntry, LogLevel, RunStatus, StepResult, StepRunStatus};
pub use dispatcher::{DispatchOutcome, DispatchRequest, DispatchResponse, Dispatcher};
pub use error::{GraphErrorCode, Result, ScenarioError};
pub use model::{Scenario, Step, StepId};
pub use observer::RunEvent;
pub use scheduler::{ManualDecision, RunCommand, RunHandle, Scheduler};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
