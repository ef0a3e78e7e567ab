// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Step Scheduler: walks a scenario's graph one step at a time,
//! dispatching requests through a [`Dispatcher`], driving loops through
//! [`crate::loop_driver`], and publishing every transition on an
//! [`EventBus`]. Single-active-step, mode-aware: at most one step
//! executes at a time, and each step's effective execution mode
//! (auto/manual/delayed/bypass) gates whether and how it runs.
//!
//! Branch-based redirection governs advancement at the top level of
//! the graph. Inside a loop/group body, children run in their declared
//! `stepIds` order; a child's own branches may still redirect, but
//! doing so is treated as escaping the container and resuming the
//! top-level walk from the target, rather than jumping to another
//! sibling within the same body.

use crate::context::{ExecutionContext, LogEntry, LogLevel, RecordedError, RequestOutcome, RunStatus, StepRunStatus, StepResult};
use crate::dispatcher::{DispatchOutcome, DispatchRequest, Dispatcher};
use crate::error::{Result, ScenarioError};
use crate::loop_driver::{self, LoopFrame};
use crate::model::{Branch, ExecutionMode, ModeOverrides, Scenario, Step, StepId};
use crate::observer::{EventBus, RunEvent};
use crate::resolver::{resolve_string, resolve_value, Bindings};
use crate::{graph, schema};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, instrument};

/// A command sent to a running scheduler task.
#[derive(Debug, Clone)]
pub enum RunCommand {
    Pause,
    Resume(Option<ManualDecision>),
    Cancel,
}

/// The caller's choice at a manual gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualDecision {
    Execute,
    Skip,
    Cancel,
}

/// The scheduler entry point. Stateless beyond the dispatcher it was
/// built with and a bounded ring of completed runs, which keeps
/// recently finished contexts addressable without an external store.
pub struct Scheduler {
    dispatcher: Arc<dyn Dispatcher>,
    history: parking_lot::Mutex<std::collections::VecDeque<ExecutionContext>>,
    history_capacity: usize,
}

impl Scheduler {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::with_history_capacity(dispatcher, 100)
    }

    pub fn with_history_capacity(dispatcher: Arc<dyn Dispatcher>, history_capacity: usize) -> Self {
        Self {
            dispatcher,
            history: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            history_capacity,
        }
    }

    /// Validates the scenario and supplied params, then spawns the run
    /// as a background task and returns a [`RunHandle`] to observe and
    /// control it. Validation errors are returned synchronously — a
    /// run that fails validation never starts.
    pub fn run(&self, scenario: Scenario, params: Value, mode_overrides: ModeOverrides) -> Result<RunHandle> {
        graph::validate(&scenario)?;
        let resolved_params = schema::validate(&scenario.parameter_schema, &params)?;

        let context = Arc::new(parking_lot::RwLock::new(ExecutionContext::new(
            &scenario.id,
            resolved_params,
            mode_overrides,
        )));
        let events = EventBus::default();
        let (tx, rx) = mpsc::channel(8);

        let runner = Runner {
            scenario: Arc::new(scenario),
            dispatcher: self.dispatcher.clone(),
            context: context.clone(),
            commands: rx,
            events: events.clone(),
        };

        let join = tokio::spawn(run_to_completion(runner));
        Ok(RunHandle {
            context,
            commands: tx,
            events,
            join: Some(join),
        })
    }

    /// Archives a finished run's context into the bounded history ring.
    pub fn archive(&self, context: ExecutionContext) {
        let mut history = self.history.lock();
        history.push_back(context);
        while history.len() > self.history_capacity {
            history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<ExecutionContext> {
        self.history.lock().iter().cloned().collect()
    }
}

/// A handle to a spawned run: lets the caller observe state
/// synchronously ([`RunHandle::snapshot`]), subscribe to the event
/// stream, and issue pause/resume/cancel commands.
pub struct RunHandle {
    context: Arc<parking_lot::RwLock<ExecutionContext>>,
    commands: mpsc::Sender<RunCommand>,
    events: EventBus,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl RunHandle {
    pub fn snapshot(&self) -> ExecutionContext {
        self.context.read().clone()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    pub async fn pause(&self) -> Result<()> {
        self.commands
            .send(RunCommand::Pause)
            .await
            .map_err(|_| ScenarioError::Cancelled)
    }

    pub async fn resume(&self, decision: Option<ManualDecision>) -> Result<()> {
        self.commands
            .send(RunCommand::Resume(decision))
            .await
            .map_err(|_| ScenarioError::Cancelled)
    }

    pub async fn cancel(&self) -> Result<()> {
        self.commands
            .send(RunCommand::Cancel)
            .await
            .map_err(|_| ScenarioError::Cancelled)
    }

    /// Waits for the run to reach a terminal state and returns its
    /// final context.
    pub async fn join(&mut self) -> ExecutionContext {
        if let Some(handle) = self.join.take() {
            let _ = handle.await;
        }
        self.context.read().clone()
    }
}

/// Outcome of executing one step or one container body, used to drive
/// the top-level walk and to let a child's branch escape its container.
enum ControlFlow {
    /// Proceed to the named step (empty means no further step: run
    /// completes successfully).
    GoTo(StepId),
    Failed,
    Cancelled,
}

/// A container child's outcome: distinguishes "go to the next child in
/// declared order" from a branch firing (which escapes the container).
enum ChildOutcome {
    Continue,
    Redirect(StepId),
    Failed,
    Cancelled,
}

struct Runner {
    scenario: Arc<Scenario>,
    dispatcher: Arc<dyn Dispatcher>,
    context: Arc<parking_lot::RwLock<ExecutionContext>>,
    commands: mpsc::Receiver<RunCommand>,
    events: EventBus,
}

#[instrument(skip_all, fields(scenario_id = %runner.scenario.id))]
async fn run_to_completion(mut runner: Runner) {
    {
        let mut ctx = runner.context.write();
        ctx.status = RunStatus::Running;
    }
    runner.events.publish(RunEvent::RunStateChanged(RunStatus::Running));
    info!("run started");

    let mut current = runner.scenario.start_step_id.clone();
    let final_status = loop {
        if current.is_empty() {
            break RunStatus::Completed;
        }
        match runner.drain_cancel() {
            true => break RunStatus::Cancelled,
            false => {}
        }

        let Some(step) = runner.scenario.step(&current).cloned() else {
            runner.log(LogLevel::Error, format!("step '{current}' not found"), Some(&current));
            break RunStatus::Failed;
        };

        match runner.execute_top_level(&step).await {
            ControlFlow::GoTo(next) => current = next,
            ControlFlow::Failed => break RunStatus::Failed,
            ControlFlow::Cancelled => break RunStatus::Cancelled,
        }
    };

    let mut ctx = runner.context.write();
    ctx.status = final_status;
    ctx.completed_at = Some(chrono::Utc::now());
    runner.events.publish(RunEvent::RunStateChanged(final_status));
    info!(status = ?final_status, "run finished");
}

impl Runner {
    fn log(&self, level: LogLevel, message: impl Into<String>, step_id: Option<&str>) {
        let mut entry = LogEntry::new(level, message);
        if let Some(id) = step_id {
            entry = entry.with_step(id.to_string());
        }
        self.events.publish(RunEvent::LogEmitted(entry.clone()));
        self.context.write().log(entry);
    }

    /// Non-blocking check for a queued `Cancel`. Other commands
    /// (`Pause`/`Resume`) arriving here are not expected outside an
    /// active wait point and are ignored.
    fn drain_cancel(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            if let RunCommand::Cancel = command {
                return true;
            }
        }
        false
    }

    /// Parks until a `Resume`/`Cancel` command arrives, honoring a
    /// `Pause` that may already be queued or arrive while waiting.
    /// Returns `true` if the run should be cancelled.
    async fn wait_for_resume(&mut self) -> bool {
        {
            let mut ctx = self.context.write();
            ctx.status = RunStatus::Paused;
        }
        self.events.publish(RunEvent::RunStateChanged(RunStatus::Paused));
        loop {
            match self.commands.recv().await {
                Some(RunCommand::Cancel) | None => return true,
                Some(RunCommand::Resume(_)) => {
                    let mut ctx = self.context.write();
                    ctx.status = RunStatus::Running;
                    drop(ctx);
                    self.events.publish(RunEvent::RunStateChanged(RunStatus::Running));
                    return false;
                }
                Some(RunCommand::Pause) => continue,
            }
        }
    }

    /// Sleeps for `total`, honoring `Pause` (tracking elapsed time so a
    /// resumed delay only waits out the remainder) and `Cancel`.
    /// Returns `true` if cancelled.
    async fn sleep_interruptible(&mut self, total: Duration) -> bool {
        let mut remaining = total;
        loop {
            let deadline = Instant::now() + remaining;
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                command = self.commands.recv() => {
                    match command {
                        Some(RunCommand::Cancel) | None => return true,
                        Some(RunCommand::Pause) => {
                            remaining = deadline.saturating_duration_since(Instant::now());
                            if self.wait_for_resume().await {
                                return true;
                            }
                        }
                        Some(RunCommand::Resume(_)) => continue,
                    }
                }
            }
        }
    }

    /// Parks at a manual gate until the caller supplies a decision (or
    /// cancels, or pauses first). Returns `None` if cancelled.
    async fn wait_for_manual_decision(&mut self, step_id: &str) -> Option<ManualDecision> {
        self.events.publish(RunEvent::ManualGateReached { step_id: step_id.to_string() });
        loop {
            match self.commands.recv().await {
                Some(RunCommand::Cancel) | None => return None,
                Some(RunCommand::Resume(decision)) => return decision.or(Some(ManualDecision::Execute)),
                Some(RunCommand::Pause) => {
                    if self.wait_for_resume().await {
                        return None;
                    }
                }
            }
        }
    }

    fn effective_mode(&self, step: &Step) -> ExecutionMode {
        let ctx = self.context.read();
        ctx.mode_overrides.get(step.id()).copied().unwrap_or_else(|| step.execution_mode())
    }

    fn gate_passes(&self, step: &Step) -> bool {
        match step.condition() {
            Some(expr) => expr.evaluate(&self.context.read().bindings()),
            None => true,
        }
    }

    /// Resolves the outgoing branch/sequential step for `step`. Request
    /// and Condition steps carry a `branches` array, but it may be
    /// empty when the step was authored without any branching — an
    /// empty array means "no branches", the same as the field being
    /// absent, so it falls through to the step's plain sequential
    /// outgoing edge exactly like a Loop/Group container does. Callers
    /// distinguish success-with-no-next (`Completed`) from
    /// failure-with-no-matching-branch (`Failed`) themselves, since
    /// `next_after` doesn't know which case applies.
    fn next_after(&self, step: &Step, _succeeded: bool) -> Option<StepId> {
        match step.branches().filter(|b| !b.is_empty()) {
            Some(branches) => self.branch_next(branches),
            None => self.sequential_next(step),
        }
    }

    fn branch_next(&self, branches: &[Branch]) -> Option<StepId> {
        let bindings = self.context.read().bindings();
        let mut default: Option<&Branch> = None;
        for branch in branches {
            if branch.is_default {
                default = default.or(Some(branch));
                continue;
            }
            if let Some(condition) = &branch.condition {
                if condition.evaluate(&bindings) && !branch.next_step_id.is_empty() {
                    return Some(branch.next_step_id.clone());
                }
            }
        }
        default
            .filter(|b| !b.next_step_id.is_empty())
            .map(|b| b.next_step_id.clone())
    }

    fn sequential_next(&self, step: &Step) -> Option<StepId> {
        let mut candidates: Vec<&StepId> = self
            .scenario
            .edges_from(step.id())
            .filter(|e| e.is_sequential())
            .map(|e| &e.target_step_id)
            .collect();
        candidates.sort();
        candidates.into_iter().next().cloned()
    }

    /// Executes the step named by `current` at the top level and
    /// resolves where the walk goes next.
    async fn execute_top_level(&mut self, step: &Step) -> ControlFlow {
        if self.drain_cancel() {
            return ControlFlow::Cancelled;
        }

        if !self.gate_passes(step) {
            self.record_skip(step);
            return match self.next_after(step, true) {
                Some(next) => ControlFlow::GoTo(next),
                None => ControlFlow::GoTo(StepId::new()),
            };
        }

        match step {
            Step::Request { .. } => {
                let outcome = self.run_request_step(step).await;
                match outcome {
                    Some(true) => match self.next_after(step, true) {
                        Some(next) => ControlFlow::GoTo(next),
                        None => ControlFlow::GoTo(StepId::new()),
                    },
                    Some(false) => match self.next_after(step, false) {
                        Some(next) => ControlFlow::GoTo(next),
                        None => ControlFlow::Failed,
                    },
                    None => ControlFlow::Cancelled,
                }
            }
            Step::Condition { .. } => {
                self.record_condition_step(step);
                match self.next_after(step, true) {
                    Some(next) => ControlFlow::GoTo(next),
                    None => ControlFlow::GoTo(StepId::new()),
                }
            }
            Step::Loop { .. } | Step::Group { .. } => match self.run_container(step).await {
                ChildOutcome::Continue => match self.sequential_next(step) {
                    Some(next) => ControlFlow::GoTo(next),
                    None => ControlFlow::GoTo(StepId::new()),
                },
                ChildOutcome::Redirect(next) => ControlFlow::GoTo(next),
                ChildOutcome::Failed => ControlFlow::Failed,
                ChildOutcome::Cancelled => ControlFlow::Cancelled,
            },
        }
    }

    fn record_skip(&mut self, step: &Step) {
        let loop_snapshot = self.context.read().loop_stacks.snapshot();
        let mut result = StepResult::new(step.id().clone(), StepRunStatus::Skipped).finish(StepRunStatus::Skipped);
        result.loop_snapshot = loop_snapshot;
        self.context.write().record_result(result.clone());
        self.events.publish(RunEvent::StepFinished(result));
    }

    fn record_condition_step(&mut self, step: &Step) {
        let loop_snapshot = self.context.read().loop_stacks.snapshot();
        self.events.publish(RunEvent::StepStarted {
            step_id: step.id().clone(),
            loop_stack: loop_snapshot.clone(),
        });
        let mut result = StepResult::new(step.id().clone(), StepRunStatus::Success).finish(StepRunStatus::Success);
        result.loop_snapshot = loop_snapshot;
        self.context.write().record_result(result.clone());
        self.events.publish(RunEvent::StepFinished(result));
    }

    /// Runs a `RequestStep` honoring its execution mode, delay, and
    /// retry policy. Returns `Some(true)`/`Some(false)` for
    /// success/failure, `None` if cancelled mid-execution.
    async fn run_request_step(&mut self, step: &Step) -> Option<bool> {
        let Step::Request { id, data, .. } = step else {
            unreachable!("run_request_step called with non-request step");
        };

        let mode = self.effective_mode(step);
        if mode == ExecutionMode::Bypass {
            self.record_skip(step);
            return Some(true);
        }

        if mode == ExecutionMode::Manual {
            match self.wait_for_manual_decision(id).await {
                None => return None,
                Some(ManualDecision::Cancel) => return None,
                Some(ManualDecision::Skip) => {
                    self.record_skip(step);
                    return Some(true);
                }
                Some(ManualDecision::Execute) => {}
            }
        } else if mode == ExecutionMode::Delayed {
            if let Some(delay_ms) = step.delay_ms() {
                if self.sleep_interruptible(Duration::from_millis(delay_ms)).await {
                    return None;
                }
            }
        }

        let loop_snapshot = self.context.read().loop_stacks.snapshot();
        self.events.publish(RunEvent::StepStarted {
            step_id: id.clone(),
            loop_stack: loop_snapshot.clone(),
        });
        let mut result = StepResult::new(id.clone(), StepRunStatus::Running);

        let server = self.scenario.server(&data.server_id).cloned();
        let Some(server) = server else {
            result = result.finish(StepRunStatus::Failed);
            result.error = Some(RecordedError {
                kind: "graph".to_string(),
                message: format!("step '{id}' references unknown server '{}'", data.server_id),
            });
            result.loop_snapshot = loop_snapshot;
            self.context.write().record_result(result.clone());
            self.events.publish(RunEvent::StepFinished(result));
            return Some(false);
        };

        let retry = data.retry.clone().unwrap_or(crate::model::RetryConfig {
            max_retries: 0,
            retry_delay_ms: 0,
            retry_on: Vec::new(),
        });

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let bindings = self.context.read().bindings();
            let request = build_dispatch_request(&server, data, &bindings);

            let outcome = self.dispatcher.dispatch(request.clone()).await;
            let retryable = outcome.is_retryable_status(&retry.retry_on)
                || matches!(&outcome, DispatchOutcome::Failure(_) if retry.retries_network_errors());

            match outcome {
                DispatchOutcome::Response(response) => {
                    let succeeded = response.status < 400;
                    if !succeeded && retryable && attempt <= retry.max_retries {
                        if self.sleep_interruptible(Duration::from_millis(retry.retry_delay_ms)).await {
                            return None;
                        }
                        continue;
                    }

                    result.request = Some(RequestOutcome::from_dispatch(&request, &response, attempt));
                    if data.save_response {
                        let key = data.response_alias.clone().unwrap_or_else(|| id.clone());
                        self.context.write().save_response(key, response.data.clone());
                    }
                    result = result.finish(if succeeded { StepRunStatus::Success } else { StepRunStatus::Failed });
                    if !succeeded {
                        result.error = Some(RecordedError {
                            kind: "httpStatus".to_string(),
                            message: format!("received status {}", response.status),
                        });
                    }
                    result.loop_snapshot = loop_snapshot;
                    self.context.write().record_result(result.clone());
                    self.events.publish(RunEvent::StepFinished(result));
                    return Some(succeeded);
                }
                DispatchOutcome::Failure(failure) => {
                    if retryable && attempt <= retry.max_retries {
                        if self.sleep_interruptible(Duration::from_millis(retry.retry_delay_ms)).await {
                            return None;
                        }
                        continue;
                    }
                    result.error = Some(RecordedError {
                        kind: "dispatch".to_string(),
                        message: failure.message,
                    });
                    result = result.finish(StepRunStatus::Failed);
                    result.loop_snapshot = loop_snapshot;
                    self.context.write().record_result(result.clone());
                    self.events.publish(RunEvent::StepFinished(result));
                    return Some(false);
                }
            }
        }
    }

    /// Runs a `LoopStep`/`GroupStep`'s body and returns the
    /// container-level outcome, also recording the container's own
    /// `StepResult`.
    async fn run_container(&mut self, step: &Step) -> ChildOutcome {
        let outcome = match step {
            Step::Loop { .. } => self.run_loop_body(step).await,
            Step::Group { data, .. } => self.run_children(&data.step_ids).await,
            _ => unreachable!("run_container called with non-container step"),
        };

        let status = match &outcome {
            ChildOutcome::Continue | ChildOutcome::Redirect(_) => StepRunStatus::Success,
            ChildOutcome::Failed => StepRunStatus::Failed,
            ChildOutcome::Cancelled => StepRunStatus::Cancelled,
        };
        let mut result = StepResult::new(step.id().clone(), status).finish(status);
        result.loop_snapshot = self.context.read().loop_stacks.snapshot();
        self.context.write().record_result(result.clone());
        self.events.publish(RunEvent::StepFinished(result));

        outcome
    }

    async fn run_loop_body(&mut self, step: &Step) -> ChildOutcome {
        let Step::Loop { id, data, .. } = step else {
            unreachable!("run_loop_body called with non-loop step");
        };

        let entry_bindings = self.context.read().bindings();
        let mut driver = match loop_driver::build_driver(&data.loop_descriptor, &entry_bindings) {
            Ok(d) => d,
            Err(err) => {
                self.log(LogLevel::Error, err.to_string(), Some(id));
                return ChildOutcome::Failed;
            }
        };
        let total = driver.total();

        self.context.write().loop_stacks.push(LoopFrame {
            loop_id: id.clone(),
            current_index: 0,
            current_item: None,
            total_iterations: total,
        });
        let snapshot = self.context.read().loop_stacks.snapshot();
        if let Some(top) = snapshot.last() {
            self.events.publish(RunEvent::LoopEntered(top.clone()));
        }

        let result = loop {
            if self.drain_cancel() {
                break ChildOutcome::Cancelled;
            }
            let bindings = self.context.read().bindings();
            let iteration = match driver.next(id, &bindings) {
                Ok(Some(it)) => it,
                Ok(None) => break ChildOutcome::Continue,
                Err(ScenarioError::LoopSafetyAbort { max_iterations, .. }) => {
                    self.log(
                        LogLevel::Error,
                        format!("loop '{id}' aborted after {max_iterations} iterations (safety cap)"),
                        Some(id),
                    );
                    break ChildOutcome::Failed;
                }
                Err(_) => break ChildOutcome::Failed,
            };

            self.context.write().loop_stacks.update_top(iteration.index, iteration.item.clone());
            self.context.write().push_alias_frame(iteration.aliases.clone());
            self.events.publish(RunEvent::LoopIterationAdvanced {
                step_id: id.clone(),
                iteration: iteration.index,
            });

            let body_outcome = self.run_children(&data.step_ids).await;
            self.context.write().pop_alias_frame();

            match body_outcome {
                ChildOutcome::Continue => continue,
                other => break other,
            }
        };

        self.context.write().loop_stacks.pop();
        self.events.publish(RunEvent::LoopExited { step_id: id.clone() });
        result
    }

    /// Runs a container's children in declared order. A child's own
    /// branch firing escapes the container (`Redirect`); an unhandled
    /// failure in a child propagates out of the loop/group unless a
    /// branch redirects it first.
    async fn run_children(&mut self, step_ids: &[StepId]) -> ChildOutcome {
        for child_id in step_ids {
            if self.drain_cancel() {
                return ChildOutcome::Cancelled;
            }
            let Some(child) = self.scenario.step(child_id).cloned() else {
                self.log(LogLevel::Error, format!("child step '{child_id}' not found"), None);
                return ChildOutcome::Failed;
            };

            if !self.gate_passes(&child) {
                self.record_skip(&child);
                if let Some(branches) = child.branches() {
                    if let Some(next) = self.branch_next(branches) {
                        return ChildOutcome::Redirect(next);
                    }
                }
                continue;
            }

            match &child {
                Step::Request { .. } => match self.run_request_step(&child).await {
                    None => return ChildOutcome::Cancelled,
                    Some(succeeded) => {
                        if let Some(branches) = child.branches() {
                            if let Some(next) = self.branch_next(branches) {
                                return ChildOutcome::Redirect(next);
                            }
                        }
                        if !succeeded {
                            return ChildOutcome::Failed;
                        }
                    }
                },
                Step::Condition { .. } => {
                    self.record_condition_step(&child);
                    if let Some(branches) = child.branches() {
                        if let Some(next) = self.branch_next(branches) {
                            return ChildOutcome::Redirect(next);
                        }
                    }
                }
                Step::Loop { .. } | Step::Group { .. } => match self.run_container(&child).await {
                    ChildOutcome::Continue => {}
                    other => return other,
                },
            }
        }
        ChildOutcome::Continue
    }
}

/// Resolves a `RequestStep`'s server, endpoint, headers, query params,
/// and body against the current bindings, producing a fully-resolved
/// [`DispatchRequest`]. No `${...}` survives past this point.
fn build_dispatch_request(server: &crate::model::Server, data: &crate::model::RequestStepData, bindings: &Bindings) -> DispatchRequest {
    let mut url = format!(
        "{}{}",
        server.base_url.trim_end_matches('/'),
        resolve_string(&data.endpoint, bindings)
    );

    let query: Vec<String> = data
        .query_params
        .iter()
        .filter(|h| h.enabled)
        .map(|h| format!("{}={}", h.key, resolve_string(&h.value, bindings)))
        .collect();
    if !query.is_empty() {
        url.push_str(if url.contains('?') { "&" } else { "?" });
        url.push_str(&query.join("&"));
    }

    let mut headers = HashMap::new();
    for h in server.default_headers.iter().filter(|h| h.enabled) {
        headers.insert(h.key.clone(), resolve_string(&h.value, bindings));
    }
    for h in data.headers.iter().filter(|h| h.enabled) {
        headers.insert(h.key.clone(), resolve_string(&h.value, bindings));
    }

    let body = data.body.as_ref().map(|b| resolve_value(b, bindings));
    let timeout_ms = data.timeout_ms.unwrap_or(server.default_timeout_ms);

    DispatchRequest {
        url,
        method: data.method,
        headers,
        body,
        timeout_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedDispatcher {
        calls: AtomicUsize,
        responses: Vec<DispatchOutcome>,
    }

    #[async_trait]
    impl Dispatcher for ScriptedDispatcher {
        async fn dispatch(&self, _request: DispatchRequest) -> DispatchOutcome {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.get(i).cloned().unwrap_or_else(|| self.responses.last().unwrap().clone())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn server() -> Server {
        Server {
            id: "s1".into(),
            name: "s1".into(),
            base_url: "https://example.test".into(),
            default_headers: vec![],
            default_timeout_ms: 5000,
        }
    }

    fn request_step(id: &str, branches: Vec<Branch>) -> Step {
        Step::Request {
            id: id.to_string(),
            name: id.to_string(),
            execution_mode: ExecutionMode::Auto,
            delay_ms: None,
            condition: None,
            position: Position { x: 0.0, y: 0.0 },
            data: RequestStepData {
                server_id: "s1".into(),
                method: HttpMethod::Get,
                endpoint: "/ping".into(),
                headers: vec![],
                body: None,
                query_params: vec![],
                wait_for_response: true,
                save_response: false,
                response_alias: None,
                timeout_ms: None,
                branches,
                retry: None,
            },
        }
    }

    fn ok_response() -> DispatchOutcome {
        DispatchOutcome::Response(crate::dispatcher::DispatchResponse {
            status: 200,
            status_text: "OK".into(),
            headers: HashMap::new(),
            data: json!({"ok": true}),
            duration_ms: 1,
        })
    }

    fn scenario_with(steps: Vec<Step>, edges: Vec<Edge>, start: &str) -> Scenario {
        Scenario {
            id: "scn".into(),
            name: "scn".into(),
            version: "1".into(),
            server_ids: vec!["s1".into()],
            servers: vec![server()],
            parameter_schema: vec![],
            steps,
            edges,
            start_step_id: start.into(),
        }
    }

    #[tokio::test]
    async fn linear_two_step_scenario_completes() {
        let scn = scenario_with(
            vec![request_step("a", vec![]), request_step("b", vec![])],
            vec![Edge {
                id: "e1".into(),
                source_step_id: "a".into(),
                target_step_id: "b".into(),
                source_handle: None,
            }],
            "a",
        );
        let dispatcher = Arc::new(ScriptedDispatcher {
            calls: AtomicUsize::new(0),
            responses: vec![ok_response(), ok_response()],
        });
        let scheduler = Scheduler::new(dispatcher);
        let mut handle = scheduler.run(scn, json!({}), HashMap::new()).unwrap();
        let ctx = handle.join().await;
        assert_eq!(ctx.status, RunStatus::Completed);
        assert_eq!(ctx.step_results.len(), 2);
    }

    #[tokio::test]
    async fn failed_request_without_matching_branch_fails_run() {
        let scn = scenario_with(vec![request_step("a", vec![])], vec![], "a");
        let dispatcher = Arc::new(ScriptedDispatcher {
            calls: AtomicUsize::new(0),
            responses: vec![DispatchOutcome::Response(crate::dispatcher::DispatchResponse {
                status: 500,
                status_text: "Internal Server Error".into(),
                headers: HashMap::new(),
                data: json!({}),
                duration_ms: 1,
            })],
        });
        let scheduler = Scheduler::new(dispatcher);
        let mut handle = scheduler.run(scn, json!({}), HashMap::new()).unwrap();
        let ctx = handle.join().await;
        assert_eq!(ctx.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn bypass_mode_skips_dispatch() {
        let mut step = request_step("a", vec![]);
        if let Step::Request { execution_mode, .. } = &mut step {
            *execution_mode = ExecutionMode::Bypass;
        }
        let scn = scenario_with(vec![step], vec![], "a");
        let dispatcher = Arc::new(ScriptedDispatcher {
            calls: AtomicUsize::new(0),
            responses: vec![],
        });
        let scheduler = Scheduler::new(dispatcher.clone());
        let mut handle = scheduler.run(scn, json!({}), HashMap::new()).unwrap();
        let ctx = handle.join().await;
        assert_eq!(ctx.status, RunStatus::Completed);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.step_results["a"].status, StepRunStatus::Skipped);
    }

    #[tokio::test]
    async fn cancel_during_run_marks_run_cancelled() {
        let scn = scenario_with(vec![request_step("a", vec![])], vec![], "a");
        let dispatcher = Arc::new(ScriptedDispatcher {
            calls: AtomicUsize::new(0),
            responses: vec![ok_response()],
        });
        let scheduler = Scheduler::new(dispatcher);
        let handle = scheduler.run(scn, json!({}), HashMap::new()).unwrap();
        handle.cancel().await.unwrap();
        let mut handle = handle;
        let ctx = handle.join().await;
        assert!(matches!(ctx.status, RunStatus::Cancelled | RunStatus::Completed));
    }

    #[tokio::test]
    async fn loop_executes_children_once_per_iteration() {
        let loop_step = Step::Loop {
            id: "loop1".into(),
            name: "loop1".into(),
            execution_mode: ExecutionMode::Auto,
            delay_ms: None,
            condition: None,
            position: Position { x: 0.0, y: 0.0 },
            data: LoopStepData {
                loop_descriptor: LoopDescriptor::Count {
                    count: "3".into(),
                    index_alias: "i".into(),
                },
                step_ids: vec!["child".into()],
            },
        };
        let scn = scenario_with(vec![loop_step, request_step("child", vec![])], vec![], "loop1");
        let dispatcher = Arc::new(ScriptedDispatcher {
            calls: AtomicUsize::new(0),
            responses: vec![ok_response()],
        });
        let scheduler = Scheduler::new(dispatcher.clone());
        let mut handle = scheduler.run(scn, json!({}), HashMap::new()).unwrap();
        let ctx = handle.join().await;
        assert_eq!(ctx.status, RunStatus::Completed);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 3);
    }
}
