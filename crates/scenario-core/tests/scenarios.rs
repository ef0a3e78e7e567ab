// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenario tests driving the public `Scheduler` the way a
//! caller (the CLI, or any future UI) would, rather than reaching into
//! the runner's internals as the unit tests in `scheduler.rs` do.

use async_trait::async_trait;
use parking_lot::Mutex;
use scenario_core::condition::{Condition, ConditionExpression, ConditionSource, Operator};
use scenario_core::dispatcher::{DispatchFailure, DispatchOutcome, DispatchRequest, DispatchResponse, Dispatcher};
use scenario_core::model::*;
use scenario_core::{RunStatus, Scheduler, StepRunStatus};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Records every request it sees and answers from a fixed, possibly
/// repeating, script of outcomes keyed only by call order (sufficient
/// for these scenarios, none of which branch dispatch behavior on the
/// request itself).
struct RecordingDispatcher {
    script: Vec<DispatchOutcome>,
    calls: Mutex<Vec<DispatchRequest>>,
}

impl RecordingDispatcher {
    fn new(script: Vec<DispatchOutcome>) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<DispatchRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> DispatchOutcome {
        let mut calls = self.calls.lock();
        let i = calls.len();
        calls.push(request);
        self.script.get(i).cloned().unwrap_or_else(|| self.script.last().unwrap().clone())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn response(status: u16, data: serde_json::Value) -> DispatchOutcome {
    DispatchOutcome::Response(DispatchResponse {
        status,
        status_text: String::new(),
        headers: HashMap::new(),
        data,
        duration_ms: 1,
    })
}

fn server() -> Server {
    Server {
        id: "s1".into(),
        name: "primary".into(),
        base_url: "https://h".into(),
        default_headers: vec![],
        default_timeout_ms: 5000,
    }
}

fn scenario_with(steps: Vec<Step>, edges: Vec<Edge>, start: &str, params: Vec<ParameterSchema>) -> Scenario {
    Scenario {
        id: "scn".into(),
        name: "scn".into(),
        version: "1".into(),
        server_ids: vec!["s1".into()],
        servers: vec![server()],
        parameter_schema: params,
        steps,
        edges,
        start_step_id: start.into(),
    }
}

fn edge(id: &str, from: &str, to: &str) -> Edge {
    Edge {
        id: id.into(),
        source_step_id: from.into(),
        target_step_id: to.into(),
        source_handle: None,
    }
}

/// One RequestStep GET `https://h/u/${params.id}` with `params.id = 7`.
/// The dispatcher returns `{status:200, data:{name:"Ann"}}`. Expect a
/// successful step whose saved response lands under its alias.
#[tokio::test]
async fn get_request_interpolates_params_and_saves_aliased_response() {
    let step = Step::Request {
        id: "fetch_user".into(),
        name: "fetch_user".into(),
        execution_mode: ExecutionMode::Auto,
        delay_ms: None,
        condition: None,
        position: Position { x: 0.0, y: 0.0 },
        data: RequestStepData {
            server_id: "s1".into(),
            method: HttpMethod::Get,
            endpoint: "/u/${params.id}".into(),
            headers: vec![],
            body: None,
            query_params: vec![],
            wait_for_response: true,
            save_response: true,
            response_alias: Some("user".into()),
            timeout_ms: None,
            branches: vec![],
            retry: None,
        },
    };
    let scn = scenario_with(vec![step], vec![], "fetch_user", vec![]);
    let dispatcher = Arc::new(RecordingDispatcher::new(vec![response(200, json!({"name": "Ann"}))]));
    let scheduler = Scheduler::new(dispatcher.clone());
    let mut handle = scheduler.run(scn, json!({"id": 7}), HashMap::new()).unwrap();
    let ctx = handle.join().await;

    assert_eq!(ctx.status, RunStatus::Completed);
    let result = &ctx.step_results["fetch_user"];
    assert_eq!(result.status, StepRunStatus::Success);
    assert_eq!(result.request.as_ref().unwrap().data.as_ref().unwrap()["name"], "Ann");
    assert_eq!(ctx.responses["user"]["name"], "Ann");
    assert_eq!(dispatcher.calls()[0].url, "https://h/u/7");
}

/// Step 1 returns a long name, step 2 is a ConditionStep branching on
/// whether that name contains "Great". Expect `step_posts` to run and
/// `step_todos` to never start.
#[tokio::test]
async fn condition_step_branches_on_response_content() {
    let step1 = Step::Request {
        id: "step1".into(),
        name: "step1".into(),
        execution_mode: ExecutionMode::Auto,
        delay_ms: None,
        condition: None,
        position: Position { x: 0.0, y: 0.0 },
        data: RequestStepData {
            server_id: "s1".into(),
            method: HttpMethod::Get,
            endpoint: "/who".into(),
            headers: vec![],
            body: None,
            query_params: vec![],
            wait_for_response: true,
            save_response: true,
            response_alias: Some("step1".into()),
            timeout_ms: None,
            branches: vec![],
            retry: None,
        },
    };
    let condition_step = Step::Condition {
        id: "gate".into(),
        name: "gate".into(),
        execution_mode: ExecutionMode::Auto,
        delay_ms: None,
        condition: None,
        position: Position { x: 0.0, y: 0.0 },
        data: ConditionStepData {
            branches: vec![
                Branch {
                    id: "b1".into(),
                    condition: Some(ConditionExpression::Single(Condition {
                        source: ConditionSource::Response,
                        step_id: Some("step1".into()),
                        field: "name".into(),
                        operator: Operator::Contains,
                        value: Some(json!("Great")),
                    })),
                    is_default: false,
                    next_step_id: "step_posts".into(),
                    label: None,
                },
                Branch {
                    id: "b2".into(),
                    condition: None,
                    is_default: true,
                    next_step_id: "step_todos".into(),
                    label: None,
                },
            ],
        },
    };
    let step_posts = request_leaf("step_posts");
    let step_todos = request_leaf("step_todos");

    let scn = scenario_with(
        vec![step1, condition_step, step_posts, step_todos],
        vec![edge("e1", "step1", "gate")],
        "step1",
        vec![],
    );
    let dispatcher = Arc::new(RecordingDispatcher::new(vec![
        response(200, json!({"name": "Alexander the Great"})),
        response(200, json!({})),
    ]));
    let scheduler = Scheduler::new(dispatcher);
    let mut handle = scheduler.run(scn, json!({}), HashMap::new()).unwrap();
    let ctx = handle.join().await;

    assert_eq!(ctx.status, RunStatus::Completed);
    assert!(ctx.step_results.contains_key("step_posts"));
    assert!(!ctx.step_results.contains_key("step_todos"));
}

fn request_leaf(id: &str) -> Step {
    Step::Request {
        id: id.into(),
        name: id.into(),
        execution_mode: ExecutionMode::Auto,
        delay_ms: None,
        condition: None,
        position: Position { x: 0.0, y: 0.0 },
        data: RequestStepData {
            server_id: "s1".into(),
            method: HttpMethod::Get,
            endpoint: format!("/{id}"),
            headers: vec![],
            body: None,
            query_params: vec![],
            wait_for_response: true,
            save_response: false,
            response_alias: None,
            timeout_ms: None,
            branches: vec![],
            retry: None,
        },
    }
}

/// forEach over `params.list` with `countField:"count"`, dispatching a
/// child POST per repeat. Expect 6 dispatches with userIds
/// `[1,1,2,2,2,3]` and iters `[0,1,2,3,4,5]`.
#[tokio::test]
async fn foreach_loop_count_field_repeats_items_in_order() {
    let loop_step = Step::Loop {
        id: "loop1".into(),
        name: "loop1".into(),
        execution_mode: ExecutionMode::Auto,
        delay_ms: None,
        condition: None,
        position: Position { x: 0.0, y: 0.0 },
        data: LoopStepData {
            loop_descriptor: LoopDescriptor::ForEach {
                source: "params.list".into(),
                item_alias: "item".into(),
                index_alias: Some("index".into()),
                count_field: Some("count".into()),
                max_iterations: None,
            },
            step_ids: vec!["child".into()],
        },
    };
    let child = Step::Request {
        id: "child".into(),
        name: "child".into(),
        execution_mode: ExecutionMode::Auto,
        delay_ms: None,
        condition: None,
        position: Position { x: 0.0, y: 0.0 },
        data: RequestStepData {
            server_id: "s1".into(),
            method: HttpMethod::Post,
            endpoint: "/events".into(),
            headers: vec![],
            body: Some(json!({"userId": "${loop.item.id}", "iter": "${loop.index}"})),
            query_params: vec![],
            wait_for_response: true,
            save_response: false,
            response_alias: None,
            timeout_ms: None,
            branches: vec![],
            retry: None,
        },
    };
    let scn = scenario_with(vec![loop_step, child], vec![], "loop1", vec![]);
    let dispatcher = Arc::new(RecordingDispatcher::new(vec![response(200, json!({}))]));
    let scheduler = Scheduler::new(dispatcher.clone());
    let params = json!({"list": [
        {"id": 1, "count": 2},
        {"id": 2, "count": 3},
        {"id": 3, "count": 1},
    ]});
    let mut handle = scheduler.run(scn, params, HashMap::new()).unwrap();
    let ctx = handle.join().await;

    assert_eq!(ctx.status, RunStatus::Completed);
    let calls = dispatcher.calls();
    assert_eq!(calls.len(), 6);
    let user_ids: Vec<i64> = calls.iter().map(|c| c.body.as_ref().unwrap()["userId"].as_i64().unwrap()).collect();
    let iters: Vec<i64> = calls.iter().map(|c| c.body.as_ref().unwrap()["iter"].as_i64().unwrap()).collect();
    assert_eq!(user_ids, vec![1, 1, 2, 2, 2, 3]);
    assert_eq!(iters, vec![0, 1, 2, 3, 4, 5]);
}

/// A ManualStep pauses the run; resuming with `{skip:true}` records
/// the step skipped and advances without dispatch.
#[tokio::test]
async fn manual_gate_pause_then_resume_with_skip() {
    let mut step = request_leaf("manual_step");
    if let Step::Request { execution_mode, .. } = &mut step {
        *execution_mode = ExecutionMode::Manual;
    }
    let scn = scenario_with(vec![step], vec![], "manual_step", vec![]);
    let dispatcher = Arc::new(RecordingDispatcher::new(vec![response(200, json!({}))]));
    let scheduler = Scheduler::new(dispatcher.clone());
    let handle = scheduler.run(scn, json!({}), HashMap::new()).unwrap();

    let mut events = handle.subscribe();
    let gate = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match events.recv().await.unwrap() {
                scenario_core::RunEvent::ManualGateReached { step_id } => return step_id,
                _ => continue,
            }
        }
    })
    .await
    .expect("manual gate was never reached");
    assert_eq!(gate, "manual_step");

    handle.resume(Some(scenario_core::ManualDecision::Skip)).await.unwrap();
    let mut handle = handle;
    let ctx = handle.join().await;

    assert_eq!(ctx.status, RunStatus::Completed);
    assert_eq!(ctx.step_results["manual_step"].status, StepRunStatus::Skipped);
    assert_eq!(dispatcher.calls().len(), 0);
}

/// Retry policy `{maxRetries:2, retryDelayMs:10, retryOn:[503]}`,
/// dispatcher answers `503,503,200`. Expect exactly three dispatches,
/// the run succeeds, and the recorded result is the final (200)
/// response only.
#[tokio::test]
async fn retry_policy_retries_until_success() {
    let step = Step::Request {
        id: "flaky".into(),
        name: "flaky".into(),
        execution_mode: ExecutionMode::Auto,
        delay_ms: None,
        condition: None,
        position: Position { x: 0.0, y: 0.0 },
        data: RequestStepData {
            server_id: "s1".into(),
            method: HttpMethod::Get,
            endpoint: "/flaky".into(),
            headers: vec![],
            body: None,
            query_params: vec![],
            wait_for_response: true,
            save_response: false,
            response_alias: None,
            timeout_ms: None,
            branches: vec![],
            retry: Some(RetryConfig {
                max_retries: 2,
                retry_delay_ms: 10,
                retry_on: vec![503],
            }),
        },
    };
    let scn = scenario_with(vec![step], vec![], "flaky", vec![]);
    let dispatcher = Arc::new(RecordingDispatcher::new(vec![
        response(503, json!({})),
        response(503, json!({})),
        response(200, json!({"ok": true})),
    ]));
    let scheduler = Scheduler::new(dispatcher.clone());
    let mut handle = scheduler.run(scn, json!({}), HashMap::new()).unwrap();
    let ctx = handle.join().await;

    assert_eq!(ctx.status, RunStatus::Completed);
    assert_eq!(dispatcher.calls().len(), 3);
    let result = &ctx.step_results["flaky"];
    assert_eq!(result.status, StepRunStatus::Success);
    let request = result.request.as_ref().unwrap();
    assert_eq!(request.attempt, 3);
    assert_eq!(request.status, Some(200));
}

/// `cancel()` invoked during a 2000ms delayed step. Expect the step
/// and run to end cancelled, with no dispatch ever issued.
#[tokio::test]
async fn cancel_during_delayed_step_aborts_the_timer() {
    let mut step = request_leaf("slow");
    if let Step::Request { execution_mode, delay_ms, .. } = &mut step {
        *execution_mode = ExecutionMode::Delayed;
        *delay_ms = Some(2000);
    }
    let scn = scenario_with(vec![step], vec![], "slow", vec![]);
    let dispatcher = Arc::new(RecordingDispatcher::new(vec![response(200, json!({}))]));
    let scheduler = Scheduler::new(dispatcher.clone());
    let handle = scheduler.run(scn, json!({}), HashMap::new()).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel().await.unwrap();

    let mut handle = handle;
    let ctx = tokio::time::timeout(Duration::from_secs(1), handle.join())
        .await
        .expect("run did not abort its delay promptly after cancel");

    assert_eq!(ctx.status, RunStatus::Cancelled);
    assert_eq!(dispatcher.calls().len(), 0);
}
