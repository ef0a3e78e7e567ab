// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graph Model & Sync: the scenario carries two redundant
//! representations of flow topology — the edge list, and per-step
//! `nextStepId`/`stepIds` pointers. This rewrite chooses edges as
//! authoritative; `nextStepId`/`stepIds` are read-derived accessors
//! recomputed by [`normalize`] rather than maintained incrementally,
//! which is what keeps `addEdge`/`deleteEdge`/`deleteStep`/
//! `moveStepToContainer` simple: each mutates `edges` (and `steps` for
//! `deleteStep`) and then calls `normalize` once.

use crate::error::{GraphErrorCode, Result, ScenarioError};
use crate::model::{Edge, Scenario, StepId};
use petgraph::graphmap::DiGraphMap;
use std::collections::HashMap;
use tracing::error;

/// Rebuilds every branch's `nextStepId` and every container's
/// `stepIds` from the authoritative `scenario.edges`, in place. This
/// is the pure normaliser the Design Notes call for: run it after any
/// edge mutation and the derived pointers are guaranteed consistent.
pub fn normalize(scenario: &mut Scenario) {
    let edges = scenario.edges.clone();

    for step in scenario.steps.iter_mut() {
        if let Some(branches) = step.branches_mut() {
            for branch in branches.iter_mut() {
                let handle = Edge::branch_handle(&branch.id);
                branch.next_step_id = edges
                    .iter()
                    .find(|e| e.source_step_id == *step.id() && e.source_handle.as_deref() == Some(handle.as_str()))
                    .map(|e| e.target_step_id.clone())
                    .unwrap_or_default();
            }
        }
        if let Some(step_ids) = step.step_ids_mut() {
            let is_body_handle = |e: &&Edge| e.is_loop_body() || e.is_group_body();
            let mut derived: Vec<StepId> = edges
                .iter()
                .filter(|e| e.source_step_id == *step.id())
                .filter(is_body_handle)
                .map(|e| e.target_step_id.clone())
                .collect();
            derived.dedup();
            *step_ids = derived;
        }
    }
}

/// **addEdge**: appends the edge, then normalizes so the matching
/// branch/container pointer picks it up.
pub fn add_edge(scenario: &mut Scenario, edge: Edge) {
    scenario.edges.push(edge);
    normalize(scenario);
}

/// **deleteEdge**: removes the edge by id, then normalizes so the
/// pointer that materialized it clears.
pub fn delete_edge(scenario: &mut Scenario, edge_id: &str) {
    scenario.edges.retain(|e| e.id != edge_id);
    normalize(scenario);
}

/// **deleteStep**: removes the step, every edge touching it, and
/// reassigns `startStepId` if it pointed at the deleted step. Branch
/// `nextStepId`/container `stepIds` entries referencing it disappear
/// automatically once normalized, because their materializing edges
/// are gone too.
pub fn delete_step(scenario: &mut Scenario, step_id: &str) {
    scenario.steps.retain(|s| s.id() != step_id);
    scenario
        .edges
        .retain(|e| e.source_step_id != step_id && e.target_step_id != step_id);

    if scenario.start_step_id == step_id {
        scenario.start_step_id = scenario
            .steps
            .first()
            .map(|s| s.id().clone())
            .unwrap_or_default();
    }
    normalize(scenario);
}

/// One edge whose relocation would cross a container boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeConflict {
    pub edge_id: String,
    pub direction: ConflictDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDirection {
    /// The edge's source is in the moved set; its target would end up
    /// in a different container.
    Outgoing,
    /// The edge's target is in the moved set; its source would remain
    /// in a different container.
    Incoming,
}

/// Pure function: given the set of step ids about to be relocated to
/// `target_container` (or root, if `None`), finds every edge with
/// exactly one endpoint in the set whose other endpoint will end up in
/// a different container once the move completes.
pub fn detect_edge_conflicts(
    scenario: &Scenario,
    moved: &[StepId],
    target_container: Option<&str>,
) -> Vec<EdgeConflict> {
    let moved_set: std::collections::HashSet<&str> = moved.iter().map(|s| s.as_str()).collect();
    let container_of = container_membership(scenario);

    let other_endpoint_ok = |other: &str| -> bool {
        if moved_set.contains(other) {
            return true;
        }
        container_of.get(other).map(|c| c.as_str()) == target_container
    };

    let mut conflicts = Vec::new();
    for edge in &scenario.edges {
        let src_in = moved_set.contains(edge.source_step_id.as_str());
        let tgt_in = moved_set.contains(edge.target_step_id.as_str());
        if src_in && !tgt_in {
            if !other_endpoint_ok(&edge.target_step_id) {
                conflicts.push(EdgeConflict {
                    edge_id: edge.id.clone(),
                    direction: ConflictDirection::Outgoing,
                });
            }
        } else if tgt_in && !src_in && !other_endpoint_ok(&edge.source_step_id) {
            conflicts.push(EdgeConflict {
                edge_id: edge.id.clone(),
                direction: ConflictDirection::Incoming,
            });
        }
    }
    conflicts
}

fn container_membership(scenario: &Scenario) -> HashMap<StepId, StepId> {
    let mut map = HashMap::new();
    for step in &scenario.steps {
        if let Some(children) = step.step_ids() {
            for child in children {
                map.insert(child.clone(), step.id().clone());
            }
        }
    }
    map
}

/// **moveStepToContainer**: atomic relocation. Removes the moved steps
/// from their source container's `stepIds` (derived, so this just
/// means deleting the `loop-body`/`group-body` edge that put them
/// there), adds a body edge into the target container (or leaves them
/// at root if `target_container` is `None`), and deletes the edges in
/// `edges_to_delete` (typically the conflicts from
/// [`detect_edge_conflicts`]).
pub fn move_step_to_container(
    scenario: &mut Scenario,
    step_id: &str,
    source_container: Option<&str>,
    target_container: Option<&str>,
    edges_to_delete: &[String],
) {
    scenario.edges.retain(|e| !edges_to_delete.contains(&e.id));

    if let Some(source) = source_container {
        scenario.edges.retain(|e| {
            !(e.source_step_id == source
                && e.target_step_id == step_id
                && (e.is_loop_body() || e.is_group_body()))
        });
    }

    if let Some(target) = target_container {
        let handle = if scenario.step(target).map(|s| s.is_container()).unwrap_or(false) {
            body_handle_for(scenario, target)
        } else {
            "group-body".to_string()
        };
        scenario.edges.push(Edge {
            id: format!("e_{}_{}", target, step_id),
            source_step_id: target.to_string(),
            target_step_id: step_id.to_string(),
            source_handle: Some(handle),
        });
    }

    normalize(scenario);
}

fn body_handle_for(scenario: &Scenario, container_id: &str) -> String {
    match scenario.step(container_id) {
        Some(crate::model::Step::Loop { .. }) => "loop-body".to_string(),
        _ => "group-body".to_string(),
    }
}

/// Validates the scenario's graph integrity, building a `petgraph`
/// validation view on demand from the authoritative edge list.
/// Execution order itself is driven by explicit next-pointers/
/// branches, not a topological sort; `petgraph` is used purely for
/// cycle/reachability checks here.
pub fn validate(scenario: &Scenario) -> Result<()> {
    if !scenario.start_step_id.is_empty() && scenario.step(&scenario.start_step_id).is_none() {
        return Err(ScenarioError::Graph {
            code: GraphErrorCode::MissingStartStep,
            message: format!("startStepId '{}' does not name an existing step", scenario.start_step_id),
        });
    }

    for edge in &scenario.edges {
        if scenario.step(&edge.source_step_id).is_none() || scenario.step(&edge.target_step_id).is_none() {
            return Err(ScenarioError::Graph {
                code: GraphErrorCode::DanglingEdge,
                message: format!("edge '{}' references a non-existent step", edge.id),
            });
        }
    }

    for step in &scenario.steps {
        if let Some(branches) = step.branches() {
            for branch in branches {
                if !branch.next_step_id.is_empty() && scenario.step(&branch.next_step_id).is_none() {
                    return Err(ScenarioError::Graph {
                        code: GraphErrorCode::OrphanedBranchReference,
                        message: format!(
                            "branch '{}' on step '{}' targets unknown step '{}'",
                            branch.id,
                            step.id(),
                            branch.next_step_id
                        ),
                    });
                }
            }
        }

        if step.branches().is_none() {
            let sequential: Vec<&Edge> = scenario
                .edges_from(step.id())
                .filter(|e| e.is_sequential())
                .collect();
            if sequential.len() > 1 {
                error!(step_id = %step.id(), count = sequential.len(), "multiple unhandled outgoing edges");
                return Err(ScenarioError::Graph {
                    code: GraphErrorCode::UnhandledOutgoingEdges,
                    message: format!("step '{}' has {} sequential outgoing edges", step.id(), sequential.len()),
                });
            }
        }
    }

    detect_cyclic_containers(scenario)?;
    Ok(())
}

/// A step may appear in at most one container; walking the
/// container-of-container relation (a container step that is itself
/// listed as another container's child) must not cycle.
fn detect_cyclic_containers(scenario: &Scenario) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for step in &scenario.steps {
        graph.add_node(step.id().as_str());
    }
    for step in &scenario.steps {
        if let Some(children) = step.step_ids() {
            for child in children {
                graph.add_edge(step.id().as_str(), child.as_str(), ());
            }
        }
    }
    if petgraph::algo::is_cyclic_directed(&graph) {
        return Err(ScenarioError::Graph {
            code: GraphErrorCode::CyclicContainerNesting,
            message: "container nesting forms a cycle".to_string(),
        });
    }
    Ok(())
}

/// Bounded undo journal capped at 50 snapshots. Only graph-mutating
/// operations (`addEdge`, `deleteEdge`, `deleteStep`,
/// `moveStepToContainer`, and bulk replace) push a snapshot; pure
/// selection/UI state is not journaled (and lives outside this
/// engine entirely).
pub struct UndoJournal {
    capacity: usize,
    past: Vec<Scenario>,
    future: Vec<Scenario>,
}

impl UndoJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            past: Vec::new(),
            future: Vec::new(),
        }
    }

    /// Records `before`, the scenario state immediately prior to a
    /// journaled mutation. Call this before mutating.
    pub fn record(&mut self, before: Scenario) {
        self.future.clear();
        self.past.push(before);
        if self.past.len() > self.capacity {
            self.past.remove(0);
        }
    }

    /// Undoes the last journaled mutation, given the current state
    /// (pushed onto the redo stack). Returns the restored scenario.
    pub fn undo(&mut self, current: Scenario) -> Option<Scenario> {
        let previous = self.past.pop()?;
        self.future.push(current);
        Some(previous)
    }

    pub fn redo(&mut self, current: Scenario) -> Option<Scenario> {
        let next = self.future.pop()?;
        self.past.push(current);
        Some(next)
    }
}

impl Default for UndoJournal {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

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
                endpoint: "/".into(),
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

    fn scenario_with(steps: Vec<Step>, edges: Vec<Edge>) -> Scenario {
        Scenario {
            id: "scn".into(),
            name: "scn".into(),
            version: "1".into(),
            server_ids: vec![],
            servers: vec![],
            parameter_schema: vec![],
            steps,
            edges,
            start_step_id: "a".into(),
        }
    }

    #[test]
    fn add_edge_sets_branch_next_step_id() {
        let branch = Branch {
            id: "b1".into(),
            condition: None,
            is_default: true,
            next_step_id: String::new(),
            label: None,
        };
        let mut scn = scenario_with(
            vec![request_step("a", vec![branch]), request_step("b", vec![])],
            vec![],
        );
        add_edge(
            &mut scn,
            Edge {
                id: "e1".into(),
                source_step_id: "a".into(),
                target_step_id: "b".into(),
                source_handle: Some(Edge::branch_handle("b1")),
            },
        );
        assert_eq!(scn.step("a").unwrap().branches().unwrap()[0].next_step_id, "b");
    }

    #[test]
    fn delete_edge_clears_branch_next_step_id() {
        let branch = Branch {
            id: "b1".into(),
            condition: None,
            is_default: true,
            next_step_id: String::new(),
            label: None,
        };
        let mut scn = scenario_with(
            vec![request_step("a", vec![branch]), request_step("b", vec![])],
            vec![Edge {
                id: "e1".into(),
                source_step_id: "a".into(),
                target_step_id: "b".into(),
                source_handle: Some(Edge::branch_handle("b1")),
            }],
        );
        normalize(&mut scn);
        assert_eq!(scn.step("a").unwrap().branches().unwrap()[0].next_step_id, "b");
        delete_edge(&mut scn, "e1");
        assert_eq!(scn.step("a").unwrap().branches().unwrap()[0].next_step_id, "");
    }

    #[test]
    fn delete_step_leaves_no_dangling_edge_or_pointer() {
        let branch = Branch {
            id: "b1".into(),
            condition: None,
            is_default: true,
            next_step_id: "b".into(),
            label: None,
        };
        let mut scn = scenario_with(
            vec![request_step("a", vec![branch]), request_step("b", vec![])],
            vec![Edge {
                id: "e1".into(),
                source_step_id: "a".into(),
                target_step_id: "b".into(),
                source_handle: Some(Edge::branch_handle("b1")),
            }],
        );
        delete_step(&mut scn, "b");
        assert!(scn.edges.is_empty());
        assert_eq!(scn.step("a").unwrap().branches().unwrap()[0].next_step_id, "");
        assert!(scn.step("b").is_none());
    }

    #[test]
    fn detects_orphaned_branch_reference() {
        let branch = Branch {
            id: "b1".into(),
            condition: None,
            is_default: true,
            next_step_id: "ghost".into(),
            label: None,
        };
        let scn = scenario_with(vec![request_step("a", vec![branch])], vec![]);
        let err = validate(&scn).unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Graph {
                code: GraphErrorCode::OrphanedBranchReference,
                ..
            }
        ));
    }

    #[test]
    fn detects_cyclic_container_nesting() {
        let mut loop_a = Step::Loop {
            id: "la".into(),
            name: "la".into(),
            execution_mode: ExecutionMode::Auto,
            delay_ms: None,
            condition: None,
            position: Position { x: 0.0, y: 0.0 },
            data: LoopStepData {
                loop_descriptor: LoopDescriptor::Count {
                    count: "1".into(),
                    index_alias: "i".into(),
                },
                step_ids: vec!["lb".into()],
            },
        };
        let loop_b = Step::Loop {
            id: "lb".into(),
            name: "lb".into(),
            execution_mode: ExecutionMode::Auto,
            delay_ms: None,
            condition: None,
            position: Position { x: 0.0, y: 0.0 },
            data: LoopStepData {
                loop_descriptor: LoopDescriptor::Count {
                    count: "1".into(),
                    index_alias: "i".into(),
                },
                step_ids: vec!["la".into()],
            },
        };
        if let Step::Loop { data, .. } = &mut loop_a {
            data.step_ids = vec!["lb".into()];
        }
        let mut scn = scenario_with(vec![loop_a, loop_b], vec![]);
        scn.start_step_id = "la".into();
        let err = validate(&scn).unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Graph {
                code: GraphErrorCode::CyclicContainerNesting,
                ..
            }
        ));
    }

    #[test]
    fn move_step_to_container_updates_stepids() {
        let loop_step = Step::Loop {
            id: "loop1".into(),
            name: "loop1".into(),
            execution_mode: ExecutionMode::Auto,
            delay_ms: None,
            condition: None,
            position: Position { x: 0.0, y: 0.0 },
            data: LoopStepData {
                loop_descriptor: LoopDescriptor::Count {
                    count: "1".into(),
                    index_alias: "i".into(),
                },
                step_ids: vec![],
            },
        };
        let mut scn = scenario_with(vec![loop_step, request_step("child", vec![])], vec![]);
        move_step_to_container(&mut scn, "child", None, Some("loop1"), &[]);
        assert_eq!(scn.step("loop1").unwrap().step_ids().unwrap(), &["child".to_string()]);
    }

    #[test]
    fn undo_journal_round_trips() {
        let mut journal = UndoJournal::new(2);
        let v1 = scenario_with(vec![], vec![]);
        let mut v2 = v1.clone();
        v2.name = "renamed".into();
        journal.record(v1.clone());
        let restored = journal.undo(v2.clone()).unwrap();
        assert_eq!(restored.name, v1.name);
        let redone = journal.redo(restored).unwrap();
        assert_eq!(redone.name, v2.name);
    }
}
