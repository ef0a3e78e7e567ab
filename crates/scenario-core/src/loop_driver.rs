// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Loop Driver: iteration state machines for `forEach` (with per-item
//! repeat via `countField`), `count`, and `while`, plus the two
//! parallel stacks (execution + visualisation
//! snapshot) every active loop pushes a frame onto.
//!
//! The driver here is the *iteration state machine* only — it decides
//! what the next `${loop.*}` binding set is and when iteration is
//! done. The Step Scheduler (`scheduler.rs`) owns pushing/popping the
//! stacks around each iteration and invoking child steps, since that
//! requires recursing back into step execution (a loop body step can
//! itself be a loop).

use crate::condition::ConditionExpression;
use crate::error::{Result, ScenarioError};
use crate::model::{LoopDescriptor, StepId};
use crate::resolver::{resolve_string, Bindings};
use serde_json::Value;
use tracing::warn;

/// One push on the execution stack: `{loopId, currentIndex,
/// currentItem, totalIterations}`.
#[derive(Debug, Clone)]
pub struct LoopFrame {
    pub loop_id: StepId,
    pub current_index: u32,
    pub current_item: Option<Value>,
    pub total_iterations: u32,
}

/// The matching UI-friendly snapshot, also copied into each
/// `StepResult` so replayed/post-mortem views can reconstruct nesting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopSnapshot {
    pub step_id: StepId,
    pub current_iteration: u32,
    pub total_iterations: u32,
    pub depth: u32,
}

/// Both stacks, always kept at equal depth with matching
/// `loopId`/`stepId` per frame.
#[derive(Debug, Clone, Default)]
pub struct LoopStacks {
    execution: Vec<LoopFrame>,
    visualisation: Vec<LoopSnapshot>,
}

impl LoopStacks {
    pub fn push(&mut self, frame: LoopFrame) {
        let depth = self.execution.len() as u32;
        self.visualisation.push(LoopSnapshot {
            step_id: frame.loop_id.clone(),
            current_iteration: frame.current_index,
            total_iterations: frame.total_iterations,
            depth,
        });
        self.execution.push(frame);
    }

    pub fn update_top(&mut self, index: u32, item: Option<Value>) {
        if let Some(frame) = self.execution.last_mut() {
            frame.current_index = index;
            frame.current_item = item;
        }
        if let Some(snap) = self.visualisation.last_mut() {
            snap.current_iteration = index;
        }
    }

    pub fn pop(&mut self) {
        self.execution.pop();
        self.visualisation.pop();
    }

    pub fn depth(&self) -> usize {
        debug_assert_eq!(self.execution.len(), self.visualisation.len());
        self.execution.len()
    }

    pub fn snapshot(&self) -> Vec<LoopSnapshot> {
        self.visualisation.clone()
    }

    /// Seeds a `Bindings`'s `loop.*` namespace and any itemAlias/
    /// indexAlias from the top-of-stack frame (the innermost active
    /// loop is always what `${loop.*}` resolves against).
    pub fn seed(&self, bindings: &mut Bindings) {
        bindings.loop_ns.fields.clear();
        if let Some(frame) = self.execution.last() {
            bindings.loop_ns.fields.insert("index".to_string(), Value::from(frame.current_index));
            bindings
                .loop_ns
                .fields
                .insert("total".to_string(), Value::from(frame.total_iterations));
            if let Some(item) = &frame.current_item {
                bindings.loop_ns.fields.insert("item".to_string(), item.clone());
            }
        }
    }
}

/// One produced iteration's `${loop.*}` bindings, prior to being
/// seeded into a `Bindings` via `LoopStacks::seed` and any explicit
/// aliases.
pub struct Iteration {
    pub index: u32,
    pub item: Option<Value>,
    pub aliases: Vec<(String, Value)>,
}

/// Uniform iterator interface every loop type exposes.
pub trait LoopIterator {
    fn total(&self) -> u32;
    fn next(&mut self) -> Option<Iteration>;
}

struct ForEachIterator {
    effective: Vec<Value>,
    item_alias: String,
    index_alias: Option<String>,
    cursor: usize,
}

impl LoopIterator for ForEachIterator {
    fn total(&self) -> u32 {
        self.effective.len() as u32
    }

    fn next(&mut self) -> Option<Iteration> {
        if self.cursor >= self.effective.len() {
            return None;
        }
        let item = self.effective[self.cursor].clone();
        let index = self.cursor as u32;
        self.cursor += 1;
        let mut aliases = vec![(self.item_alias.clone(), item.clone())];
        if let Some(index_alias) = &self.index_alias {
            aliases.push((index_alias.clone(), Value::from(index)));
        }
        Some(Iteration {
            index,
            item: Some(item),
            aliases,
        })
    }
}

struct CountIterator {
    total: u32,
    index_alias: String,
    cursor: u32,
}

impl LoopIterator for CountIterator {
    fn total(&self) -> u32 {
        self.total
    }

    fn next(&mut self) -> Option<Iteration> {
        if self.cursor >= self.total {
            return None;
        }
        let index = self.cursor;
        self.cursor += 1;
        Some(Iteration {
            index,
            item: None,
            aliases: vec![(self.index_alias.clone(), Value::from(index))],
        })
    }
}

struct WhileIterator {
    condition: ConditionExpression,
    max_iterations: u32,
    cursor: u32,
}

impl WhileIterator {
    /// Re-evaluates the condition for the *next* prospective
    /// iteration. Must be called with a `Bindings` that already has
    /// `loop.index` seeded for `self.cursor` (the caller reseeds the
    /// stack between calls via `LoopStacks::update_top`+`seed`).
    fn would_continue(&self, bindings: &Bindings) -> bool {
        self.condition.evaluate(bindings)
    }
}

impl LoopIterator for WhileIterator {
    fn total(&self) -> u32 {
        // Unknown ahead of time; report the safety cap as the nominal
        // upper bound for UI purposes.
        self.max_iterations
    }

    fn next(&mut self) -> Option<Iteration> {
        if self.cursor >= self.max_iterations {
            return None;
        }
        let index = self.cursor;
        self.cursor += 1;
        Some(Iteration {
            index,
            item: None,
            aliases: vec![],
        })
    }
}

/// Owns the three possible loop-iterator shapes so callers can hold
/// one value without `Box<dyn>` churn in the scheduler's hot loop.
pub enum Driver {
    ForEach(ForEachIterator),
    Count(CountIterator),
    While(WhileIterator),
}

impl Driver {
    pub fn total(&self) -> u32 {
        match self {
            Driver::ForEach(d) => d.total(),
            Driver::Count(d) => d.total(),
            Driver::While(d) => d.total(),
        }
    }

    /// Advances to the next iteration. For `while`, `bindings` must
    /// have the *current* (not-yet-advanced) `loop.*` state seeded so
    /// the condition can be re-evaluated against prior-iteration
    /// results; returns `Ok(None)` on normal termination and
    /// `Err(LoopSafetyAbort)` if a `while` loop hits its cap while its
    /// condition is still true.
    pub fn next(&mut self, loop_id: &str, bindings: &Bindings) -> Result<Option<Iteration>> {
        match self {
            Driver::ForEach(d) => Ok(d.next()),
            Driver::Count(d) => Ok(d.next()),
            Driver::While(d) => {
                if d.cursor >= d.max_iterations {
                    if d.would_continue(bindings) {
                        warn!(loop_id, max_iterations = d.max_iterations, "while loop hit safety cap");
                        return Err(ScenarioError::LoopSafetyAbort {
                            step_id: loop_id.to_string(),
                            max_iterations: d.max_iterations,
                        });
                    }
                    return Ok(None);
                }
                if !d.would_continue(bindings) {
                    return Ok(None);
                }
                Ok(d.next())
            }
        }
    }
}

/// Builds the iterator for a loop descriptor, resolving `source`/
/// `count` eagerly against the bindings active at loop entry.
pub fn build_driver(descriptor: &LoopDescriptor, bindings: &Bindings) -> Result<Driver> {
    match descriptor {
        LoopDescriptor::ForEach {
            source,
            item_alias,
            index_alias,
            count_field,
            max_iterations,
        } => {
            let resolved = crate::resolver::resolve_value(&Value::String(format!("${{{source}}}")), bindings);
            let items = match resolved {
                Value::Array(items) => items,
                other => {
                    warn!(source, value = %other, "forEach source did not resolve to an array");
                    Vec::new()
                }
            };

            let mut effective = Vec::new();
            for item in &items {
                let repeat = match count_field {
                    Some(field) => item.get(field).and_then(Value::as_u64).unwrap_or(1) as u32,
                    None => 1,
                };
                for _ in 0..repeat {
                    effective.push(item.clone());
                }
            }
            if let Some(cap) = max_iterations {
                effective.truncate(*cap as usize);
            }

            Ok(Driver::ForEach(ForEachIterator {
                effective,
                item_alias: item_alias.clone(),
                index_alias: index_alias.clone(),
                cursor: 0,
            }))
        }
        LoopDescriptor::Count { count, index_alias } => {
            let resolved_str = resolve_string(&format!("${{{count}}}"), bindings);
            let n = resolved_str
                .parse::<f64>()
                .or_else(|_| count.parse::<f64>())
                .unwrap_or(0.0);
            let total = n.floor().max(0.0) as u32;
            Ok(Driver::Count(CountIterator {
                total,
                index_alias: index_alias.clone(),
                cursor: 0,
            }))
        }
        LoopDescriptor::While {
            condition,
            max_iterations,
        } => Ok(Driver::While(WhileIterator {
            condition: condition.clone(),
            max_iterations: (*max_iterations).max(1),
            cursor: 0,
        })),
    }
}
