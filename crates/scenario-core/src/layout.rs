// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Auto-layout: a pure function over steps+edges producing new
//! `Position` values. Does not modify topology.

use crate::model::{Edge, Position, Scenario, StepId};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    TopBottom,
    LeftRight,
}

const LAYER_SPACING: f64 = 220.0;
const NODE_SPACING: f64 = 140.0;

/// Computes a layered graph layout: each step's layer is its longest
/// path distance from a root (a step with no incoming sequential/
/// branch/body edge), and within a layer, steps are placed in
/// declaration order.
pub fn layered(scenario: &Scenario, direction: Direction) -> HashMap<StepId, Position> {
    let layers = assign_layers(&scenario.steps.iter().map(|s| s.id().clone()).collect::<Vec<_>>(), &scenario.edges);

    let mut by_layer: HashMap<u32, Vec<StepId>> = HashMap::new();
    for step in &scenario.steps {
        let layer = layers.get(step.id()).copied().unwrap_or(0);
        by_layer.entry(layer).or_default().push(step.id().clone());
    }

    let mut positions = HashMap::new();
    for (layer, ids) in by_layer {
        for (i, id) in ids.into_iter().enumerate() {
            let along_axis = layer as f64 * LAYER_SPACING;
            let across_axis = i as f64 * NODE_SPACING;
            let position = match direction {
                Direction::TopBottom => Position {
                    x: across_axis,
                    y: along_axis,
                },
                Direction::LeftRight => Position {
                    x: along_axis,
                    y: across_axis,
                },
            };
            positions.insert(id, position);
        }
    }
    positions
}

fn assign_layers(step_ids: &[StepId], edges: &[Edge]) -> HashMap<StepId, u32> {
    let mut incoming: HashMap<&str, u32> = step_ids.iter().map(|id| (id.as_str(), 0)).collect();
    for edge in edges {
        if let Some(count) = incoming.get_mut(edge.target_step_id.as_str()) {
            *count += 1;
        }
    }

    let mut layers: HashMap<StepId, u32> = HashMap::new();
    let mut queue: VecDeque<&str> = incoming
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    for root in &queue {
        layers.insert(root.to_string(), 0);
    }

    let mut remaining = incoming;
    while let Some(current) = queue.pop_front() {
        let current_layer = *layers.get(current).unwrap_or(&0);
        for edge in edges.iter().filter(|e| e.source_step_id == current) {
            let target = edge.target_step_id.as_str();
            let candidate_layer = current_layer + 1;
            let better = layers
                .get(target)
                .map(|existing| candidate_layer > *existing)
                .unwrap_or(true);
            if better {
                layers.insert(target.to_string(), candidate_layer);
            }
            if let Some(count) = remaining.get_mut(target) {
                if *count > 0 {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(target);
                    }
                }
            }
        }
    }

    for id in step_ids {
        layers.entry(id.clone()).or_insert(0);
    }
    layers
}
