// Copyright (c) 2025 Scenario Runner Team
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observer/Event Bus: publishes immutable state transitions and logs
//! to the UI layer (or any other subscriber). Distinct from `tracing`,
//! which this engine also emits for operational visibility — this is
//! the structured, typed stream a UI or test harness subscribes to
//! instead of scraping logs.

use crate::context::{LogEntry, RunStatus, StepResult};
use crate::loop_driver::LoopSnapshot;
use crate::model::StepId;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStateChanged(RunStatus),
    StepStarted {
        step_id: StepId,
        loop_stack: Vec<LoopSnapshot>,
    },
    StepFinished(StepResult),
    LoopEntered(LoopSnapshot),
    LoopIterationAdvanced {
        step_id: StepId,
        iteration: u32,
    },
    LoopExited {
        step_id: StepId,
    },
    LogEmitted(LogEntry),
    ManualGateReached {
        step_id: StepId,
    },
}

/// A single subscription point receiving events. Backed by
/// `tokio::sync::broadcast` so any number of observers (UI, a replay
/// logger, a test harness) can subscribe independently; publishing
/// never blocks on a slow or absent subscriber.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. A `SendError` (no active receivers) is
    /// expected and silently ignored — observers are optional.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(RunEvent::RunStateChanged(RunStatus::Running));
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, RunEvent::RunStateChanged(RunStatus::Running)));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish(RunEvent::RunStateChanged(RunStatus::Idle));
    }
}
