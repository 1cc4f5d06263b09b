use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::agent_engine::state::{AgentPhase, RunStatus, StepStatus};

const CHANNEL_CAPACITY: usize = 256;

/// Progress of a run, published in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        intent: String,
        timestamp: DateTime<Utc>,
    },
    PlanReady {
        run_id: String,
        revision: u32,
        steps: Vec<String>,
        expected_outcome: Option<String>,
    },
    PhaseChanged {
        run_id: String,
        from: AgentPhase,
        to: AgentPhase,
    },
    StepStarted {
        run_id: String,
        step_number: u32,
        tool_name: String,
        attempt: u32,
    },
    #[serde(rename_all = "camelCase")]
    StepFinished {
        run_id: String,
        step_number: u32,
        status: StepStatus,
        tool_name: String,
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
        success: bool,
    },
}

/// Fan-out of run events. Publishing never blocks; slow subscribers lag.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: RunEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
