use serde::Serialize;
use tokio::sync::broadcast;

use crate::call::ToolErrorKind;

/// Dispatch progress, for UI consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    CallStarted {
        call_id: String,
        tool: String,
    },
    CallFinished {
        call_id: String,
        tool: String,
        success: bool,
        error_kind: Option<ToolErrorKind>,
        duration_ms: u64,
    },
    CallBlocked {
        call_id: String,
        tool: String,
        hook_id: String,
        message: String,
    },
}

impl DispatchEvent {
    pub fn call_id(&self) -> &str {
        match self {
            DispatchEvent::CallStarted { call_id, .. }
            | DispatchEvent::CallFinished { call_id, .. }
            | DispatchEvent::CallBlocked { call_id, .. } => call_id,
        }
    }
}

/// Fan-out of dispatch events. Sending with no subscribers is not an error.
#[derive(Clone)]
pub struct ProgressHub {
    tx: broadcast::Sender<DispatchEvent>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: DispatchEvent) {
        // lagging or absent receivers are their own problem
        let _ = self.tx.send(event);
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(256)
    }
}
