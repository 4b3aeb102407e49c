//! Run progress events
//!
//! Every status transition a run goes through is reported here as a typed
//! event over an unbounded channel. Sends are best-effort: a slow or
//! dropped observer never affects the run itself.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::orchestrator::RunId;
use crate::step::StepId;

/// Progress events emitted during an orchestration run
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        task: String,
    },
    /// Which readers the decision service picked for context gathering
    ReadersSelected {
        run_id: RunId,
        sources: Vec<String>,
    },
    ReaderFetched {
        run_id: RunId,
        reader: String,
    },
    /// A reader yielded nothing; the run proceeds without it
    ReaderSkipped {
        run_id: RunId,
        reader: String,
        reason: String,
    },
    StepStarted {
        run_id: RunId,
        step_id: StepId,
        operator: String,
    },
    StepCompleted {
        run_id: RunId,
        step_id: StepId,
        operator: String,
    },
    StepFailed {
        run_id: RunId,
        step_id: StepId,
        operator: String,
        error: String,
    },
    ReformatFailed {
        run_id: RunId,
        step_id: StepId,
        operator: String,
        error: String,
    },
    RunFinished {
        run_id: RunId,
        success: bool,
    },
}

/// Emitter side held by the orchestrator
#[derive(Clone)]
pub(crate) struct EventSender {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventSender {
    pub(crate) fn disabled() -> Self {
        Self { tx: None }
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Client-side handle for observing a run's events
#[derive(Clone)]
pub struct RunChannel {
    rx: Arc<parking_lot::Mutex<mpsc::UnboundedReceiver<RunEvent>>>,
}

impl RunChannel {
    /// Create a channel pair
    pub(crate) fn new() -> (Self, EventSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            rx: Arc::new(parking_lot::Mutex::new(rx)),
        };
        (channel, EventSender { tx: Some(tx) })
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Option<RunEvent> {
        self.rx.lock().try_recv().ok()
    }

    /// Receive an event, waiting until one arrives or all senders are gone
    pub async fn recv(&self) -> Option<RunEvent> {
        // Lock only inside the poll so the guard never crosses an await
        futures::future::poll_fn(|cx| self.rx.lock().poll_recv(cx)).await
    }
}
