//! Turn records
//!
//! One Turn is a single command-dispatch-and-response exchange: the
//! prompt that triggered it, the ordered events the agent produced, and
//! the extracted outcome. Turns are independent; nothing is shared
//! between consecutive records.

use crate::event::{StreamEvent, TurnErrorKind};

/// Terminal status of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Still streaming
    InFlight,

    /// Final response received
    Completed,

    /// The turn failed; a spoken explanation was produced
    Failed(TurnErrorKind),

    /// Abandoned before completion (shutdown)
    Cancelled,
}

/// Record of one request/response exchange with the agent.
#[derive(Debug, Clone)]
pub struct Turn {
    prompt: String,
    events: Vec<StreamEvent>,
    spoken_text: Option<String>,
    session_id: Option<String>,
    status: TurnStatus,
}

impl Turn {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            events: Vec::new(),
            spoken_text: None,
            session_id: None,
            status: TurnStatus::InFlight,
        }
    }

    /// Record one event, updating the derived outcome fields.
    pub fn record(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::FinalResponse(text) => {
                self.spoken_text = Some(text.clone());
                self.status = TurnStatus::Completed;
            }
            StreamEvent::SessionId(id) => {
                self.session_id = Some(id.clone());
            }
            StreamEvent::Error { kind, message } => {
                self.spoken_text = Some(message.clone());
                self.status = TurnStatus::Failed(*kind);
            }
            _ => {}
        }
        self.events.push(event.clone());
    }

    /// Mark the turn abandoned (process shutdown, cancellation).
    pub fn cancel(&mut self) {
        if self.status == TurnStatus::InFlight {
            self.status = TurnStatus::Cancelled;
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn events(&self) -> &[StreamEvent] {
        &self.events
    }

    /// Extracted spoken response or spoken failure explanation
    pub fn spoken_text(&self) -> Option<&str> {
        self.spoken_text.as_deref()
    }

    /// Continuation identifier returned by this turn, if any
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status != TurnStatus::InFlight
    }
}
