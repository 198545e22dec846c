//! Outward events of a turn, in the order the caller receives them.
//!
//! Every call ends with exactly one terminal event: `interrupt`, `done` or
//! `error`.

use serde::{Deserialize, Serialize};

use crate::clarify::ClarificationRequest;
use crate::error::PipelineError;
use crate::stages::TurnOutcome;
use crate::types::Route;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Assistant output produced during the turn.
    MessageDelta { thread_id: String, text: String },
    /// Clarification needed; answer by calling again on the same thread.
    Interrupt {
        thread_id: String,
        message: String,
        options: Vec<Route>,
        original_text: String,
    },
    Done {
        thread_id: String,
        route: Route,
        needs_human_review: bool,
    },
    Error { thread_id: String, message: String },
}

impl TurnEvent {
    pub fn thread_id(&self) -> &str {
        match self {
            TurnEvent::MessageDelta { thread_id, .. }
            | TurnEvent::Interrupt { thread_id, .. }
            | TurnEvent::Done { thread_id, .. }
            | TurnEvent::Error { thread_id, .. } => thread_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnEvent::MessageDelta { .. })
    }

    pub fn interrupt(thread_id: &str, request: ClarificationRequest) -> Self {
        TurnEvent::Interrupt {
            thread_id: thread_id.to_string(),
            message: request.message,
            options: request.options,
            original_text: request.original_text,
        }
    }

    pub fn error(thread_id: &str, error: &PipelineError) -> Self {
        TurnEvent::Error {
            thread_id: thread_id.to_string(),
            message: error.public_message(),
        }
    }

    /// One `message_delta` per reply, then `done`.
    pub fn for_outcome(thread_id: &str, outcome: &TurnOutcome) -> Vec<TurnEvent> {
        let mut events: Vec<TurnEvent> = outcome
            .replies
            .iter()
            .map(|text| TurnEvent::MessageDelta {
                thread_id: thread_id.to_string(),
                text: text.clone(),
            })
            .collect();
        events.push(TurnEvent::Done {
            thread_id: thread_id.to_string(),
            route: outcome.route,
            needs_human_review: outcome.needs_human_review,
        });
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let done = TurnEvent::Done {
            thread_id: "t".to_string(),
            route: Route::Homelab,
            needs_human_review: false,
        };
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"type": "done", "thread_id": "t", "route": "homelab", "needs_human_review": false})
        );

        let interrupt = TurnEvent::interrupt("t", ClarificationRequest::for_text("tell me something"));
        assert_eq!(
            serde_json::to_value(&interrupt).unwrap(),
            json!({
                "type": "interrupt",
                "thread_id": "t",
                "message": "Quick clarification so I route you correctly:",
                "options": ["personal", "projects", "homelab", "general"],
                "original_text": "tell me something"
            })
        );
    }

    #[test]
    fn test_outcome_events_end_with_done() {
        let outcome = TurnOutcome {
            route: Route::Projects,
            needs_human_review: false,
            replies: vec!["first".to_string(), "second".to_string()],
        };
        let events = TurnEvent::for_outcome("t", &outcome);

        assert_eq!(events.len(), 3);
        assert!(!events[0].is_terminal());
        assert!(matches!(&events[1], TurnEvent::MessageDelta { text, .. } if text == "second"));
        assert!(events[2].is_terminal());
        assert!(events.iter().all(|e| e.thread_id() == "t"));
    }

    #[test]
    fn test_error_uses_public_message() {
        let err = PipelineError::Store(crate::store::StoreError::Backend("pool timed out".into()));
        let event = TurnEvent::error("t", &err);
        assert_eq!(
            event,
            TurnEvent::Error {
                thread_id: "t".to_string(),
                message: "conversation state is unavailable".to_string()
            }
        );
    }
}
