//! Ingest and finalize: the two built-in stages that bracket every turn.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::messages::last_user_text;
use crate::types::{ConversationState, Role, Route, StateUpdate};

pub const EMPTY_USER_MESSAGE: &str = "Empty user message";

/// Reset per-turn scratch fields. A missing user message is flagged but
/// never halts the pipeline; the router decides what to do with it.
pub fn ingest(state: &ConversationState) -> StateUpdate {
    let mut update = StateUpdate::new()
        .clear_error()
        .with_retrieved_context("")
        .with_tool_results(BTreeMap::new())
        .with_route_reason("")
        .with_route_confidence(0.0)
        .with_needs_human_review(false);

    if last_user_text(state.messages()).is_empty() {
        tracing::warn!(
            messages_count = state.messages().len(),
            "ingest: empty last user message"
        );
        update = update
            .with_error(EMPTY_USER_MESSAGE)
            .with_needs_human_review(true);
    }

    update
}

/// Outward-visible result of a completed turn. Stored on the checkpoint so
/// a replayed request can be answered without running anything.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub route: Route,
    pub needs_human_review: bool,
    /// Assistant messages produced during this turn, in order.
    pub replies: Vec<String>,
}

/// Build the turn outcome from state. `turn_start` is the index of the
/// first message that belongs to this turn.
pub fn finalize(state: &ConversationState, turn_start: usize) -> TurnOutcome {
    let replies = state
        .messages()
        .iter()
        .skip(turn_start)
        .filter(|m| m.role == Role::Assistant)
        .map(|m| m.text.clone())
        .collect();

    TurnOutcome {
        route: state.route.unwrap_or(Route::General),
        needs_human_review: state.needs_human_review,
        replies,
    }
}
