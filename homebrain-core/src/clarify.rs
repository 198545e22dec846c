//! Clarification protocol: the question sent to the caller when routing is
//! ambiguous, and how the caller's answer becomes a routing decision.

use serde::{Deserialize, Serialize};

use crate::types::{Route, RouteDecision};

pub const CLARIFICATION_MESSAGE: &str = "Quick clarification so I route you correctly:";

/// Interrupt payload. Persisted only while the thread is suspended on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub message: String,
    pub options: Vec<Route>,
    pub original_text: String,
}

impl ClarificationRequest {
    pub fn for_text(original_text: impl Into<String>) -> Self {
        Self {
            message: CLARIFICATION_MESSAGE.to_string(),
            options: Route::ALL.to_vec(),
            original_text: original_text.into(),
        }
    }

    /// Map the caller's answer onto a route. Anything other than one of the
    /// four route names resolves to `general`.
    pub fn resolve(&self, choice: &str) -> Route {
        match Route::parse(choice.trim()) {
            Some(route) => route,
            None => {
                tracing::info!(choice, "clarify: unrecognised choice, using general");
                Route::General
            }
        }
    }

    pub fn decision_for(&self, choice: &str) -> RouteDecision {
        RouteDecision::user_selected(self.resolve(choice))
    }
}
