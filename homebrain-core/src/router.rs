//! Router stage
//!
//! Per turn, decide whether to dispatch straight to a specialist or to stop
//! and ask the user which route they meant.

use crate::classifier::RouteClassifier;
use crate::clarify::ClarificationRequest;
use crate::config::RetryPolicy;
use crate::messages::{last_user_message, last_user_text};
use crate::types::{ConversationState, RouteDecision};

#[derive(Clone, Debug, PartialEq)]
pub enum RouterOutcome {
    /// Route is settled; fold the decision into state and move on.
    Dispatch(RouteDecision),
    /// Confidence too low; suspend and ask.
    Clarify(ClarificationRequest),
}

#[derive(Clone)]
pub struct RouterStage {
    classifier: RouteClassifier,
    min_confidence: f64,
    interrupt_on_ambiguity: bool,
}

impl RouterStage {
    pub fn new(classifier: RouteClassifier, min_confidence: f64, interrupt_on_ambiguity: bool) -> Self {
        Self {
            classifier,
            min_confidence,
            interrupt_on_ambiguity,
        }
    }

    pub async fn route(&self, state: &ConversationState, retry: &RetryPolicy) -> RouterOutcome {
        let text = last_user_text(state.messages());

        if text.is_empty() {
            tracing::info!("router: empty user message, dispatching to general");
            return RouterOutcome::Dispatch(RouteDecision::empty_message());
        }

        let decision = self.classifier.classify(text, retry).await;

        if self.interrupt_on_ambiguity && decision.confidence < self.min_confidence {
            tracing::info!(
                route = %decision.route,
                confidence = decision.confidence,
                min_confidence = self.min_confidence,
                "router: low confidence, asking for clarification"
            );
            // Echo the question as the user typed it.
            let original = last_user_message(state.messages()).map_or(text, |m| m.text.as_str());
            return RouterOutcome::Clarify(ClarificationRequest::for_text(original));
        }

        RouterOutcome::Dispatch(decision)
    }

    /// Continue a suspended router stage with the caller's answer.
    pub fn resume(&self, pending: &ClarificationRequest, choice: &str) -> RouteDecision {
        let decision = pending.decision_for(choice);
        tracing::info!(choice, route = %decision.route, "router: resumed after clarification");
        decision
    }
}
