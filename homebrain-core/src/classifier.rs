//! Route Classifier
//!
//! Wraps the external classification capability. Whatever the capability
//! returns is validated and clamped; whatever it throws is retried per the
//! router stage's [`RetryPolicy`] and finally absorbed into a deterministic
//! fallback decision. Nothing here ever fails a turn.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::RetryPolicy;
use crate::types::{Route, RouteDecision};

const ROUTER_PROMPT: &str = "\
You are a router for a personal assistant.

Choose exactly one route:
- personal: about the owner's public/professional background
- projects: about the owner's software projects
- homelab: about the owner's homelab/infra
- general: everything else

Set needs_human_review=true if the request asks for private identifiers
(address, phone, DOB, passwords, tokens) or asks for risky/real-world actions.

Respond with a JSON object: {\"route\", \"confidence\", \"reason\", \"needs_human_review\"}.

User message:
";

/// Render the fixed router instruction around the user's text.
pub fn router_prompt(user_message: &str) -> String {
    format!("{ROUTER_PROMPT}{user_message}\n")
}

/// Decision as emitted by the model, before validation.
///
/// `route` is a free string so that out-of-set answers survive parsing and
/// can be coerced rather than rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelRouteDecision {
    pub route: String,
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub needs_human_review: bool,
}

/// External structured-extraction capability: prompt in, raw decision out.
///
/// Implementations must be safe to call concurrently from independent turns.
#[async_trait]
pub trait RouteCapability: Send + Sync {
    async fn classify_route(&self, prompt: &str) -> Result<ModelRouteDecision>;
}

/// Clamp into `[0.0, 1.0]`. NaN is treated as no confidence at all.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Validate a raw model decision against the fixed route set.
pub fn validate_decision(raw: ModelRouteDecision) -> RouteDecision {
    match Route::parse(&raw.route) {
        Some(route) => RouteDecision {
            route,
            confidence: clamp_confidence(raw.confidence),
            reason: raw.reason,
            needs_human_review: raw.needs_human_review,
        },
        None => {
            tracing::warn!(model_route = %raw.route, "router: model returned unknown route");
            RouteDecision {
                route: Route::General,
                confidence: 0.1,
                reason: RouteDecision::INVALID_ROUTE.to_string(),
                needs_human_review: raw.needs_human_review,
            }
        }
    }
}

/// Classifier bound to one capability instance.
#[derive(Clone)]
pub struct RouteClassifier {
    capability: Arc<dyn RouteCapability>,
}

impl RouteClassifier {
    pub fn new(capability: Arc<dyn RouteCapability>) -> Self {
        Self { capability }
    }

    /// One capability call, validated. Errors are returned, not absorbed.
    pub async fn attempt(&self, text: &str, policy: &RetryPolicy) -> Result<RouteDecision> {
        let prompt = router_prompt(text);
        let call = self.capability.classify_route(&prompt);

        let raw = match policy.attempt_timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| anyhow!("classification timed out after {}ms", limit.as_millis()))??,
            None => call.await?,
        };

        Ok(validate_decision(raw))
    }

    /// Classify `text`, retrying failed attempts per `policy`.
    ///
    /// Always returns a decision: after the last failed attempt the result is
    /// [`RouteDecision::classify_error`].
    pub async fn classify(&self, text: &str, policy: &RetryPolicy) -> RouteDecision {
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let delay = policy.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.attempt(text, policy).await {
                Ok(decision) => {
                    tracing::debug!(
                        attempt,
                        route = %decision.route,
                        confidence = decision.confidence,
                        "router: classified"
                    );
                    return decision;
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, error = %e, "router: classify attempt failed");
                }
            }
        }

        tracing::error!(max_attempts, "router: classify failed; falling back to general");
        RouteDecision::classify_error()
    }
}
