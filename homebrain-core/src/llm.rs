//! LLM-backed classification capability
//!
//! Turns any chat model that can answer in JSON into a [`RouteCapability`].
//! The concrete provider client lives outside this crate.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use crate::classifier::{ModelRouteDecision, RouteCapability};

const SYSTEM_PROMPT: &str =
    "You classify user messages. Reply with a single JSON object and nothing else.";

/// Minimal chat interface the router needs from a model provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Call the model with system + user prompts, expecting a JSON reply.
    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

/// Classification capability driven by a chat model's JSON mode.
pub struct StructuredRouteCapability<C> {
    client: C,
}

impl<C: LlmClient> StructuredRouteCapability<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: LlmClient> RouteCapability for StructuredRouteCapability<C> {
    async fn classify_route(&self, prompt: &str) -> Result<ModelRouteDecision> {
        let content = self.client.chat_json(SYSTEM_PROMPT, prompt).await?;
        tracing::debug!(
            model = self.client.model_name(),
            response_len = content.len(),
            "llm: route classification response"
        );
        parse_decision(&content)
    }
}

/// Parse a model reply, tolerating markdown fences and surrounding prose.
pub fn parse_decision(content: &str) -> Result<ModelRouteDecision> {
    let json_str = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match serde_json::from_str::<ModelRouteDecision>(json_str) {
        Ok(decision) => Ok(decision),
        Err(e) => {
            if let (Some(start), Some(end)) = (json_str.find('{'), json_str.rfind('}')) {
                if start < end {
                    return serde_json::from_str(&json_str[start..=end])
                        .with_context(|| format!("Failed to parse extracted JSON: {}", e));
                }
            }
            Err(anyhow!("Failed to parse route decision: {}", e))
        }
    }
}
