use crate::config::ConfigError;
use crate::store::StoreError;
use crate::types::Route;

/// Failures that cross a stage boundary. The session facade turns each of
/// these into a single terminal `error` event.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Specialist '{route}' failed: {source}")]
    Specialist {
        route: Route,
        #[source]
        source: anyhow::Error,
    },

    #[error("Thread {thread_id} has no pending clarification")]
    NoPendingClarification { thread_id: String },

    #[error("Stage graph invariant violated: {0}")]
    GraphInvariant(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Message exposed to callers in the terminal error event.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::Store(_) => "conversation state is unavailable".to_string(),
            PipelineError::Specialist { route, .. } => {
                format!("the {route} assistant failed to respond")
            }
            other => other.to_string(),
        }
    }
}
