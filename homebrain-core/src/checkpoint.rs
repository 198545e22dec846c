//! Turn checkpoints
//!
//! A checkpoint is the whole durable picture of a thread: conversation state,
//! where the pipeline stands, and which request the current turn belongs to.
//! It is overwritten after every stage transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::clarify::ClarificationRequest;
use crate::graph::StageId;
use crate::stages::TurnOutcome;
use crate::types::ConversationState;

/// Where the pipeline stands for a thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum PipelinePosition {
    /// Mid-turn; `stage` is the next stage to run.
    Next { stage: StageId },
    /// Suspended in the router until the caller answers.
    AwaitingClarification { request: ClarificationRequest },
    /// Last turn finished.
    Completed { outcome: TurnOutcome },
}

impl PipelinePosition {
    pub fn next(stage: StageId) -> Self {
        PipelinePosition::Next { stage }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, PipelinePosition::AwaitingClarification { .. })
    }
}

/// Identifies the request that started the current (or last) turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMarker {
    pub turn_id: Uuid,
    pub request_key: String,
    /// True when `request_key` was supplied by the caller rather than derived.
    pub explicit_key: bool,
    /// Index of this turn's user message in `state.messages`.
    pub turn_start: usize,
    /// Key of the clarification answer that resumed this turn.
    #[serde(default)]
    pub resume_key: Option<String>,
}

impl TurnMarker {
    pub fn new(request_key: RequestKey, turn_start: usize) -> Self {
        Self {
            turn_id: Uuid::now_v7(),
            request_key: request_key.key,
            explicit_key: request_key.explicit,
            turn_start,
            resume_key: None,
        }
    }

    /// True for the request that started the turn or the answer that resumed it.
    pub fn matches(&self, key: &RequestKey) -> bool {
        self.request_key == key.key || self.resume_key.as_deref() == Some(key.key.as_str())
    }
}

/// Key used to recognise a repeated request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestKey {
    pub key: String,
    pub explicit: bool,
}

impl RequestKey {
    /// Caller-supplied idempotency key, or the SHA-256 of the message text.
    pub fn for_request(idempotency_key: Option<&str>, message: &str) -> Self {
        match idempotency_key {
            Some(k) if !k.is_empty() => Self {
                key: k.to_string(),
                explicit: true,
            },
            _ => Self {
                key: hex::encode(Sha256::digest(message.as_bytes())),
                explicit: false,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnCheckpoint {
    pub thread_id: String,
    /// Version currently held by the store; 0 until first saved.
    pub version: u64,
    pub state: ConversationState,
    pub position: PipelinePosition,
    pub turn: TurnMarker,
    pub updated_at: DateTime<Utc>,
}

impl TurnCheckpoint {
    /// First checkpoint of a brand-new thread, positioned at ingest.
    pub fn new(thread_id: impl Into<String>, state: ConversationState, turn: TurnMarker) -> Self {
        Self {
            thread_id: thread_id.into(),
            version: 0,
            state,
            position: PipelinePosition::next(StageId::START),
            turn,
            updated_at: Utc::now(),
        }
    }

    /// Move to `position` and bump the timestamp. Persisting is the caller's job.
    pub fn advance(&mut self, position: PipelinePosition) {
        self.position = position;
        self.updated_at = Utc::now();
    }
}
