//! Homebrain turn engine
//!
//! Routes each conversational message to one of four specialist handlers,
//! pausing mid-turn to ask the user when the route is ambiguous.
//!
//! # Architecture
//!
//! ```text
//! TurnSession::process_turn(thread_id, message)
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  TurnPipeline::begin                    │
//! │  load checkpoint → fresh / continue /   │
//! │  answer clarification / replay          │
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! ingest → router ─┬─► personal ─┐
//!                  ├─► projects ─┤
//!                  ├─► homelab  ─┼─► finalize
//!                  └─► general  ─┘
//!          │
//!          └── low confidence ──► interrupt (suspended, checkpointed)
//!       │
//!       ▼
//! message_delta* → done | interrupt | error
//! ```
//!
//! Every stage transition is saved through a [`CheckpointStore`] before the
//! next stage runs.

pub mod checkpoint;
pub mod clarify;
pub mod classifier;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod llm;
pub mod messages;
pub mod pipeline;
pub mod router;
pub mod session;
pub mod specialist;
pub mod stages;
pub mod store;
pub mod types;

pub use checkpoint::{PipelinePosition, TurnCheckpoint};
pub use clarify::ClarificationRequest;
pub use classifier::{ModelRouteDecision, RouteCapability, RouteClassifier};
pub use config::{ConfigError, PipelineConfig, RetryPolicy};
pub use error::PipelineError;
pub use events::TurnEvent;
pub use graph::{StageGraph, StageId};
pub use llm::{LlmClient, StructuredRouteCapability};
pub use messages::{last_user_message, last_user_text};
pub use pipeline::{StepOutcome, TurnPipeline, TurnRun, TurnStart};
pub use router::{RouterOutcome, RouterStage};
pub use session::{TurnEventStream, TurnRequest, TurnSession};
pub use specialist::{FnSpecialist, Specialist, SpecialistSet};
pub use stages::TurnOutcome;
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, StoreError};
pub use types::{ConversationState, Message, Role, Route, RouteDecision, StateUpdate};
