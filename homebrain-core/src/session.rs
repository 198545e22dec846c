//! Turn session facade
//!
//! The single entry point callers use: hand in a thread id and a message, get
//! back the thread id and a stream of [`TurnEvent`]s. Nothing runs until the
//! stream is polled, and dropping it stops the turn after the stage in
//! progress. Every failure becomes one terminal `error` event; this layer
//! never returns an error itself.
//!
//! Calls for the same thread must be serialised by the caller.

use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use uuid::Uuid;

use crate::events::TurnEvent;
use crate::pipeline::{StepOutcome, TurnPipeline, TurnStart};

pub type TurnEventStream = BoxStream<'static, TurnEvent>;

/// One inbound call.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnRequest {
    /// Existing thread, or `None` to start a new one.
    pub thread_id: Option<String>,
    pub message: String,
    /// Caller-chosen key identifying this request across retries.
    pub idempotency_key: Option<String>,
}

impl TurnRequest {
    pub fn new(thread_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            thread_id,
            message: message.into(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[derive(Clone)]
pub struct TurnSession {
    pipeline: Arc<TurnPipeline>,
}

impl TurnSession {
    pub fn new(pipeline: Arc<TurnPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<TurnPipeline> {
        &self.pipeline
    }

    /// Start a turn, continue one, or answer a pending clarification.
    pub fn process_turn(
        &self,
        thread_id: Option<String>,
        message: impl Into<String>,
    ) -> (String, TurnEventStream) {
        self.process(TurnRequest::new(thread_id, message))
    }

    pub fn process(&self, request: TurnRequest) -> (String, TurnEventStream) {
        let thread_id = request
            .thread_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let pipeline = self.pipeline.clone();
        let message = request.message;
        let idempotency_key = request.idempotency_key;
        let tid = thread_id.clone();

        let stream = async_stream::stream! {
            tracing::info!(thread_id = %tid, message_len = message.len(), "session: turn requested");

            match pipeline.begin(&tid, &message, idempotency_key.as_deref()).await {
                Err(e) => {
                    tracing::error!(thread_id = %tid, error = %e, "session: turn failed to start");
                    yield TurnEvent::error(&tid, &e);
                }
                Ok(TurnStart::Replay(outcome)) => {
                    for event in TurnEvent::for_outcome(&tid, &outcome) {
                        yield event;
                    }
                }
                Ok(TurnStart::Run(mut run)) => loop {
                    match pipeline.step(&mut run).await {
                        Ok(StepOutcome::Advanced(stage)) => {
                            tracing::debug!(thread_id = %tid, stage = %stage, "session: stage done");
                        }
                        Ok(StepOutcome::Suspended(pending)) => {
                            yield TurnEvent::interrupt(&tid, pending);
                            break;
                        }
                        Ok(StepOutcome::Completed(outcome)) => {
                            for event in TurnEvent::for_outcome(&tid, &outcome) {
                                yield event;
                            }
                            break;
                        }
                        Err(e) => {
                            tracing::error!(thread_id = %tid, error = %e, "session: turn failed");
                            yield TurnEvent::error(&tid, &e);
                            break;
                        }
                    }
                },
            }
        };

        (thread_id, stream.boxed())
    }

    /// Drive a request to its terminal event and collect everything emitted.
    pub async fn run_to_completion(&self, request: TurnRequest) -> (String, Vec<TurnEvent>) {
        let (thread_id, stream) = self.process(request);
        (thread_id, stream.collect().await)
    }
}
