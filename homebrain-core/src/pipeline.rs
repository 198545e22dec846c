//! Turn pipeline
//!
//! Executes the stage graph for one thread, one stage per [`TurnPipeline::step`].
//! Every stage transition is saved to the [`CheckpointStore`] before `step`
//! returns, so a turn interrupted anywhere resumes from its last saved stage.
//!
//! A turn is entered through [`TurnPipeline::begin`], which decides from the
//! stored checkpoint whether the incoming message starts a fresh turn,
//! continues an unfinished one, answers a pending clarification, or repeats
//! a request that already completed.

use anyhow::anyhow;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::checkpoint::{PipelinePosition, RequestKey, TurnCheckpoint, TurnMarker};
use crate::clarify::ClarificationRequest;
use crate::classifier::{RouteCapability, RouteClassifier};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::graph::{StageGraph, StageId};
use crate::router::{RouterOutcome, RouterStage};
use crate::specialist::SpecialistSet;
use crate::stages::{finalize, ingest, TurnOutcome};
use crate::store::CheckpointStore;
use crate::types::{ConversationState, Message, Route, StateUpdate};

/// How a call enters the pipeline.
#[derive(Debug)]
pub enum TurnStart {
    /// Stages still have to run.
    Run(TurnRun),
    /// The request already completed; answer from the stored outcome.
    Replay(TurnOutcome),
}

/// An in-flight turn: the working checkpoint plus the caller's pending
/// clarification answer, if this call carries one.
#[derive(Debug)]
pub struct TurnRun {
    checkpoint: TurnCheckpoint,
    choice: Option<String>,
}

impl TurnRun {
    pub fn thread_id(&self) -> &str {
        &self.checkpoint.thread_id
    }

    pub fn checkpoint(&self) -> &TurnCheckpoint {
        &self.checkpoint
    }

    pub fn position(&self) -> &PipelinePosition {
        &self.checkpoint.position
    }
}

/// Result of running one stage.
#[derive(Debug, PartialEq)]
pub enum StepOutcome {
    /// `stage` ran and its result is saved; call `step` again.
    Advanced(StageId),
    /// Parked on a clarification; the thread stays suspended until answered.
    Suspended(ClarificationRequest),
    /// Turn finished.
    Completed(TurnOutcome),
}

pub struct TurnPipeline {
    graph: StageGraph,
    router: RouterStage,
    specialists: SpecialistSet,
    store: Arc<dyn CheckpointStore>,
    config: PipelineConfig,
}

impl TurnPipeline {
    /// Validate configuration, build the stage graph and bind the store.
    pub fn compile(
        config: PipelineConfig,
        capability: Arc<dyn RouteCapability>,
        specialists: SpecialistSet,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let graph = StageGraph::homebrain(&config);
        graph.validate()?;

        let router = RouterStage::new(
            RouteClassifier::new(capability),
            config.min_confidence,
            config.interrupt_on_ambiguity,
        );

        tracing::info!(
            stages = graph.stages().count(),
            min_confidence = config.min_confidence,
            interrupt_on_ambiguity = config.interrupt_on_ambiguity,
            "pipeline: compiled"
        );

        Ok(Self {
            graph,
            router,
            specialists,
            store,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Enter the pipeline for `message` on `thread_id`.
    ///
    /// - suspended thread: `message` is the clarification answer
    /// - unfinished turn for the same request: continue it
    /// - completed turn with the same explicit idempotency key: replay
    /// - anything else: start a fresh turn on top of the stored history
    pub async fn begin(
        &self,
        thread_id: &str,
        message: &str,
        idempotency_key: Option<&str>,
    ) -> Result<TurnStart, PipelineError> {
        let key = RequestKey::for_request(idempotency_key, message);

        let Some(checkpoint) = self.store.load(thread_id).await? else {
            return self.start_fresh(thread_id, None, message, key).await;
        };

        match checkpoint.position.clone() {
            PipelinePosition::AwaitingClarification { .. } => {
                Ok(TurnStart::Run(Self::resume_checkpoint(checkpoint, message, key)?))
            }
            PipelinePosition::Next { stage } if checkpoint.turn.matches(&key) => {
                tracing::info!(
                    thread_id,
                    stage = %stage,
                    turn_id = %checkpoint.turn.turn_id,
                    "pipeline: continuing unfinished turn"
                );
                Ok(TurnStart::Run(TurnRun {
                    checkpoint,
                    choice: None,
                }))
            }
            PipelinePosition::Next { stage } => {
                tracing::warn!(
                    thread_id,
                    stage = %stage,
                    turn_id = %checkpoint.turn.turn_id,
                    "pipeline: abandoning unfinished turn for a new request"
                );
                self.start_fresh(thread_id, Some(checkpoint), message, key).await
            }
            PipelinePosition::Completed { outcome }
                if key.explicit && checkpoint.turn.explicit_key && checkpoint.turn.matches(&key) =>
            {
                tracing::info!(
                    thread_id,
                    turn_id = %checkpoint.turn.turn_id,
                    "pipeline: replaying completed request"
                );
                Ok(TurnStart::Replay(outcome))
            }
            PipelinePosition::Completed { .. } => {
                self.start_fresh(thread_id, Some(checkpoint), message, key).await
            }
        }
    }

    /// Answer the clarification a thread is suspended on.
    ///
    /// Fails with [`PipelineError::NoPendingClarification`] unless the stored
    /// checkpoint is suspended.
    pub async fn resume(&self, thread_id: &str, choice: &str) -> Result<TurnRun, PipelineError> {
        match self.store.load(thread_id).await? {
            Some(checkpoint) => {
                Self::resume_checkpoint(checkpoint, choice, RequestKey::for_request(None, choice))
            }
            None => Err(PipelineError::NoPendingClarification {
                thread_id: thread_id.to_string(),
            }),
        }
    }

    /// The answer's key is kept on the turn marker so a retry of the same
    /// answer continues the resumed turn.
    fn resume_checkpoint(
        mut checkpoint: TurnCheckpoint,
        choice: &str,
        key: RequestKey,
    ) -> Result<TurnRun, PipelineError> {
        if !checkpoint.position.is_suspended() {
            return Err(PipelineError::NoPendingClarification {
                thread_id: checkpoint.thread_id,
            });
        }
        checkpoint.turn.resume_key = Some(key.key);
        tracing::info!(thread_id = %checkpoint.thread_id, "pipeline: resuming after clarification");
        Ok(TurnRun {
            checkpoint,
            choice: Some(choice.to_string()),
        })
    }

    async fn start_fresh(
        &self,
        thread_id: &str,
        previous: Option<TurnCheckpoint>,
        message: &str,
        key: RequestKey,
    ) -> Result<TurnStart, PipelineError> {
        let (mut state, version) = match previous {
            Some(cp) => (cp.state, cp.version),
            None => (ConversationState::new(), 0),
        };

        let turn_start = state.messages().len();
        state.push_message(Message::user(message));

        let mut checkpoint = TurnCheckpoint::new(thread_id, state, TurnMarker::new(key, turn_start));
        checkpoint.version = version;

        tracing::info!(
            thread_id,
            turn_id = %checkpoint.turn.turn_id,
            history_len = turn_start,
            "pipeline: starting turn"
        );

        let mut run = TurnRun {
            checkpoint,
            choice: None,
        };
        self.persist(&mut run).await?;
        Ok(TurnStart::Run(run))
    }

    /// Run the next stage of `run` and save the result.
    ///
    /// On error nothing is saved: the stored checkpoint still points at the
    /// stage that failed.
    pub async fn step(&self, run: &mut TurnRun) -> Result<StepOutcome, PipelineError> {
        match run.checkpoint.position.clone() {
            PipelinePosition::Next {
                stage: StageId::Ingest,
            } => {
                let update = ingest(&run.checkpoint.state);
                self.complete_stage(run, StageId::Ingest, update).await
            }

            PipelinePosition::Next {
                stage: StageId::Router,
            } => {
                let policy = self.graph.retry_for(StageId::Router);
                match self.router.route(&run.checkpoint.state, &policy).await {
                    RouterOutcome::Dispatch(decision) => {
                        tracing::info!(
                            thread_id = %run.checkpoint.thread_id,
                            route = %decision.route,
                            confidence = decision.confidence,
                            reason = %decision.reason,
                            "pipeline: dispatching"
                        );
                        self.complete_stage(run, StageId::Router, decision.into_update())
                            .await
                    }
                    RouterOutcome::Clarify(request) => {
                        run.checkpoint
                            .advance(PipelinePosition::AwaitingClarification {
                                request: request.clone(),
                            });
                        self.persist(run).await?;
                        tracing::info!(
                            thread_id = %run.checkpoint.thread_id,
                            "pipeline: suspended awaiting clarification"
                        );
                        Ok(StepOutcome::Suspended(request))
                    }
                }
            }

            PipelinePosition::AwaitingClarification { request } => match run.choice.take() {
                Some(choice) => {
                    let decision = self.router.resume(&request, &choice);
                    self.complete_stage(run, StageId::Router, decision.into_update())
                        .await
                }
                None => Ok(StepOutcome::Suspended(request)),
            },

            PipelinePosition::Next {
                stage: StageId::Specialist(route),
            } => {
                let update = self.run_specialist(run, route).await?;
                self.complete_stage(run, StageId::Specialist(route), update)
                    .await
            }

            PipelinePosition::Next {
                stage: StageId::Finalize,
            } => {
                let outcome = finalize(&run.checkpoint.state, run.checkpoint.turn.turn_start);
                if self.graph.next(StageId::Finalize, run.checkpoint.state.route)?.is_some() {
                    return Err(PipelineError::GraphInvariant(
                        "finalize must end the turn".to_string(),
                    ));
                }
                run.checkpoint.advance(PipelinePosition::Completed {
                    outcome: outcome.clone(),
                });
                self.persist(run).await?;
                tracing::info!(
                    thread_id = %run.checkpoint.thread_id,
                    route = %outcome.route,
                    needs_human_review = outcome.needs_human_review,
                    replies = outcome.replies.len(),
                    "pipeline: turn done"
                );
                Ok(StepOutcome::Completed(outcome))
            }

            PipelinePosition::Completed { outcome } => Ok(StepOutcome::Completed(outcome)),
        }
    }

    /// Step until the turn suspends or completes.
    pub async fn run(&self, run: &mut TurnRun) -> Result<StepOutcome, PipelineError> {
        loop {
            match self.step(run).await? {
                StepOutcome::Advanced(_) => continue,
                other => return Ok(other),
            }
        }
    }

    /// Merge `update`, move to the successor of `stage`, and save.
    async fn complete_stage(
        &self,
        run: &mut TurnRun,
        stage: StageId,
        update: StateUpdate,
    ) -> Result<StepOutcome, PipelineError> {
        run.checkpoint.state.merge(update);
        let next = self
            .graph
            .next(stage, run.checkpoint.state.route)?
            .ok_or_else(|| PipelineError::GraphInvariant(format!("stage {stage} has no successor")))?;
        run.checkpoint.advance(PipelinePosition::next(next));
        self.persist(run).await?;
        tracing::debug!(
            thread_id = %run.checkpoint.thread_id,
            stage = %stage,
            next = %next,
            "pipeline: stage complete"
        );
        Ok(StepOutcome::Advanced(stage))
    }

    async fn run_specialist(&self, run: &TurnRun, route: Route) -> Result<StateUpdate, PipelineError> {
        let policy = self.graph.retry_for(StageId::Specialist(route));
        let handler = self.specialists.get(route).clone();
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let delay = policy.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let call = AssertUnwindSafe(handler.handle(&run.checkpoint.state)).catch_unwind();
            let result = match policy.attempt_timeout() {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(r) => r,
                    Err(_) => Ok(Err(anyhow!(
                        "specialist timed out after {}ms",
                        limit.as_millis()
                    ))),
                },
                None => call.await,
            };

            let error = match result {
                Ok(Ok(update)) => return Ok(update),
                Ok(Err(e)) => e,
                Err(panic) => anyhow!("specialist panicked: {}", panic_message(panic.as_ref())),
            };

            tracing::warn!(
                thread_id = %run.checkpoint.thread_id,
                route = %route,
                attempt,
                max_attempts,
                error = %error,
                "pipeline: specialist attempt failed"
            );
            last_error = Some(error);
        }

        let source = last_error.unwrap_or_else(|| anyhow!("specialist made no attempt"));
        tracing::error!(
            thread_id = %run.checkpoint.thread_id,
            route = %route,
            error = %source,
            "pipeline: specialist failed"
        );
        Err(PipelineError::Specialist { route, source })
    }

    async fn persist(&self, run: &mut TurnRun) -> Result<(), PipelineError> {
        match self.store.save(&run.checkpoint).await {
            Ok(version) => {
                run.checkpoint.version = version;
                tracing::debug!(
                    thread_id = %run.checkpoint.thread_id,
                    version,
                    "pipeline: checkpoint saved"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    thread_id = %run.checkpoint.thread_id,
                    error = %e,
                    "pipeline: checkpoint save failed"
                );
                Err(e.into())
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::classifier::testing::ScriptedCapability;
    use crate::specialist::testing::RecordingSet;
    use crate::store::{MemoryCheckpointStore, StoreError};
    use async_trait::async_trait;

    /// Store whose operations always fail.
    pub struct FailingStore;

    #[async_trait]
    impl CheckpointStore for FailingStore {
        async fn load(&self, _thread_id: &str) -> Result<Option<TurnCheckpoint>, StoreError> {
            Err(StoreError::Backend("store offline".to_string()))
        }

        async fn save(&self, _checkpoint: &TurnCheckpoint) -> Result<u64, StoreError> {
            Err(StoreError::Backend("store offline".to_string()))
        }
    }

    pub struct Harness {
        pub pipeline: TurnPipeline,
        pub capability: Arc<ScriptedCapability>,
        pub specialists: RecordingSet,
        pub store: Arc<MemoryCheckpointStore>,
    }

    pub fn harness(capability: ScriptedCapability) -> Harness {
        harness_with(capability, PipelineConfig::default())
    }

    pub fn harness_with(capability: ScriptedCapability, config: PipelineConfig) -> Harness {
        let capability = Arc::new(capability);
        let specialists = RecordingSet::new();
        let store = Arc::new(MemoryCheckpointStore::new());
        let pipeline = TurnPipeline::compile(
            config,
            capability.clone(),
            specialists.set(),
            store.clone(),
        )
        .unwrap();
        Harness {
            pipeline,
            capability,
            specialists,
            store,
        }
    }
}
