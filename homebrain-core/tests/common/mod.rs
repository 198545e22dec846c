#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use homebrain_core::store::StoreError;
use homebrain_core::{
    last_user_text, CheckpointStore, ConversationState, Message, MemoryCheckpointStore,
    ModelRouteDecision, PipelineConfig, Route, RouteCapability, Specialist, SpecialistSet,
    StateUpdate, TurnCheckpoint, TurnPipeline, TurnSession,
};

/// Classification capability replaying a fixed script; the last entry repeats.
pub struct ScriptedRouter {
    script: Mutex<VecDeque<std::result::Result<(String, f64), String>>>,
    last: Mutex<Option<std::result::Result<(String, f64), String>>>,
    calls: AtomicUsize,
}

impl ScriptedRouter {
    pub fn new(script: Vec<std::result::Result<(&str, f64), &str>>) -> Self {
        let script = script
            .into_iter()
            .map(|o| o.map(|(r, c)| (r.to_string(), c)).map_err(str::to_string))
            .collect();
        Self {
            script: Mutex::new(script),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(route: &str, confidence: f64) -> Self {
        Self::new(vec![Ok((route, confidence))])
    }

    pub fn failing() -> Self {
        Self::new(vec![Err("model unavailable")])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteCapability for ScriptedRouter {
    async fn classify_route(&self, _prompt: &str) -> Result<ModelRouteDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let outcome = match next {
            Some(o) => {
                *self.last.lock().unwrap() = Some(o.clone());
                o
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err("script exhausted".to_string())),
        };
        let (route, confidence) = outcome.map_err(|e| anyhow!(e))?;
        Ok(ModelRouteDecision {
            route,
            confidence,
            reason: "scripted".to_string(),
            needs_human_review: false,
        })
    }
}

/// Specialist that answers "[route] question" and counts calls.
pub struct EchoSpecialist {
    route: Route,
    calls: AtomicUsize,
    fail: bool,
    fail_first_call: bool,
    stall_first_call: bool,
}

impl EchoSpecialist {
    pub fn new(route: Route) -> Self {
        Self {
            route,
            calls: AtomicUsize::new(0),
            fail: false,
            fail_first_call: false,
            stall_first_call: false,
        }
    }

    pub fn failing(route: Route) -> Self {
        Self {
            fail: true,
            ..Self::new(route)
        }
    }

    /// First call errors; later calls answer normally.
    pub fn failing_once(route: Route) -> Self {
        Self {
            fail_first_call: true,
            ..Self::new(route)
        }
    }

    /// First call hangs for an hour; later calls answer normally.
    pub fn stalling(route: Route) -> Self {
        Self {
            stall_first_call: true,
            ..Self::new(route)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Specialist for EchoSpecialist {
    async fn handle(&self, state: &ConversationState) -> Result<StateUpdate> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_first_call && n == 0 {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail || (self.fail_first_call && n == 0) {
            return Err(anyhow!("{} backend unavailable", self.route));
        }
        let question = last_user_text(state.messages());
        Ok(StateUpdate::new().with_message(Message::assistant(format!(
            "[{}] {}",
            self.route, question
        ))))
    }
}

/// Store that is always down.
pub struct FailingStore;

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn load(&self, _thread_id: &str) -> std::result::Result<Option<TurnCheckpoint>, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn save(&self, _checkpoint: &TurnCheckpoint) -> std::result::Result<u64, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }
}

pub struct Fixture {
    pub session: TurnSession,
    pub router: Arc<ScriptedRouter>,
    pub personal: Arc<EchoSpecialist>,
    pub projects: Arc<EchoSpecialist>,
    pub homelab: Arc<EchoSpecialist>,
    pub general: Arc<EchoSpecialist>,
    pub store: Arc<MemoryCheckpointStore>,
}

impl Fixture {
    pub fn new(router: ScriptedRouter) -> Self {
        Self::build(router, PipelineConfig::default(), None)
    }

    pub fn with_config(router: ScriptedRouter, config: PipelineConfig) -> Self {
        Self::build(router, config, None)
    }

    /// Replace one route's specialist.
    pub fn with_specialist(router: ScriptedRouter, specialist: EchoSpecialist) -> Self {
        Self::build(router, PipelineConfig::default(), Some(specialist))
    }

    fn build(router: ScriptedRouter, config: PipelineConfig, special: Option<EchoSpecialist>) -> Self {
        let router = Arc::new(router);
        let mut personal = Arc::new(EchoSpecialist::new(Route::Personal));
        let mut projects = Arc::new(EchoSpecialist::new(Route::Projects));
        let mut homelab = Arc::new(EchoSpecialist::new(Route::Homelab));
        let mut general = Arc::new(EchoSpecialist::new(Route::General));

        if let Some(s) = special {
            let slot = match s.route {
                Route::Personal => &mut personal,
                Route::Projects => &mut projects,
                Route::Homelab => &mut homelab,
                Route::General => &mut general,
            };
            *slot = Arc::new(s);
        }

        let store = Arc::new(MemoryCheckpointStore::new());
        let specialists = SpecialistSet::new(
            personal.clone(),
            projects.clone(),
            homelab.clone(),
            general.clone(),
        );
        let pipeline = TurnPipeline::compile(config, router.clone(), specialists, store.clone())
            .expect("pipeline compiles");

        Self {
            session: TurnSession::new(Arc::new(pipeline)),
            router,
            personal,
            projects,
            homelab,
            general,
            store,
        }
    }

    pub fn specialist_calls(&self) -> usize {
        self.personal.calls() + self.projects.calls() + self.homelab.calls() + self.general.calls()
    }
}
