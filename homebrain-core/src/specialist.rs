//! Specialist handlers
//!
//! A specialist receives a read-only view of the conversation and returns a
//! partial update. Its internals are not this crate's concern; it is held
//! only for the duration of one call.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::types::{ConversationState, Route, StateUpdate};

#[async_trait]
pub trait Specialist: Send + Sync {
    async fn handle(&self, state: &ConversationState) -> Result<StateUpdate>;
}

/// Adapter so plain async closures can serve as specialists.
pub struct FnSpecialist<F>(pub F);

#[async_trait]
impl<F, Fut> Specialist for FnSpecialist<F>
where
    F: Fn(ConversationState) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<StateUpdate>> + Send + 'static,
{
    async fn handle(&self, state: &ConversationState) -> Result<StateUpdate> {
        (self.0)(state.clone()).await
    }
}

/// One handler per route.
#[derive(Clone)]
pub struct SpecialistSet {
    personal: Arc<dyn Specialist>,
    projects: Arc<dyn Specialist>,
    homelab: Arc<dyn Specialist>,
    general: Arc<dyn Specialist>,
}

impl SpecialistSet {
    pub fn new(
        personal: Arc<dyn Specialist>,
        projects: Arc<dyn Specialist>,
        homelab: Arc<dyn Specialist>,
        general: Arc<dyn Specialist>,
    ) -> Self {
        Self {
            personal,
            projects,
            homelab,
            general,
        }
    }

    /// Same handler for every route.
    pub fn uniform(handler: Arc<dyn Specialist>) -> Self {
        Self::new(handler.clone(), handler.clone(), handler.clone(), handler)
    }

    /// Replace the handler for one route.
    pub fn with(mut self, route: Route, handler: Arc<dyn Specialist>) -> Self {
        *self.slot_mut(route) = handler;
        self
    }

    pub fn get(&self, route: Route) -> &Arc<dyn Specialist> {
        match route {
            Route::Personal => &self.personal,
            Route::Projects => &self.projects,
            Route::Homelab => &self.homelab,
            Route::General => &self.general,
        }
    }

    fn slot_mut(&mut self, route: Route) -> &mut Arc<dyn Specialist> {
        match route {
            Route::Personal => &mut self.personal,
            Route::Projects => &mut self.projects,
            Route::Homelab => &mut self.homelab,
            Route::General => &mut self.general,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::types::Message;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with a canned message tagged by route and counts invocations.
    pub struct RecordingSpecialist {
        route: Route,
        calls: AtomicUsize,
        fail: bool,
    }

    impl RecordingSpecialist {
        pub fn new(route: Route) -> Self {
            Self {
                route,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        pub fn failing(route: Route) -> Self {
            Self {
                fail: true,
                ..Self::new(route)
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Specialist for RecordingSpecialist {
        async fn handle(&self, state: &ConversationState) -> Result<StateUpdate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("{} backend unavailable", self.route));
            }
            let question = crate::messages::last_user_text(state.messages()).to_string();
            Ok(StateUpdate::new()
                .with_message(Message::assistant(format!("[{}] {}", self.route, question)))
                .with_retrieved_context(format!("{} notes", self.route)))
        }
    }

    pub struct RecordingSet {
        pub personal: Arc<RecordingSpecialist>,
        pub projects: Arc<RecordingSpecialist>,
        pub homelab: Arc<RecordingSpecialist>,
        pub general: Arc<RecordingSpecialist>,
    }

    impl RecordingSet {
        pub fn new() -> Self {
            Self {
                personal: Arc::new(RecordingSpecialist::new(Route::Personal)),
                projects: Arc::new(RecordingSpecialist::new(Route::Projects)),
                homelab: Arc::new(RecordingSpecialist::new(Route::Homelab)),
                general: Arc::new(RecordingSpecialist::new(Route::General)),
            }
        }

        pub fn set(&self) -> SpecialistSet {
            SpecialistSet::new(
                self.personal.clone(),
                self.projects.clone(),
                self.homelab.clone(),
                self.general.clone(),
            )
        }

        pub fn total_calls(&self) -> usize {
            self.personal.calls() + self.projects.calls() + self.homelab.calls() + self.general.calls()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::types::Message;

    #[tokio::test]
    async fn test_get_dispatches_by_route() {
        let rec = RecordingSet::new();
        let set = rec.set();

        set.get(Route::Homelab)
            .handle(&ConversationState::new())
            .await
            .unwrap();

        assert_eq!(rec.homelab.calls(), 1);
        assert_eq!(rec.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_with_replaces_one_route() {
        let rec = RecordingSet::new();
        let replacement = Arc::new(RecordingSpecialist::new(Route::General));
        let set = rec.set().with(Route::Projects, replacement.clone());

        set.get(Route::Projects)
            .handle(&ConversationState::new())
            .await
            .unwrap();

        assert_eq!(replacement.calls(), 1);
        assert_eq!(rec.projects.calls(), 0);
    }

    #[tokio::test]
    async fn test_fn_specialist() {
        let handler = FnSpecialist(|state: ConversationState| async move {
            Ok::<_, anyhow::Error>(StateUpdate::new().with_message(Message::assistant(
                format!("seen {} messages", state.messages().len()),
            )))
        });

        let mut state = ConversationState::new();
        state.push_message(Message::user("hi"));
        let update = handler.handle(&state).await.unwrap();

        assert_eq!(update.messages, vec![Message::assistant("seen 1 messages")]);
    }
}
