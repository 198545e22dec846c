//! Stage graph
//!
//! The turn pipeline is a fixed table:
//!
//! ```text
//! ingest → router ─┬─► personal ─┐
//!                  ├─► projects ─┤
//!                  ├─► homelab  ─┼─► finalize → end
//!                  └─► general  ─┘
//! ```
//!
//! Stage identity is a closed enum; the table maps each stage to its
//! successor selector and optional retry policy. Built and validated once
//! when the pipeline is compiled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::{PipelineConfig, RetryPolicy};
use crate::error::PipelineError;
use crate::types::Route;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Ingest,
    Router,
    Specialist(Route),
    Finalize,
}

impl StageId {
    pub const START: StageId = StageId::Ingest;
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageId::Ingest => write!(f, "ingest"),
            StageId::Router => write!(f, "router"),
            StageId::Specialist(route) => write!(f, "{}_agent", route),
            StageId::Finalize => write!(f, "finalize"),
        }
    }
}

/// How the successor of a stage is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextStage {
    Fixed(StageId),
    /// Successor is the specialist for `state.route`.
    ByRoute,
    End,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StageEntry {
    pub next: NextStage,
    pub retry: Option<RetryPolicy>,
}

#[derive(Clone, Debug)]
pub struct StageGraph {
    entries: BTreeMap<StageId, StageEntry>,
}

/// Specialist stage for a route; unset routes go to `general`.
pub fn dispatch_target(route: Option<Route>) -> StageId {
    StageId::Specialist(route.unwrap_or(Route::General))
}

impl StageGraph {
    /// `ingest → router → {specialist} → finalize → end`, with the
    /// configured retry policies on the router and specialist stages.
    pub fn homebrain(config: &PipelineConfig) -> Self {
        let mut entries = BTreeMap::new();

        entries.insert(
            StageId::Ingest,
            StageEntry {
                next: NextStage::Fixed(StageId::Router),
                retry: None,
            },
        );
        entries.insert(
            StageId::Router,
            StageEntry {
                next: NextStage::ByRoute,
                retry: Some(config.classifier_retry.clone()),
            },
        );
        for route in Route::ALL {
            entries.insert(
                StageId::Specialist(route),
                StageEntry {
                    next: NextStage::Fixed(StageId::Finalize),
                    retry: Some(config.specialist_retry.clone()),
                },
            );
        }
        entries.insert(
            StageId::Finalize,
            StageEntry {
                next: NextStage::End,
                retry: None,
            },
        );

        Self { entries }
    }

    pub fn entry(&self, stage: StageId) -> Result<&StageEntry, PipelineError> {
        self.entries
            .get(&stage)
            .ok_or_else(|| PipelineError::GraphInvariant(format!("no entry for stage {stage}")))
    }

    /// Retry policy for `stage`; stages without one run exactly once.
    pub fn retry_for(&self, stage: StageId) -> RetryPolicy {
        self.entries
            .get(&stage)
            .and_then(|e| e.retry.clone())
            .unwrap_or_else(RetryPolicy::no_retry)
    }

    /// Successor of `stage`, `None` at the end of the graph.
    pub fn next(&self, stage: StageId, route: Option<Route>) -> Result<Option<StageId>, PipelineError> {
        Ok(match self.entry(stage)?.next {
            NextStage::Fixed(target) => Some(target),
            NextStage::ByRoute => Some(dispatch_target(route)),
            NextStage::End => None,
        })
    }

    /// Check the table is closed and terminates:
    /// every fixed target exists, every route has a specialist, and walking
    /// from the start always reaches `End`.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.entry(StageId::START)?;

        for (stage, entry) in &self.entries {
            if let NextStage::Fixed(target) = entry.next {
                if !self.entries.contains_key(&target) {
                    return Err(PipelineError::GraphInvariant(format!(
                        "stage {stage} points at missing stage {target}"
                    )));
                }
            }
        }

        for route in Route::ALL {
            let stage = StageId::Specialist(route);
            if !self.entries.contains_key(&stage) {
                return Err(PipelineError::GraphInvariant(format!(
                    "no specialist stage for route {route}"
                )));
            }
        }

        for route in Route::ALL {
            let mut current = Some(StageId::START);
            let mut steps = 0usize;
            while let Some(stage) = current {
                steps += 1;
                if steps > self.entries.len() {
                    return Err(PipelineError::GraphInvariant(format!(
                        "cycle detected from {} on route {route}",
                        StageId::START
                    )));
                }
                current = self.next(stage, Some(route))?;
            }
        }

        Ok(())
    }

    pub fn stages(&self) -> impl Iterator<Item = StageId> + '_ {
        self.entries.keys().copied()
    }

    #[cfg(test)]
    pub(crate) fn with_entry(mut self, stage: StageId, entry: StageEntry) -> Self {
        self.entries.insert(stage, entry);
        self
    }

    #[cfg(test)]
    pub(crate) fn without(mut self, stage: StageId) -> Self {
        self.entries.remove(&stage);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> StageGraph {
        StageGraph::homebrain(&PipelineConfig::default())
    }

    #[test]
    fn test_homebrain_graph_is_valid() {
        let g = graph();
        g.validate().unwrap();
        assert_eq!(g.stages().count(), 7);
    }

    #[test]
    fn test_walk_for_route() {
        let g = graph();
        assert_eq!(g.next(StageId::Ingest, None).unwrap(), Some(StageId::Router));
        assert_eq!(
            g.next(StageId::Router, Some(Route::Homelab)).unwrap(),
            Some(StageId::Specialist(Route::Homelab))
        );
        assert_eq!(
            g.next(StageId::Specialist(Route::Homelab), None).unwrap(),
            Some(StageId::Finalize)
        );
        assert_eq!(g.next(StageId::Finalize, None).unwrap(), None);
    }

    #[test]
    fn test_unset_route_dispatches_general() {
        let g = graph();
        assert_eq!(
            g.next(StageId::Router, None).unwrap(),
            Some(StageId::Specialist(Route::General))
        );
    }

    #[test]
    fn test_router_carries_retry_policy() {
        let g = graph();
        assert_eq!(g.retry_for(StageId::Router).max_attempts, 2);
        assert_eq!(g.retry_for(StageId::Ingest).max_attempts, 1);
    }

    #[test]
    fn test_missing_specialist_rejected() {
        let g = graph().without(StageId::Specialist(Route::Projects));
        assert!(matches!(g.validate(), Err(PipelineError::GraphInvariant(_))));
    }

    #[test]
    fn test_cycle_rejected() {
        let g = graph().with_entry(
            StageId::Finalize,
            StageEntry {
                next: NextStage::Fixed(StageId::Router),
                retry: None,
            },
        );
        assert!(matches!(g.validate(), Err(PipelineError::GraphInvariant(_))));
    }

    #[test]
    fn test_stage_id_serde() {
        let json = serde_json::to_value(StageId::Specialist(Route::Homelab)).unwrap();
        assert_eq!(json, serde_json::json!({"specialist": "homelab"}));
        let back: StageId = serde_json::from_value(serde_json::json!("finalize")).unwrap();
        assert_eq!(back, StageId::Finalize);
    }
}
