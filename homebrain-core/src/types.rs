use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ─── Route ────────────────────────────────────────────────────

/// Specialist category selected for a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Personal,
    Projects,
    Homelab,
    General,
}

impl Route {
    /// Every valid route, in the order offered to the user during clarification.
    pub const ALL: [Route; 4] = [
        Route::Personal,
        Route::Projects,
        Route::Homelab,
        Route::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Projects => "projects",
            Self::Homelab => "homelab",
            Self::General => "general",
        }
    }

    /// Exact, case-sensitive match against the route names.
    pub fn parse(s: &str) -> Option<Route> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error type for parsing a [`Route`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown route '{0}'. Valid values: personal, projects, homelab, general")]
pub struct UnknownRoute(pub String);

impl FromStr for Route {
    type Err = UnknownRoute;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Route::parse(s).ok_or_else(|| UnknownRoute(s.to_string()))
    }
}

// ─── Messages ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
        }
    }
}

// ─── Route decision ───────────────────────────────────────────

/// Outcome of classification, folded into [`ConversationState`] by the router.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: Route,
    pub confidence: f64,
    pub reason: String,
    pub needs_human_review: bool,
}

impl RouteDecision {
    pub const CLASSIFY_ERROR: &'static str = "classify_error";
    pub const INVALID_ROUTE: &'static str = "invalid_route_from_model";
    pub const EMPTY_MESSAGE: &'static str = "empty_user_message";
    pub const USER_SELECTED: &'static str = "user_selected_route";

    /// Deterministic decision used when the classification capability fails.
    pub fn classify_error() -> Self {
        Self {
            route: Route::General,
            confidence: 0.1,
            reason: Self::CLASSIFY_ERROR.to_string(),
            needs_human_review: false,
        }
    }

    pub fn empty_message() -> Self {
        Self {
            route: Route::General,
            confidence: 0.0,
            reason: Self::EMPTY_MESSAGE.to_string(),
            needs_human_review: true,
        }
    }

    pub fn user_selected(route: Route) -> Self {
        Self {
            route,
            confidence: 0.99,
            reason: Self::USER_SELECTED.to_string(),
            needs_human_review: false,
        }
    }

    pub fn into_update(self) -> StateUpdate {
        StateUpdate::default()
            .with_route(self.route)
            .with_route_confidence(self.confidence)
            .with_route_reason(self.reason)
            .with_needs_human_review(self.needs_human_review)
    }
}

// ─── Conversation state ───────────────────────────────────────

/// Persisted, mutable turn context for one thread.
///
/// `messages` is private: the only way to change it is to append, so a merge
/// can never reorder or drop history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    pub route: Option<Route>,
    #[serde(default)]
    pub route_confidence: f64,
    #[serde(default)]
    pub route_reason: String,
    #[serde(default)]
    pub needs_human_review: bool,
    #[serde(default)]
    pub retrieved_context: String,
    #[serde(default)]
    pub tool_results: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Apply a partial update field by field. Messages are appended; every
    /// other field is replaced only when the update carries a value for it.
    pub fn merge(&mut self, update: StateUpdate) {
        let StateUpdate {
            messages,
            route,
            route_confidence,
            route_reason,
            needs_human_review,
            retrieved_context,
            tool_results,
            error,
        } = update;

        self.messages.extend(messages);
        if let Some(route) = route {
            self.route = Some(route);
        }
        if let Some(confidence) = route_confidence {
            self.route_confidence = confidence;
        }
        if let Some(reason) = route_reason {
            self.route_reason = reason;
        }
        if let Some(flag) = needs_human_review {
            self.needs_human_review = flag;
        }
        if let Some(context) = retrieved_context {
            self.retrieved_context = context;
        }
        if let Some(results) = tool_results {
            self.tool_results = results;
        }
        if let Some(error) = error {
            self.error = error;
        }
    }
}

/// Partial update returned by a stage. `None` leaves the field untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub route: Option<Route>,
    pub route_confidence: Option<f64>,
    pub route_reason: Option<String>,
    pub needs_human_review: Option<bool>,
    pub retrieved_context: Option<String>,
    pub tool_results: Option<BTreeMap<String, serde_json::Value>>,
    /// `Some(None)` clears the error, `Some(Some(_))` sets it.
    pub error: Option<Option<String>>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.route = Some(route);
        self
    }

    pub fn with_route_confidence(mut self, confidence: f64) -> Self {
        self.route_confidence = Some(confidence);
        self
    }

    pub fn with_route_reason(mut self, reason: impl Into<String>) -> Self {
        self.route_reason = Some(reason.into());
        self
    }

    pub fn with_needs_human_review(mut self, flag: bool) -> Self {
        self.needs_human_review = Some(flag);
        self
    }

    pub fn with_retrieved_context(mut self, context: impl Into<String>) -> Self {
        self.retrieved_context = Some(context.into());
        self
    }

    pub fn with_tool_result(mut self, tool: impl Into<String>, result: serde_json::Value) -> Self {
        self.tool_results
            .get_or_insert_with(BTreeMap::new)
            .insert(tool.into(), result);
        self
    }

    pub fn with_tool_results(mut self, results: BTreeMap<String, serde_json::Value>) -> Self {
        self.tool_results = Some(results);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }
}
