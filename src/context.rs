//! Per-session conversation state.
//!
//! A [`Context`] is the mutable state carried across turns for a single
//! session: the label history, the current position, the latest
//! request/response pair, and an open-ended `extra` map of tagged values.
//! It is exclusively owned by one session and never shared across sessions;
//! within a turn the [`Actor`](crate::actor::Actor) and the
//! [`Pipeline`](crate::pipeline::Pipeline) mutate it, and the
//! [`ContextStore`](crate::store::ContextStore) persists its dirty fields at
//! the end of the turn.
//!
//! Services never see the `Context` directly. They receive an immutable
//! [`ContextSnapshot`] and hand their changes back as
//! [`ServicePartial`](crate::service::ServicePartial)s, which the pipeline
//! merges at a barrier.
//!
//! # Examples
//!
//! ```rust
//! use colloquy::context::Context;
//! use colloquy::label::Label;
//! use serde_json::json;
//!
//! let mut ctx = Context::new("sess-1", Label::new("greet", "start"));
//! ctx.set_request("hi");
//! ctx.add_extra("locale", json!("en"));
//!
//! let snapshot = ctx.snapshot();
//! assert_eq!(snapshot.last_request.as_deref(), Some("hi"));
//! assert!(snapshot.history.is_empty());
//! ```

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::label::Label;
use crate::utils::collections::new_extra_map;

/// Mutable per-session state carried across turns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Session this context belongs to. One context per session, never shared.
    pub session_id: String,
    /// Number of completed turns. Incremented by the pipeline per turn.
    pub turn: u64,
    /// Current position in the conversation graph.
    pub current: Label,
    /// Visited labels, append-only, ordered by turn sequence.
    pub history: Vec<Label>,
    /// Request text of the turn in flight, if any.
    pub last_request: Option<String>,
    /// Response text produced by the most recent turn, if any.
    pub last_response: Option<String>,
    /// Arbitrary per-session values keyed by name.
    pub extra: FxHashMap<String, Value>,
}

impl Context {
    /// Creates a fresh context positioned at `start` with empty history.
    pub fn new(session_id: impl Into<String>, start: Label) -> Self {
        Self {
            session_id: session_id.into(),
            turn: 0,
            current: start,
            history: Vec::new(),
            last_request: None,
            last_response: None,
            extra: new_extra_map(),
        }
    }

    /// Sets the request text for the turn in flight.
    pub fn set_request(&mut self, request: impl Into<String>) {
        self.last_request = Some(request.into());
    }

    /// Sets the response text produced by the current turn.
    pub fn set_response(&mut self, response: impl Into<String>) {
        self.last_response = Some(response.into());
    }

    /// Inserts a value into the extra map, chaining-friendly.
    pub fn add_extra(&mut self, key: &str, value: Value) -> &mut Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Appends the current label to the history and moves to `next`.
    ///
    /// History is append-only; entries are never rewritten once pushed.
    pub(crate) fn advance_to(&mut self, next: Label) {
        self.history.push(self.current.clone());
        self.current = next;
    }

    /// Creates an immutable point-in-time view of this context.
    ///
    /// The snapshot is independent of the context: later mutations do not
    /// show through. Clones all fields, so cost is proportional to history
    /// and extra-map size.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            session_id: self.session_id.clone(),
            turn: self.turn,
            current: self.current.clone(),
            history: self.history.clone(),
            last_request: self.last_request.clone(),
            last_response: self.last_response.clone(),
            extra: self.extra.clone(),
        }
    }
}

/// Immutable snapshot of a [`Context`] handed to services during a turn.
#[derive(Clone, Debug)]
pub struct ContextSnapshot {
    pub session_id: String,
    pub turn: u64,
    pub current: Label,
    pub history: Vec<Label>,
    pub last_request: Option<String>,
    pub last_response: Option<String>,
    pub extra: FxHashMap<String, Value>,
}
