//! Script definition: the static description of all flows, nodes, and
//! transitions in a conversation graph.
//!
//! A [`Script`] maps flow names to node names to [`NodeDefinition`]s. Each
//! node definition carries an ordered list of [`Transition`]s (condition,
//! target label, priority) plus optional pre/post handlers that run around
//! transition resolution. Scripts are built through the fluent
//! [`ScriptBuilder`] and are immutable once built; the
//! [`Actor`](crate::actor::Actor) only ever reads them.
//!
//! Structured-configuration loading (YAML and friends) is an external
//! collaborator: a front end parses its format and drives the builder.
//!
//! # Quick Start
//!
//! ```rust
//! use colloquy::script::{conditions, NodeDefinition, Script};
//! use colloquy::label::Label;
//!
//! let script = Script::builder()
//!     .add_node(
//!         "greet",
//!         "start",
//!         NodeDefinition::new().with_transition(
//!             conditions::request_equals("hi"),
//!             Label::new("greet", "hello"),
//!             1,
//!         ),
//!     )
//!     .add_node("greet", "hello", NodeDefinition::new())
//!     .add_node("greet", "fallback", NodeDefinition::new())
//!     .build();
//!
//! assert!(script.contains(&Label::new("greet", "hello")));
//! ```

use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::context::Context;
use crate::label::Label;

/// Error raised by a condition or handler closure during evaluation.
///
/// Carried as a plain message so anomalies stay cloneable and serializable
/// when surfaced through turn events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn msg<M: Into<String>>(m: M) -> Self {
        Self { message: m.into() }
    }
}

/// Predicate deciding whether a transition fires.
///
/// Conditions are synchronous, read-only over the context, and must not
/// suspend; an `Err` is treated according to the actor's configured
/// [`ConditionErrorPolicy`](crate::actor::ConditionErrorPolicy).
pub type Condition = Arc<dyn Fn(&Context) -> Result<bool, EvalError> + Send + Sync + 'static>;

/// Local handler run before or after transition resolution for one node.
pub type Handler = Arc<dyn Fn(&mut Context) -> Result<(), EvalError> + Send + Sync + 'static>;

/// One outgoing transition of a node.
#[derive(Clone)]
pub struct Transition {
    /// Predicate gating this transition.
    pub condition: Condition,
    /// Label to move to when the condition holds.
    pub target: Label,
    /// Resolution priority; higher wins, declaration order breaks ties.
    pub priority: i64,
}

impl Transition {
    pub fn new(condition: Condition, target: Label, priority: i64) -> Self {
        Self {
            condition,
            target,
            priority,
        }
    }
}

/// Definition of a single node: its transitions and optional local handlers.
#[derive(Clone, Default)]
pub struct NodeDefinition {
    /// Outgoing transitions in declaration order.
    pub transitions: Vec<Transition>,
    /// Handler run before transition conditions are evaluated.
    pub pre: Option<Handler>,
    /// Handler run after the next label has been chosen.
    pub post: Option<Handler>,
}

impl NodeDefinition {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transition. Declaration order is significant: it breaks
    /// priority ties deterministically.
    #[must_use]
    pub fn with_transition(mut self, condition: Condition, target: Label, priority: i64) -> Self {
        self.transitions
            .push(Transition::new(condition, target, priority));
        self
    }

    /// Sets the pre-resolution handler.
    #[must_use]
    pub fn with_pre(mut self, handler: Handler) -> Self {
        self.pre = Some(handler);
        self
    }

    /// Sets the post-resolution handler.
    #[must_use]
    pub fn with_post(mut self, handler: Handler) -> Self {
        self.post = Some(handler);
        self
    }
}

/// The static definition of all flows, nodes, and their transitions.
#[derive(Clone, Default)]
pub struct Script {
    flows: FxHashMap<String, FxHashMap<String, NodeDefinition>>,
}

impl Script {
    /// Creates a builder for constructing a script with a fluent API.
    #[must_use]
    pub fn builder() -> ScriptBuilder {
        ScriptBuilder::default()
    }

    /// Looks up the node definition addressed by `label`.
    ///
    /// Flow-scoped labels (no node component) never resolve directly; the
    /// actor routes them through its fallback path.
    #[must_use]
    pub fn get(&self, label: &Label) -> Option<&NodeDefinition> {
        let node = label.node.as_deref()?;
        self.flows.get(&label.flow)?.get(node)
    }

    /// Returns `true` if `label` addresses an existing flow/node pair.
    #[must_use]
    pub fn contains(&self, label: &Label) -> bool {
        self.get(label).is_some()
    }

    /// All flow names, in no particular order.
    pub fn flow_names(&self) -> impl Iterator<Item = &str> {
        self.flows.keys().map(String::as_str)
    }

    /// Node labels of one flow, in no particular order.
    pub fn node_labels(&self, flow: &str) -> impl Iterator<Item = Label> + '_ {
        let flow_name = flow.to_string();
        self.flows
            .get(flow)
            .into_iter()
            .flat_map(move |nodes| {
                let flow_name = flow_name.clone();
                nodes
                    .keys()
                    .map(move |node| Label::new(flow_name.clone(), node.clone()))
            })
    }

    /// Total number of nodes across all flows.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.flows.values().map(FxHashMap::len).sum()
    }
}

/// Builder for constructing [`Script`]s with a fluent API.
#[derive(Clone, Default)]
pub struct ScriptBuilder {
    flows: FxHashMap<String, FxHashMap<String, NodeDefinition>>,
}

impl ScriptBuilder {
    /// Registers a node definition under `flow`/`node`.
    ///
    /// Re-registering the same flow/node pair replaces the earlier
    /// definition, last write wins.
    #[must_use]
    pub fn add_node(
        mut self,
        flow: impl Into<String>,
        node: impl Into<String>,
        definition: NodeDefinition,
    ) -> Self {
        self.flows
            .entry(flow.into())
            .or_default()
            .insert(node.into(), definition);
        self
    }

    pub fn build(self) -> Script {
        Script { flows: self.flows }
    }
}

/// Convenience condition constructors.
pub mod conditions {
    use super::{Condition, EvalError};
    use std::sync::Arc;

    /// Always fires.
    pub fn always() -> Condition {
        Arc::new(|_| Ok(true))
    }

    /// Never fires.
    pub fn never() -> Condition {
        Arc::new(|_| Ok(false))
    }

    /// Fires when the turn's request text equals `expected` exactly.
    pub fn request_equals(expected: impl Into<String>) -> Condition {
        let expected = expected.into();
        Arc::new(move |ctx| Ok(ctx.last_request.as_deref() == Some(expected.as_str())))
    }

    /// Fires when the turn's request text contains `needle`.
    pub fn request_contains(needle: impl Into<String>) -> Condition {
        let needle = needle.into();
        Arc::new(move |ctx| {
            Ok(ctx
                .last_request
                .as_deref()
                .is_some_and(|req| req.contains(needle.as_str())))
        })
    }

    /// Always errors with `message`; useful for exercising the actor's
    /// condition-error policy in tests.
    pub fn failing(message: impl Into<String>) -> Condition {
        let message = message.into();
        Arc::new(move |_| Err(EvalError::msg(message.clone())))
    }
}
