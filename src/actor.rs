//! Actor: the state machine that advances a conversation through its script.
//!
//! An [`Actor`] owns an immutable [`Script`] plus a start and fallback
//! position, and resolves one transition per turn: conditions are evaluated
//! in descending priority order (declaration order breaks ties), the first
//! condition that holds selects the next [`Label`], and every unresolvable
//! situation lands on the fallback instead of crashing. The actor mutates
//! nothing but the [`Context`] it is handed, so a single actor serves any
//! number of sessions.
//!
//! Anomalies the actor can recover from (missing nodes, failing conditions
//! or handlers) are collected on the returned [`TurnDecision`] rather than
//! raised; only a condition error under
//! [`ConditionErrorPolicy::Escalate`] aborts the turn.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use thiserror::Error;
use tracing::instrument;

use crate::context::Context;
use crate::label::Label;
use crate::script::Script;

/// Fatal script-shape error detected at [`Actor::new`].
///
/// Integrity problems are construction-time failures: an actor that builds
/// successfully can always produce a next label at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ScriptIntegrityError {
    /// The start label does not address an existing node.
    #[error("start label '{label}' does not resolve in the script")]
    #[diagnostic(code(colloquy::actor::start_unresolved))]
    StartUnresolved { label: String },

    /// The fallback label does not address an existing node.
    #[error("fallback label '{label}' does not resolve in the script")]
    #[diagnostic(code(colloquy::actor::fallback_unresolved))]
    FallbackUnresolved { label: String },

    /// The fallback label names a flow but no node; the fallback must be a
    /// concrete position.
    #[error("fallback label '{label}' is flow-scoped; a concrete node is required")]
    #[diagnostic(code(colloquy::actor::fallback_flow_scoped))]
    FallbackFlowScoped { label: String },
}

/// Recoverable per-turn anomaly, resolved by the fallback path and surfaced
/// on the [`TurnDecision`] and the turn's event.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransitionAnomaly {
    /// A label (current position or transition target) addressed no node.
    #[error("label '{label}' does not resolve in the script")]
    MissingNode { label: String },

    /// A transition condition returned an error and was ranked false.
    #[error("condition for target '{target}' at '{at}' failed: {message}")]
    ConditionFailed {
        at: String,
        target: String,
        message: String,
    },

    /// A node's pre or post handler returned an error.
    #[error("{phase} handler at '{at}' failed: {message}")]
    HandlerFailed {
        at: String,
        phase: HandlerPhase,
        message: String,
    },
}

/// Which local handler of a node produced an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerPhase {
    Pre,
    Post,
}

impl std::fmt::Display for HandlerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerPhase::Pre => write!(f, "pre"),
            HandlerPhase::Post => write!(f, "post"),
        }
    }
}

/// Unrecoverable actor error; only produced under
/// [`ConditionErrorPolicy::Escalate`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ActorError {
    #[error("condition for target '{target}' at '{at}' failed: {message}")]
    #[diagnostic(code(colloquy::actor::condition))]
    ConditionFailed {
        at: String,
        target: String,
        message: String,
    },
}

/// How the actor treats a condition closure that returns `Err`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionErrorPolicy {
    /// Rank the condition false, record a [`TransitionAnomaly`], continue.
    #[default]
    TreatAsFalse,
    /// Abort the turn with an [`ActorError`].
    Escalate,
}

/// Actor tuning knobs.
#[derive(Clone, Copy, Debug, Default)]
pub struct ActorConfig {
    pub condition_error_policy: ConditionErrorPolicy,
}

/// Outcome of one transition resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnDecision {
    /// Position before the turn.
    pub previous: Label,
    /// Position chosen for the next turn. Always resolves in the script.
    pub next: Label,
    /// `true` when the fallback path was taken.
    pub fell_back: bool,
    /// Recoverable anomalies encountered while resolving, in occurrence
    /// order.
    pub anomalies: Vec<TransitionAnomaly>,
}

/// Transition-resolution state machine over an immutable [`Script`].
#[derive(Clone)]
pub struct Actor {
    script: Script,
    start: Label,
    fallback: Label,
    config: ActorConfig,
}

// Script holds condition closures, so Debug is summarized by hand.
impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("start", &self.start)
            .field("fallback", &self.fallback)
            .field("config", &self.config)
            .field("nodes", &self.script.node_count())
            .finish_non_exhaustive()
    }
}

impl Actor {
    /// Builds an actor, validating that `start` and `fallback` resolve.
    ///
    /// The fallback must be a concrete flow/node pair: it is the position of
    /// last resort, so it can never itself require fallback resolution.
    pub fn new(
        script: Script,
        start: Label,
        fallback: Label,
        config: ActorConfig,
    ) -> Result<Self, ScriptIntegrityError> {
        if fallback.is_flow_scoped() {
            return Err(ScriptIntegrityError::FallbackFlowScoped {
                label: fallback.encode(),
            });
        }
        if !script.contains(&fallback) {
            return Err(ScriptIntegrityError::FallbackUnresolved {
                label: fallback.encode(),
            });
        }
        if !script.contains(&start) {
            return Err(ScriptIntegrityError::StartUnresolved {
                label: start.encode(),
            });
        }
        Ok(Self {
            script,
            start,
            fallback,
            config,
        })
    }

    #[must_use]
    pub fn start(&self) -> &Label {
        &self.start
    }

    #[must_use]
    pub fn fallback(&self) -> &Label {
        &self.fallback
    }

    #[must_use]
    pub fn script(&self) -> &Script {
        &self.script
    }

    /// Resolves one transition and moves the context to the chosen label.
    ///
    /// Resolution order: look up the current node (missing → fallback), run
    /// its pre handler, evaluate transitions by descending priority with
    /// declaration order breaking ties, take the first condition that holds
    /// (none → fallback), validate the target (unresolvable → fallback), run
    /// the post handler, then append the previous position to the history.
    ///
    /// Every anomaly short of an escalated condition error is recorded on
    /// the decision; a turn always yields exactly one next label.
    #[instrument(skip(self, ctx), fields(session = %ctx.session_id, at = %ctx.current))]
    pub fn advance(&self, ctx: &mut Context) -> Result<TurnDecision, ActorError> {
        let previous = ctx.current.clone();
        let mut anomalies = Vec::new();

        let Some(definition) = self.script.get(&ctx.current) else {
            tracing::warn!(label = %ctx.current, "current label unresolved; falling back");
            anomalies.push(TransitionAnomaly::MissingNode {
                label: ctx.current.encode(),
            });
            let next = self.fallback.clone();
            ctx.advance_to(next.clone());
            return Ok(TurnDecision {
                previous,
                next,
                fell_back: true,
                anomalies,
            });
        };
        let definition = definition.clone();

        if let Some(pre) = &definition.pre {
            if let Err(e) = pre(ctx) {
                anomalies.push(TransitionAnomaly::HandlerFailed {
                    at: previous.encode(),
                    phase: HandlerPhase::Pre,
                    message: e.message,
                });
            }
        }

        // Stable sort: equal priorities keep declaration order. A priority
        // attached to the target label overrides the transition's own.
        let mut ranked: Vec<_> = definition.transitions.iter().collect();
        ranked.sort_by_key(|t| Reverse(t.target.priority.unwrap_or(t.priority)));

        let mut chosen: Option<&Label> = None;
        for transition in ranked {
            match (transition.condition)(ctx) {
                Ok(true) => {
                    chosen = Some(&transition.target);
                    break;
                }
                Ok(false) => {}
                Err(e) => match self.config.condition_error_policy {
                    ConditionErrorPolicy::TreatAsFalse => {
                        anomalies.push(TransitionAnomaly::ConditionFailed {
                            at: previous.encode(),
                            target: transition.target.encode(),
                            message: e.message,
                        });
                    }
                    ConditionErrorPolicy::Escalate => {
                        return Err(ActorError::ConditionFailed {
                            at: previous.encode(),
                            target: transition.target.encode(),
                            message: e.message,
                        });
                    }
                },
            }
        }

        let mut fell_back = false;
        let next = match chosen {
            Some(target) if self.script.contains(target) => {
                // Strip any bookkeeping priority; the context tracks
                // position only.
                let mut next = target.clone();
                next.priority = None;
                next
            }
            Some(target) => {
                tracing::warn!(target = %target, "transition target unresolved; falling back");
                anomalies.push(TransitionAnomaly::MissingNode {
                    label: target.encode(),
                });
                fell_back = true;
                self.fallback.clone()
            }
            None => {
                fell_back = true;
                self.fallback.clone()
            }
        };

        if let Some(post) = &definition.post {
            if let Err(e) = post(ctx) {
                anomalies.push(TransitionAnomaly::HandlerFailed {
                    at: previous.encode(),
                    phase: HandlerPhase::Post,
                    message: e.message,
                });
            }
        }

        ctx.advance_to(next.clone());
        tracing::debug!(next = %next, fell_back, anomalies = anomalies.len(), "transition resolved");

        Ok(TurnDecision {
            previous,
            next,
            fell_back,
            anomalies,
        })
    }
}
