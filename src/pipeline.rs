//! Pipeline: per-turn orchestration of actor, services, store, and
//! subscribers.
//!
//! One [`Pipeline::turn`] call processes one request for one session: the
//! context is hydrated from the [`ContextStore`], the
//! [`Actor`](crate::actor::Actor) resolves the next position, the configured
//! [`ServiceGroup`]s run through the
//! [`CoroutineLauncher`](crate::launcher::CoroutineLauncher), their
//! [`ServicePartial`]s merge at a barrier in declaration order, the dirty
//! fields commit exactly once, and every subscriber is notified exactly
//! once. Failures degrade, they do not cascade: a failed service or commit
//! field turns the outcome into [`TurnOutcome::PartialFailure`], and only an
//! unresolvable turn (escalated condition error, store failure before any
//! result) is a hard error.

use chrono::Utc;
use miette::Diagnostic;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

use crate::actor::{Actor, ActorError};
use crate::context::Context;
use crate::label::Label;
use crate::launcher::{CoroutineLauncher, ExecutionMode, FailurePolicy};
use crate::service::{Service, ServiceContext, ServiceError, ServicePartial};
use crate::store::{CommitReport, ContextStore, StoreError};
use crate::subscriber::{ServiceTiming, Subscriber, TurnEvent, TurnOutcome};
use crate::utils::id::IdGenerator;

/// Turn-level failure carrying session identity.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum PipelineError {
    /// Transition resolution aborted (escalated condition error).
    #[error("turn failed for session '{session}': {source}")]
    #[diagnostic(code(colloquy::pipeline::actor))]
    Actor {
        session: String,
        #[source]
        source: ActorError,
    },

    /// The store failed before the turn could produce a result.
    #[error("turn failed for session '{session}': {source}")]
    #[diagnostic(code(colloquy::pipeline::store))]
    Store {
        session: String,
        #[source]
        source: StoreError,
    },
}

/// Whether later groups of the turn still run after a group fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServiceFailurePolicy {
    /// Skip the remaining groups; fields already merged still commit.
    #[default]
    Abort,
    /// Keep running the remaining groups.
    Continue,
}

/// What happens to the turn's writes when a group fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CancellationPolicy {
    /// Commit everything merged before the failure.
    #[default]
    CommitPartial,
    /// Drop the turn's writes; the session replays from the last committed
    /// state.
    DiscardTurn,
}

/// Pipeline tuning knobs.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineConfig {
    pub cancellation_policy: CancellationPolicy,
}

/// Ordered set of services sharing one execution mode.
///
/// Groups run in declaration order; services inside a group run per the
/// group's [`ExecutionMode`].
#[derive(Clone)]
pub struct ServiceGroup {
    services: Vec<Arc<dyn Service>>,
    mode: ExecutionMode,
    failure_policy: FailurePolicy,
    on_error: ServiceFailurePolicy,
}

impl ServiceGroup {
    #[must_use]
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            services: Vec::new(),
            mode,
            failure_policy: FailurePolicy::default(),
            on_error: ServiceFailurePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_service(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    /// Sibling handling when one concurrent service fails.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Whether a failure in this group aborts the remaining groups.
    #[must_use]
    pub fn with_error_policy(mut self, policy: ServiceFailurePolicy) -> Self {
        self.on_error = policy;
        self
    }
}

/// Result of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// The event delivered to subscribers.
    pub event: TurnEvent,
    /// Response text merged from this turn's services, if any produced one.
    pub response: Option<String>,
    /// Field-level commit outcome.
    pub commit: CommitReport,
}

/// Per-turn orchestrator. One pipeline serves any number of sessions.
pub struct Pipeline {
    actor: Actor,
    store: Arc<ContextStore>,
    groups: Vec<ServiceGroup>,
    subscribers: Vec<Arc<dyn Subscriber>>,
    config: PipelineConfig,
    ids: IdGenerator,
}

impl Pipeline {
    #[must_use]
    pub fn new(actor: Actor, store: Arc<ContextStore>) -> Self {
        Self {
            actor,
            store,
            groups: Vec::new(),
            subscribers: Vec::new(),
            config: PipelineConfig::default(),
            ids: IdGenerator::new(),
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: ServiceGroup) -> Self {
        self.groups.push(group);
        self
    }

    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Processes one request for one session.
    ///
    /// Callers must serialize turns per session: at most one `turn` call per
    /// session id may be in flight at a time. Different sessions are fully
    /// independent. Turn N's committed context is what turn N+1 hydrates.
    #[instrument(skip(self, request), fields(session = %session_id))]
    pub async fn turn(
        &self,
        session_id: &str,
        request: &str,
    ) -> Result<TurnReport, PipelineError> {
        // Load phase. A hydration failure is still a turn outcome:
        // subscribers hear about it exactly once before the error surfaces.
        let mut ctx = match self.store.load_context(session_id, self.actor.start()).await {
            Ok(ctx) => ctx,
            Err(source) => {
                let unloaded = Context::new(session_id, self.actor.start().clone());
                self.notify_all(&self.total_failure_event(&unloaded));
                return Err(PipelineError::Store {
                    session: session_id.to_string(),
                    source,
                });
            }
        };
        ctx.turn += 1;
        ctx.set_request(request);

        // Transition phase.
        let decision = match self.actor.advance(&mut ctx) {
            Ok(decision) => decision,
            Err(source) => {
                self.notify_all(&self.total_failure_event(&ctx));
                return Err(PipelineError::Actor {
                    session: session_id.to_string(),
                    source,
                });
            }
        };

        // Service phase: run groups in declaration order, merging each
        // group's partials at a barrier before the next group starts, so a
        // later group reads the effects of earlier ones.
        let mut timings: Vec<ServiceTiming> = Vec::new();
        let mut notes: Vec<String> = Vec::new();
        let mut response: Option<String> = None;
        let mut failed = false;
        for (group_idx, group) in self.groups.iter().enumerate() {
            let snapshot = ctx.snapshot();
            let launcher =
                CoroutineLauncher::new(group.mode).with_failure_policy(group.failure_policy);
            let units = group.services.iter().map(|service| {
                let snapshot = snapshot.clone();
                let service_ctx = ServiceContext {
                    session_id: session_id.to_string(),
                    turn: ctx.turn,
                    service: service.name().to_string(),
                    group: group_idx,
                };
                async move {
                    let started = Instant::now();
                    let partial = service.run(snapshot, service_ctx).await?;
                    let timing = ServiceTiming {
                        service: service.name().to_string(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                    Ok::<_, ServiceError>((timing, partial))
                }
            });

            match launcher.launch(units).await {
                Ok(outputs) => {
                    for (timing, partial) in outputs {
                        timings.push(timing);
                        merge_partial(&mut ctx, &mut response, &mut notes, partial);
                    }
                }
                Err(e) => {
                    tracing::warn!(group = group_idx, error = %e, "service group failed");
                    notes.push(format!("service failure: {e}"));
                    failed = true;
                    if group.on_error == ServiceFailurePolicy::Abort {
                        break;
                    }
                }
            }
        }

        if let Some(text) = &response {
            ctx.set_response(text.clone());
        }

        // Commit phase: exactly one commit per turn, unless the turn's
        // writes are being discarded.
        let discard =
            failed && self.config.cancellation_policy == CancellationPolicy::DiscardTurn;
        let commit = if discard {
            self.store.discard_dirty(session_id);
            CommitReport {
                session_id: session_id.to_string(),
                ..Default::default()
            }
        } else {
            if let Err(source) = self.store.store_context(&ctx) {
                self.notify_all(&self.total_failure_event(&ctx));
                return Err(PipelineError::Store {
                    session: session_id.to_string(),
                    source,
                });
            }
            self.store.commit(session_id).await
        };

        let outcome = if failed || !commit.is_clean() {
            TurnOutcome::PartialFailure
        } else {
            TurnOutcome::Success
        };

        let event = TurnEvent {
            session_id: session_id.to_string(),
            turn: ctx.turn,
            previous: decision.previous.clone(),
            next: decision.next.clone(),
            outcome,
            timings,
            anomalies: decision.anomalies.clone(),
            notes,
            timestamp: Utc::now(),
        };
        self.notify_all(&event);

        Ok(TurnReport {
            event,
            response,
            commit,
        })
    }

    /// Opens a fresh session at the actor's start label and persists it.
    pub async fn open_session(&self, session_id: &str) -> Result<Label, PipelineError> {
        let ctx = Context::new(session_id, self.actor.start().clone());
        self.store
            .store_context(&ctx)
            .map_err(|source| PipelineError::Store {
                session: session_id.to_string(),
                source,
            })?;
        let report = self.store.commit(session_id).await;
        if let Some((field, source)) = report.failed.into_iter().next() {
            tracing::warn!(session = %session_id, field = %field, "session open commit incomplete");
            return Err(PipelineError::Store {
                session: session_id.to_string(),
                source,
            });
        }
        Ok(ctx.current)
    }

    /// Opens a session under a generated UUIDv4 id and returns it.
    pub async fn open_new_session(&self) -> Result<(String, Label), PipelineError> {
        let session_id = self.ids.new_session_id();
        let start = self.open_session(&session_id).await?;
        Ok((session_id, start))
    }

    /// Drops the session's cached store entries.
    pub fn close_session(&self, session_id: &str) {
        self.store.evict(session_id);
    }

    fn total_failure_event(&self, ctx: &Context) -> TurnEvent {
        TurnEvent {
            session_id: ctx.session_id.clone(),
            turn: ctx.turn,
            previous: ctx.current.clone(),
            next: ctx.current.clone(),
            outcome: TurnOutcome::TotalFailure,
            timings: Vec::new(),
            anomalies: Vec::new(),
            notes: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Notifies every subscriber once; failures are logged, never raised.
    fn notify_all(&self, event: &TurnEvent) {
        for subscriber in &self.subscribers {
            if let Err(e) = subscriber.notify(event) {
                tracing::warn!(
                    session = %event.session_id,
                    turn = event.turn,
                    error = %e,
                    "subscriber notification failed"
                );
            }
        }
    }
}

/// Barrier merge of one service partial into the turn's context.
///
/// Declaration order is the merge order: a later service's `response`
/// overwrites an earlier one's, extra keys overwrite key-wise, notes append.
fn merge_partial(
    ctx: &mut Context,
    response: &mut Option<String>,
    notes: &mut Vec<String>,
    partial: ServicePartial,
) {
    if let Some(text) = partial.response {
        *response = Some(text);
    }
    if let Some(extra) = partial.extra {
        for (key, value) in extra {
            ctx.extra.insert(key, value);
        }
    }
    notes.extend(partial.notes);
}
