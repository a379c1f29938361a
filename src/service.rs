//! Service trait and partial-update contract.
//!
//! A [`Service`] is one asynchronous unit of turn work (response generation,
//! enrichment, side lookups). Services never touch the
//! [`Context`](crate::context::Context) directly: each receives an immutable
//! [`ContextSnapshot`] plus a [`ServiceContext`] describing its place in the
//! turn, and returns a [`ServicePartial`] with only the fields it wants to
//! change. The [`Pipeline`](crate::pipeline::Pipeline) merges all partials
//! of a turn at a barrier, in service declaration order, so concurrent
//! services compose deterministically.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::context::ContextSnapshot;

/// Error raised inside a service. Whether it aborts the rest of the turn's
/// groups is the group's
/// [`ServiceFailurePolicy`](crate::pipeline::ServiceFailurePolicy).
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ServiceError {
    /// The service could not produce its partial.
    #[error("service '{service}' failed: {message}")]
    #[diagnostic(code(colloquy::service::failed))]
    Failed { service: String, message: String },

    /// The service was missing an input it requires from the snapshot.
    #[error("service '{service}' missing input: {what}")]
    #[diagnostic(code(colloquy::service::missing_input))]
    MissingInput { service: String, what: String },
}

/// Per-invocation information handed to a service alongside the snapshot.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    /// Session whose turn is running.
    pub session_id: String,
    /// Turn number being processed.
    pub turn: u64,
    /// Name the service was registered under.
    pub service: String,
    /// Index of the group the service runs in.
    pub group: usize,
}

/// Partial context update produced by one service.
///
/// `None` means "no change"; the merge only applies fields a service
/// actually set. When several services of a turn set the same field, the
/// last one in declaration order wins for `response`, while `extra` merges
/// key-wise (later keys overwrite earlier ones) and `notes` concatenate.
#[derive(Debug, Clone, Default)]
pub struct ServicePartial {
    /// Replacement response text for the turn.
    pub response: Option<String>,
    /// Extra-map entries to insert or overwrite.
    pub extra: Option<FxHashMap<String, Value>>,
    /// Free-form observations surfaced on the turn event.
    pub notes: Vec<String>,
}

impl ServicePartial {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra
            .get_or_insert_with(FxHashMap::default)
            .insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// One asynchronous unit of turn work.
///
/// Implementations must be `Send + Sync`; the pipeline may run several
/// concurrently over the same snapshot.
#[async_trait]
pub trait Service: Send + Sync {
    /// Short stable name used in events, errors, and per-service timings.
    fn name(&self) -> &str;

    async fn run(
        &self,
        snapshot: ContextSnapshot,
        ctx: ServiceContext,
    ) -> Result<ServicePartial, ServiceError>;
}
