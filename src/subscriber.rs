//! Turn observation: events and subscribers.
//!
//! After each turn the [`Pipeline`](crate::pipeline::Pipeline) builds one
//! immutable [`TurnEvent`] and hands it to every registered [`Subscriber`]
//! exactly once. Subscribers are passive observers: a failing or slow
//! subscriber must never affect the turn, so notification errors are
//! swallowed and logged by the caller.
//!
//! Three implementations ship with the crate: [`TracingSubscriber`] for
//! structured logs, [`ChannelSubscriber`] to bridge events into a flume
//! channel, and [`MemorySubscriber`] for test assertions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::actor::TransitionAnomaly;
use crate::label::Label;

/// Overall outcome of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Every group ran and the commit was clean.
    Success,
    /// The turn produced a result but something went wrong along the way:
    /// a failed service, a failed commit field, or an aborted group chain.
    PartialFailure,
    /// The turn could not produce a next position at all.
    TotalFailure,
}

/// Wall-clock timing of one service invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTiming {
    pub service: String,
    pub elapsed_ms: u64,
}

/// Write-once snapshot of a completed turn.
///
/// Built by the pipeline after the commit; subscribers receive a shared
/// reference and must not retain interior mutability expectations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEvent {
    pub session_id: String,
    pub turn: u64,
    /// Position before the turn.
    pub previous: Label,
    /// Position after the turn.
    pub next: Label,
    pub outcome: TurnOutcome,
    /// Per-service wall-clock timings, in completion-merge order.
    pub timings: Vec<ServiceTiming>,
    /// Recoverable anomalies from transition resolution.
    pub anomalies: Vec<TransitionAnomaly>,
    /// Free-form service notes.
    pub notes: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl TurnEvent {
    /// JSON rendering for export surfaces.
    pub fn to_json_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Error raised by a subscriber; logged and swallowed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NotifyError {
    pub message: String,
}

impl NotifyError {
    pub fn msg<M: Into<String>>(m: M) -> Self {
        Self { message: m.into() }
    }
}

/// Passive observer of turn outcomes.
///
/// `notify` must return promptly; do slow work on the far side of a
/// channel. The pipeline never blocks a turn on a subscriber.
pub trait Subscriber: Send + Sync {
    fn notify(&self, event: &TurnEvent) -> Result<(), NotifyError>;
}

/// Logs each turn event through `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSubscriber;

impl Subscriber for TracingSubscriber {
    fn notify(&self, event: &TurnEvent) -> Result<(), NotifyError> {
        tracing::info!(
            session = %event.session_id,
            turn = event.turn,
            previous = %event.previous,
            next = %event.next,
            outcome = ?event.outcome,
            anomalies = event.anomalies.len(),
            "turn completed"
        );
        Ok(())
    }
}

/// Forwards turn events into a flume channel for out-of-band consumers.
#[derive(Clone)]
pub struct ChannelSubscriber {
    sender: flume::Sender<TurnEvent>,
}

impl ChannelSubscriber {
    /// Creates a subscriber and the receiver its events arrive on.
    #[must_use]
    pub fn unbounded() -> (Self, flume::Receiver<TurnEvent>) {
        let (sender, receiver) = flume::unbounded();
        (Self { sender }, receiver)
    }

    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, flume::Receiver<TurnEvent>) {
        let (sender, receiver) = flume::bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl Subscriber for ChannelSubscriber {
    fn notify(&self, event: &TurnEvent) -> Result<(), NotifyError> {
        self.sender
            .try_send(event.clone())
            .map_err(|e| NotifyError::msg(e.to_string()))
    }
}

/// Collects events in memory; intended for tests.
#[derive(Clone, Default)]
pub struct MemorySubscriber {
    events: Arc<Mutex<Vec<TurnEvent>>>,
}

impl MemorySubscriber {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events received so far, in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TurnEvent> {
        self.events.lock().expect("subscriber events poisoned").clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().expect("subscriber events poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Subscriber for MemorySubscriber {
    fn notify(&self, event: &TurnEvent) -> Result<(), NotifyError> {
        self.events
            .lock()
            .expect("subscriber events poisoned")
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> TurnEvent {
        TurnEvent {
            session_id: "s".into(),
            turn: 1,
            previous: Label::new("greet", "start"),
            next: Label::new("greet", "hello"),
            outcome: TurnOutcome::Success,
            timings: vec![],
            anomalies: vec![],
            notes: vec![],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn memory_subscriber_records_in_order() {
        let sub = MemorySubscriber::new();
        sub.notify(&sample_event()).unwrap();
        let mut second = sample_event();
        second.turn = 2;
        sub.notify(&second).unwrap();

        let events = sub.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].turn, 2);
    }

    #[test]
    fn channel_subscriber_forwards() {
        let (sub, rx) = ChannelSubscriber::unbounded();
        sub.notify(&sample_event()).unwrap();
        assert_eq!(rx.try_recv().unwrap().turn, 1);
    }
}
