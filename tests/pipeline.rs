//! End-to-end turn orchestration: merge, commit-once, notify-once.

mod common;

use colloquy::label::Label;
use colloquy::launcher::ExecutionMode;
use colloquy::pipeline::{
    CancellationPolicy, Pipeline, PipelineConfig, ServiceFailurePolicy, ServiceGroup,
};
use colloquy::store::{fields, ContextStore};
use colloquy::subscriber::{
    MemorySubscriber, NotifyError, Subscriber, TurnEvent, TurnOutcome,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

use common::{
    greet_actor, CountingStorage, EchoService, FailingService, RecordingService,
};

fn greet_pipeline(backend: CountingStorage) -> (Pipeline, MemorySubscriber) {
    let store = Arc::new(ContextStore::new(Arc::new(backend)));
    let subscriber = MemorySubscriber::new();
    let pipeline = Pipeline::new(greet_actor(), store)
        .with_group(ServiceGroup::new(ExecutionMode::Concurrent).with_service(Arc::new(EchoService)))
        .with_subscriber(Arc::new(subscriber.clone()));
    (pipeline, subscriber)
}

#[tokio::test]
async fn greet_turn_routes_and_responds() {
    let (pipeline, subscriber) = greet_pipeline(CountingStorage::new());

    let report = pipeline.turn("s", "hi").await.unwrap();

    assert_eq!(report.event.outcome, TurnOutcome::Success);
    assert_eq!(report.event.previous, Label::new("greet", "start"));
    assert_eq!(report.event.next, Label::new("greet", "hello"));
    assert_eq!(report.response.as_deref(), Some("echo: hi"));
    assert!(report.commit.is_clean());

    // Exactly one notification for the turn.
    let events = subscriber.snapshot();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].turn, 1);
}

#[tokio::test]
async fn unmatched_request_falls_back() {
    let (pipeline, _subscriber) = greet_pipeline(CountingStorage::new());

    let report = pipeline.turn("s", "bye").await.unwrap();
    assert_eq!(report.event.next, Label::new("greet", "fallback"));
    assert_eq!(report.event.outcome, TurnOutcome::Success);
}

#[tokio::test]
async fn committed_turn_is_visible_to_the_next_turn() {
    let backend = CountingStorage::new();
    let (pipeline, subscriber) = greet_pipeline(backend.clone());

    pipeline.turn("s", "hi").await.unwrap();
    // hello loops back to start unconditionally.
    let report = pipeline.turn("s", "whatever").await.unwrap();

    assert_eq!(report.event.previous, Label::new("greet", "hello"));
    assert_eq!(report.event.next, Label::new("greet", "start"));
    assert_eq!(report.event.turn, 2);
    assert_eq!(subscriber.len(), 2);

    // Each turn persisted the position exactly once.
    assert_eq!(backend.persist_count("s", fields::CURRENT), 2);
}

#[tokio::test]
async fn failing_service_degrades_to_partial_failure_and_commits_partial() {
    let backend = CountingStorage::new();
    let store = Arc::new(ContextStore::new(Arc::new(backend.clone())));
    let subscriber = MemorySubscriber::new();
    let pipeline = Pipeline::new(greet_actor(), Arc::clone(&store))
        .with_group(
            ServiceGroup::new(ExecutionMode::Concurrent).with_service(Arc::new(EchoService)),
        )
        .with_group(
            ServiceGroup::new(ExecutionMode::Concurrent).with_service(Arc::new(FailingService)),
        )
        .with_subscriber(Arc::new(subscriber.clone()));

    let report = pipeline.turn("s", "hi").await.unwrap();

    assert_eq!(report.event.outcome, TurnOutcome::PartialFailure);
    assert!(report.event.notes.iter().any(|n| n.contains("boom")));
    assert_eq!(subscriber.len(), 1);

    // The first group's work was merged and committed before the failure.
    let extra = store.get("s", fields::EXTRA).await.unwrap().unwrap();
    assert_eq!(extra.get("echoed"), Some(&json!(true)));
}

#[tokio::test]
async fn abort_policy_skips_later_groups() {
    let log: Arc<Mutex<Vec<String>>> = Arc::default();
    let store = Arc::new(ContextStore::new(Arc::new(CountingStorage::new())));
    let pipeline = Pipeline::new(greet_actor(), store)
        .with_group(
            ServiceGroup::new(ExecutionMode::Concurrent)
                .with_service(Arc::new(FailingService))
                .with_error_policy(ServiceFailurePolicy::Abort),
        )
        .with_group(
            ServiceGroup::new(ExecutionMode::Concurrent)
                .with_service(Arc::new(RecordingService::new("late", log.clone()))),
        );

    pipeline.turn("s", "hi").await.unwrap();
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn continue_policy_runs_later_groups() {
    let log: Arc<Mutex<Vec<String>>> = Arc::default();
    let store = Arc::new(ContextStore::new(Arc::new(CountingStorage::new())));
    let pipeline = Pipeline::new(greet_actor(), store)
        .with_group(
            ServiceGroup::new(ExecutionMode::Concurrent)
                .with_service(Arc::new(FailingService))
                .with_error_policy(ServiceFailurePolicy::Continue),
        )
        .with_group(
            ServiceGroup::new(ExecutionMode::Concurrent)
                .with_service(Arc::new(RecordingService::new("late", log.clone()))),
        );

    let report = pipeline.turn("s", "hi").await.unwrap();
    assert_eq!(report.event.outcome, TurnOutcome::PartialFailure);
    assert_eq!(*log.lock().unwrap(), vec!["late".to_string()]);
}

#[tokio::test]
async fn discard_turn_policy_leaves_backend_untouched() {
    let backend = CountingStorage::new();
    let store = Arc::new(ContextStore::new(Arc::new(backend.clone())));
    let pipeline = Pipeline::new(greet_actor(), Arc::clone(&store))
        .with_group(
            ServiceGroup::new(ExecutionMode::Concurrent).with_service(Arc::new(FailingService)),
        )
        .with_config(PipelineConfig {
            cancellation_policy: CancellationPolicy::DiscardTurn,
        });

    let report = pipeline.turn("s", "hi").await.unwrap();

    assert_eq!(report.event.outcome, TurnOutcome::PartialFailure);
    assert!(report.commit.committed.is_empty());
    assert_eq!(backend.persist_count("s", fields::CURRENT), 0);

    // The session replays from its last committed state.
    let ctx = store
        .load_context("s", &Label::new("greet", "start"))
        .await
        .unwrap();
    assert_eq!(ctx.turn, 0);
}

#[tokio::test]
async fn sequential_group_runs_services_in_declaration_order() {
    let log: Arc<Mutex<Vec<String>>> = Arc::default();
    let store = Arc::new(ContextStore::new(Arc::new(CountingStorage::new())));
    let mut slow = RecordingService::new("first", log.clone());
    slow.delay = Some(std::time::Duration::from_millis(20));
    let pipeline = Pipeline::new(greet_actor(), store).with_group(
        ServiceGroup::new(ExecutionMode::Sequential)
            .with_service(Arc::new(slow))
            .with_service(Arc::new(RecordingService::new("second", log.clone()))),
    );

    pipeline.turn("s", "hi").await.unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["first".to_string(), "second".to_string()]
    );
}

#[tokio::test]
async fn subscriber_failure_never_fails_the_turn() {
    struct BrokenSubscriber;
    impl Subscriber for BrokenSubscriber {
        fn notify(&self, _event: &TurnEvent) -> Result<(), NotifyError> {
            Err(NotifyError::msg("sink offline"))
        }
    }

    let store = Arc::new(ContextStore::new(Arc::new(CountingStorage::new())));
    let healthy = MemorySubscriber::new();
    let pipeline = Pipeline::new(greet_actor(), store)
        .with_subscriber(Arc::new(BrokenSubscriber))
        .with_subscriber(Arc::new(healthy.clone()));

    let report = pipeline.turn("s", "hi").await.unwrap();
    assert_eq!(report.event.outcome, TurnOutcome::Success);
    assert_eq!(healthy.len(), 1);
}

#[tokio::test]
async fn load_failure_still_notifies_subscribers_once() {
    struct DeadStorage;

    #[async_trait::async_trait]
    impl colloquy::store::FieldStorage for DeadStorage {
        async fn fetch(
            &self,
            _session_id: &str,
            _field: &str,
        ) -> Result<Option<serde_json::Value>, colloquy::store::StorageError> {
            Err(colloquy::store::StorageError::msg("backend down"))
        }

        async fn persist(
            &self,
            _session_id: &str,
            _field: &str,
            _value: &serde_json::Value,
        ) -> Result<(), colloquy::store::StorageError> {
            Ok(())
        }
    }

    let store = Arc::new(ContextStore::new(Arc::new(DeadStorage)));
    let subscriber = MemorySubscriber::new();
    let pipeline = Pipeline::new(greet_actor(), store)
        .with_subscriber(Arc::new(subscriber.clone()));

    let err = pipeline.turn("s", "hi").await.unwrap_err();
    assert!(matches!(err, colloquy::pipeline::PipelineError::Store { .. }));

    // The hydration failure is a turn outcome: exactly one notification.
    let events = subscriber.snapshot();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, TurnOutcome::TotalFailure);
    assert_eq!(events[0].previous, Label::new("greet", "start"));
}

#[tokio::test]
async fn open_and_close_session_lifecycle() {
    let store = Arc::new(ContextStore::new(Arc::new(CountingStorage::new())));
    let pipeline = Pipeline::new(greet_actor(), Arc::clone(&store));

    let (session_id, start) = pipeline.open_new_session().await.unwrap();
    assert!(!session_id.is_empty());
    assert_eq!(start, Label::new("greet", "start"));

    let report = pipeline.turn(&session_id, "hi").await.unwrap();
    assert_eq!(report.event.next, Label::new("greet", "hello"));

    pipeline.close_session(&session_id);
}
