//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use colloquy::actor::{Actor, ActorConfig};
use colloquy::context::ContextSnapshot;
use colloquy::label::Label;
use colloquy::script::{conditions, NodeDefinition, Script};
use colloquy::service::{Service, ServiceContext, ServiceError, ServicePartial};
use colloquy::store::{FieldStorage, InMemoryStorage, StorageError};
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Three-node greeting flow: `start` routes "hi" to `hello`, everything
/// else falls back; `hello` and `fallback` loop back to `start`.
pub fn greet_script() -> Script {
    Script::builder()
        .add_node(
            "greet",
            "start",
            NodeDefinition::new().with_transition(
                conditions::request_equals("hi"),
                Label::new("greet", "hello"),
                2,
            ),
        )
        .add_node(
            "greet",
            "hello",
            NodeDefinition::new().with_transition(
                conditions::always(),
                Label::new("greet", "start"),
                1,
            ),
        )
        .add_node(
            "greet",
            "fallback",
            NodeDefinition::new().with_transition(
                conditions::always(),
                Label::new("greet", "start"),
                1,
            ),
        )
        .build()
}

pub fn greet_actor() -> Actor {
    Actor::new(
        greet_script(),
        Label::new("greet", "start"),
        Label::new("greet", "fallback"),
        ActorConfig::default(),
    )
    .expect("greet script is well formed")
}

/// Backend wrapper counting fetches per (session, field); the single-flight
/// assertions hang off these counts. An optional delay widens the window in
/// which concurrent gets overlap.
#[derive(Clone)]
pub struct CountingStorage {
    inner: InMemoryStorage,
    fetches: Arc<Mutex<FxHashMap<(String, String), usize>>>,
    persists: Arc<Mutex<FxHashMap<(String, String), usize>>>,
    fetch_delay: Option<Duration>,
}

impl CountingStorage {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStorage::new(),
            fetches: Arc::new(Mutex::new(FxHashMap::default())),
            persists: Arc::new(Mutex::new(FxHashMap::default())),
            fetch_delay: None,
        }
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Seeds a value directly in the backend, bypassing any store.
    pub async fn seed(&self, session: &str, field: &str, value: Value) {
        self.inner
            .persist(session, field, &value)
            .await
            .expect("in-memory persist is infallible");
    }

    pub fn fetch_count(&self, session: &str, field: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(&(session.to_string(), field.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn persist_count(&self, session: &str, field: &str) -> usize {
        self.persists
            .lock()
            .unwrap()
            .get(&(session.to_string(), field.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl FieldStorage for CountingStorage {
    async fn fetch(&self, session_id: &str, field: &str) -> Result<Option<Value>, StorageError> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry((session_id.to_string(), field.to_string()))
            .or_insert(0) += 1;
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.fetch(session_id, field).await
    }

    async fn persist(
        &self,
        session_id: &str,
        field: &str,
        value: &Value,
    ) -> Result<(), StorageError> {
        *self
            .persists
            .lock()
            .unwrap()
            .entry((session_id.to_string(), field.to_string()))
            .or_insert(0) += 1;
        self.inner.persist(session_id, field, value).await
    }
}

/// Backend whose persist fails for a fixed set of field names.
#[derive(Clone)]
pub struct FailingFieldStorage {
    inner: InMemoryStorage,
    failing: Vec<String>,
}

impl FailingFieldStorage {
    pub fn failing_on(fields: &[&str]) -> Self {
        Self {
            inner: InMemoryStorage::new(),
            failing: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[async_trait]
impl FieldStorage for FailingFieldStorage {
    async fn fetch(&self, session_id: &str, field: &str) -> Result<Option<Value>, StorageError> {
        self.inner.fetch(session_id, field).await
    }

    async fn persist(
        &self,
        session_id: &str,
        field: &str,
        value: &Value,
    ) -> Result<(), StorageError> {
        if self.failing.iter().any(|f| f == field) {
            return Err(StorageError::msg("backend unavailable"));
        }
        self.inner.persist(session_id, field, value).await
    }
}

/// Echoes the request back as the response and tags the extra map.
pub struct EchoService;

#[async_trait]
impl Service for EchoService {
    fn name(&self) -> &str {
        "echo"
    }

    async fn run(
        &self,
        snapshot: ContextSnapshot,
        _ctx: ServiceContext,
    ) -> Result<ServicePartial, ServiceError> {
        let request = snapshot.last_request.unwrap_or_default();
        Ok(ServicePartial::new()
            .with_response(format!("echo: {request}"))
            .with_extra("echoed", json!(true)))
    }
}

/// Always fails; exercises failure policies.
pub struct FailingService;

#[async_trait]
impl Service for FailingService {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(
        &self,
        _snapshot: ContextSnapshot,
        _ctx: ServiceContext,
    ) -> Result<ServicePartial, ServiceError> {
        Err(ServiceError::Failed {
            service: "failing".into(),
            message: "boom".into(),
        })
    }
}

/// Records its name into a shared log before succeeding; order assertions
/// for sequential execution hang off the log.
pub struct RecordingService {
    pub name: String,
    pub log: Arc<Mutex<Vec<String>>>,
    pub delay: Option<Duration>,
}

impl RecordingService {
    pub fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            log,
            delay: None,
        }
    }
}

#[async_trait]
impl Service for RecordingService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        _snapshot: ContextSnapshot,
        _ctx: ServiceContext,
    ) -> Result<ServicePartial, ServiceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log.lock().unwrap().push(self.name.clone());
        Ok(ServicePartial::new().with_extra(&self.name, json!("ran")))
    }
}
