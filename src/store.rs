//! Lazily hydrated, write-tracking context store.
//!
//! The [`ContextStore`] gives the actor and pipeline the illusion of a fully
//! materialized per-session field map while deferring expensive loads and
//! batching writes. Fields move through `Unloaded → Loading → Loaded` per
//! access burst, and concurrent reads of the same unloaded field share one
//! in-flight fetch: single-flight de-duplication is the central correctness
//! property of this component.
//!
//! Persistence is pluggable behind the [`FieldStorage`] trait; the crate
//! ships [`InMemoryStorage`] for tests and development. Writes are marked
//! dirty in memory and only persisted by [`ContextStore::commit`], which
//! batches all dirty fields through the
//! [`CoroutineLauncher`](crate::launcher::CoroutineLauncher) in the
//! configured mode and reports per-field failures instead of aborting the
//! batch.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tracing::instrument;

use crate::context::Context;
use crate::label::Label;
use crate::launcher::{CoroutineLauncher, ExecutionMode};

/// Well-known field names used when a whole [`Context`] is stored field by
/// field.
pub mod fields {
    pub const TURN: &str = "turn";
    pub const CURRENT: &str = "current";
    pub const HISTORY: &str = "history";
    pub const LAST_REQUEST: &str = "last_request";
    pub const LAST_RESPONSE: &str = "last_response";
    pub const EXTRA: &str = "extra";

    pub const ALL: [&str; 6] = [
        TURN,
        CURRENT,
        HISTORY,
        LAST_REQUEST,
        LAST_RESPONSE,
        EXTRA,
    ];
}

/// Error raised by a [`FieldStorage`] backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StorageError {
    pub message: String,
}

impl StorageError {
    pub fn msg<M: Into<String>>(m: M) -> Self {
        Self { message: m.into() }
    }
}

/// Field-level store error naming the affected session and field.
///
/// Store errors are isolated: a failure on one field never corrupts the
/// hydration state of any other field.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum StoreError {
    /// A backend fetch failed or was abandoned mid-flight.
    #[error("fetch failed for field '{field}' of session '{session}': {message}")]
    #[diagnostic(code(colloquy::store::fetch))]
    Fetch {
        session: String,
        field: String,
        message: String,
    },

    /// A backend persist failed during commit; the field stays dirty.
    #[error("commit failed for field '{field}' of session '{session}': {message}")]
    #[diagnostic(code(colloquy::store::commit))]
    Commit {
        session: String,
        field: String,
        message: String,
    },

    /// A stored field could not be decoded into its context shape.
    #[error("field '{field}' of session '{session}' failed to decode: {message}")]
    #[diagnostic(code(colloquy::store::codec))]
    Codec {
        session: String,
        field: String,
        message: String,
    },
}

/// Pluggable persistence backend for per-session fields.
///
/// Implementations are shared across sessions and must be safe to call
/// concurrently. The store guarantees it never issues two simultaneous
/// fetches for the same `(session, field)` pair.
#[async_trait]
pub trait FieldStorage: Send + Sync {
    /// Fetch a field's value; `Ok(None)` means the field was never persisted.
    async fn fetch(&self, session_id: &str, field: &str) -> Result<Option<Value>, StorageError>;

    /// Persist a field's value durably.
    async fn persist(
        &self,
        session_id: &str,
        field: &str,
        value: &Value,
    ) -> Result<(), StorageError>;
}

/// Volatile in-memory backend for testing and development.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    values: Arc<Mutex<FxHashMap<(String, String), Value>>>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FieldStorage for InMemoryStorage {
    async fn fetch(&self, session_id: &str, field: &str) -> Result<Option<Value>, StorageError> {
        let values = self.values.lock().expect("storage map poisoned");
        Ok(values
            .get(&(session_id.to_string(), field.to_string()))
            .cloned())
    }

    async fn persist(
        &self,
        session_id: &str,
        field: &str,
        value: &Value,
    ) -> Result<(), StorageError> {
        let mut values = self.values.lock().expect("storage map poisoned");
        values.insert(
            (session_id.to_string(), field.to_string()),
            value.clone(),
        );
        Ok(())
    }
}

/// Outcome of one batched commit.
///
/// Failed fields remain dirty in the store and are listed here; they are
/// never silently dropped.
#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    pub session_id: String,
    /// Fields persisted and marked clean, sorted by name.
    pub committed: Vec<String>,
    /// Fields whose persist failed, with the per-field error.
    pub failed: Vec<(String, StoreError)>,
}

impl CommitReport {
    /// `true` when every dirty field was persisted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

type FetchResult = Result<Option<Value>, StoreError>;

enum Entry {
    /// A fetch is in flight; waiters subscribe to the same result.
    Loading(watch::Receiver<Option<FetchResult>>),
    Loaded {
        value: Option<Value>,
        dirty: bool,
    },
}

/// Shared per-session key-value store with lazy hydration and batched
/// writes.
///
/// The store itself is shared across all sessions; per-session exclusivity
/// is a caller discipline (one active turn per session). Single-flight is
/// enforced per `(session, field)` pair regardless of that discipline.
pub struct ContextStore {
    backend: Arc<dyn FieldStorage>,
    entries: Mutex<FxHashMap<(String, String), Entry>>,
    launcher: CoroutineLauncher,
}

impl ContextStore {
    /// Creates a store over `backend` committing concurrently by default.
    pub fn new(backend: Arc<dyn FieldStorage>) -> Self {
        Self {
            backend,
            entries: Mutex::new(FxHashMap::default()),
            launcher: CoroutineLauncher::new(ExecutionMode::Concurrent),
        }
    }

    /// Selects how [`commit`](Self::commit) batches persists: concurrent for
    /// independent fields, sequential when cross-field ordering matters.
    #[must_use]
    pub fn with_commit_mode(mut self, mode: ExecutionMode) -> Self {
        self.launcher = CoroutineLauncher::new(mode);
        self
    }

    /// Reads a field, hydrating it from the backend on first access.
    ///
    /// - `Loaded` → returns the cached value immediately.
    /// - `Unloaded` → transitions to `Loading`, performs the fetch, caches
    ///   the result.
    /// - `Loading` → waits on the in-flight fetch instead of issuing a
    ///   duplicate one.
    ///
    /// A fetch failure resets the field to `Unloaded` and is delivered to
    /// every waiter; other fields are unaffected.
    #[instrument(skip(self), fields(session = %session_id, field = %field))]
    pub async fn get(&self, session_id: &str, field: &str) -> FetchResult {
        let key = (session_id.to_string(), field.to_string());

        let mut rx = {
            let mut entries = self.entries.lock().expect("store entries poisoned");
            match entries.get(&key) {
                Some(Entry::Loaded { value, .. }) => return Ok(value.clone()),
                Some(Entry::Loading(rx)) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    entries.insert(key.clone(), Entry::Loading(rx));
                    // Hold the sender outside the lock; the fetch below
                    // broadcasts through it.
                    drop(entries);
                    return self.fetch_and_cache(key, tx).await;
                }
            }
        };

        // Secondary caller: await the shared in-flight fetch. Copy the
        // broadcast out of the watch guard before matching so the borrow of
        // `rx` ends here.
        let waited = rx.wait_for(Option::is_some).await.map(|r| (*r).clone());
        match waited {
            Ok(Some(outcome)) => outcome,
            Ok(None) => Err(StoreError::Fetch {
                session: key.0,
                field: key.1,
                message: "in-flight fetch broadcast nothing".into(),
            }),
            Err(_) => {
                // The fetching caller was dropped before broadcasting.
                // Clear the stale entry so the next access retries.
                let mut entries = self.entries.lock().expect("store entries poisoned");
                if let Some(Entry::Loading(_)) = entries.get(&key) {
                    entries.remove(&key);
                }
                Err(StoreError::Fetch {
                    session: key.0,
                    field: key.1,
                    message: "in-flight fetch was abandoned".into(),
                })
            }
        }
    }

    async fn fetch_and_cache(
        &self,
        key: (String, String),
        tx: watch::Sender<Option<FetchResult>>,
    ) -> FetchResult {
        let fetched = self.backend.fetch(&key.0, &key.1).await;
        let result: FetchResult = fetched.map_err(|e| StoreError::Fetch {
            session: key.0.clone(),
            field: key.1.clone(),
            message: e.message,
        });

        {
            let mut entries = self.entries.lock().expect("store entries poisoned");
            match &result {
                Ok(value) => {
                    // A set() racing the fetch wins; never clobber a dirty
                    // entry with stale backend data.
                    if matches!(entries.get(&key), Some(Entry::Loading(_))) {
                        entries.insert(
                            key.clone(),
                            Entry::Loaded {
                                value: value.clone(),
                                dirty: false,
                            },
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        session = %key.0,
                        field = %key.1,
                        error = %err,
                        "field fetch failed; resetting to unloaded"
                    );
                    if matches!(entries.get(&key), Some(Entry::Loading(_))) {
                        entries.remove(&key);
                    }
                }
            }
        }

        let _ = tx.send(Some(result.clone()));
        result
    }

    /// Updates a field in memory and marks it dirty. Nothing is persisted
    /// until [`commit`](Self::commit).
    pub fn set(&self, session_id: &str, field: &str, value: Value) {
        let mut entries = self.entries.lock().expect("store entries poisoned");
        entries.insert(
            (session_id.to_string(), field.to_string()),
            Entry::Loaded {
                value: Some(value),
                dirty: true,
            },
        );
    }

    /// Names of the session's dirty fields, sorted.
    #[must_use]
    pub fn dirty_fields(&self, session_id: &str) -> Vec<String> {
        let entries = self.entries.lock().expect("store entries poisoned");
        let mut dirty: Vec<String> = entries
            .iter()
            .filter_map(|((session, field), entry)| match entry {
                Entry::Loaded { dirty: true, .. } if session == session_id => {
                    Some(field.clone())
                }
                _ => None,
            })
            .collect();
        dirty.sort();
        dirty
    }

    /// Persists all dirty fields of the session in one batched operation.
    ///
    /// Fields are persisted through the launcher in the configured commit
    /// mode. Fields that persist successfully are marked clean; fields that
    /// fail remain dirty and are reported in the [`CommitReport`].
    #[instrument(skip(self), fields(session = %session_id))]
    pub async fn commit(&self, session_id: &str) -> CommitReport {
        // Snapshot dirty pairs sorted by field name so sequential commits
        // and reports are deterministic.
        let mut pending: Vec<(String, Value)> = {
            let entries = self.entries.lock().expect("store entries poisoned");
            entries
                .iter()
                .filter_map(|((session, field), entry)| match entry {
                    Entry::Loaded {
                        value: Some(value),
                        dirty: true,
                    } if session == session_id => Some((field.clone(), value.clone())),
                    _ => None,
                })
                .collect()
        };
        pending.sort_by(|(a, _), (b, _)| a.cmp(b));

        if pending.is_empty() {
            return CommitReport {
                session_id: session_id.to_string(),
                ..Default::default()
            };
        }

        let units = pending.into_iter().map(|(field, value)| {
            let backend = Arc::clone(&self.backend);
            let session = session_id.to_string();
            async move {
                match backend.persist(&session, &field, &value).await {
                    Ok(()) => Ok(field),
                    Err(e) => Err((
                        field.clone(),
                        StoreError::Commit {
                            session,
                            field,
                            message: e.message,
                        },
                    )),
                }
            }
        });

        let settled = self.launcher.launch_settled(units).await;

        let mut report = CommitReport {
            session_id: session_id.to_string(),
            ..Default::default()
        };
        let mut entries = self.entries.lock().expect("store entries poisoned");
        for outcome in settled {
            match outcome {
                Ok(field) => {
                    let key = (session_id.to_string(), field.clone());
                    if let Some(Entry::Loaded { dirty, .. }) = entries.get_mut(&key) {
                        *dirty = false;
                    }
                    report.committed.push(field);
                }
                Err((field, err)) => {
                    tracing::warn!(
                        session = %session_id,
                        field = %field,
                        error = %err,
                        "field persist failed; staying dirty"
                    );
                    report.failed.push((field, err));
                }
            }
        }
        drop(entries);

        tracing::debug!(
            session = %session_id,
            committed = report.committed.len(),
            failed = report.failed.len(),
            "commit finished"
        );
        report
    }

    /// Drops all of the session's cached entries, committed or not.
    ///
    /// Intended for session close/expiry. Dirty fields are discarded.
    pub fn evict(&self, session_id: &str) {
        let mut entries = self.entries.lock().expect("store entries poisoned");
        entries.retain(|(session, _), _| session != session_id);
    }

    /// Discards the session's uncommitted writes, reverting dirty fields to
    /// `Unloaded` so the next access re-hydrates from the backend.
    pub fn discard_dirty(&self, session_id: &str) {
        let mut entries = self.entries.lock().expect("store entries poisoned");
        entries.retain(|(session, _), entry| {
            session != session_id || !matches!(entry, Entry::Loaded { dirty: true, .. })
        });
    }

    /// Assembles a [`Context`] from the session's well-known fields.
    ///
    /// All fields are hydrated concurrently through [`get`](Self::get). A
    /// session with no persisted position yields a fresh context at `start`.
    pub async fn load_context(&self, session_id: &str, start: &Label) -> Result<Context, StoreError> {
        let (turn, current, history, last_request, last_response, extra) = tokio::try_join!(
            self.get(session_id, fields::TURN),
            self.get(session_id, fields::CURRENT),
            self.get(session_id, fields::HISTORY),
            self.get(session_id, fields::LAST_REQUEST),
            self.get(session_id, fields::LAST_RESPONSE),
            self.get(session_id, fields::EXTRA),
        )?;

        let Some(current) = current else {
            return Ok(Context::new(session_id, start.clone()));
        };

        let mut ctx = Context::new(session_id, decode(session_id, fields::CURRENT, current)?);
        if let Some(v) = turn {
            ctx.turn = decode(session_id, fields::TURN, v)?;
        }
        if let Some(v) = history {
            ctx.history = decode(session_id, fields::HISTORY, v)?;
        }
        if let Some(v) = last_request {
            ctx.last_request = decode(session_id, fields::LAST_REQUEST, v)?;
        }
        if let Some(v) = last_response {
            ctx.last_response = decode(session_id, fields::LAST_RESPONSE, v)?;
        }
        if let Some(v) = extra {
            ctx.extra = decode(session_id, fields::EXTRA, v)?;
        }
        Ok(ctx)
    }

    /// Writes a context back into its well-known fields, marking them dirty.
    pub fn store_context(&self, ctx: &Context) -> Result<(), StoreError> {
        let session = ctx.session_id.as_str();
        self.set(session, fields::TURN, encode(session, fields::TURN, &ctx.turn)?);
        self.set(
            session,
            fields::CURRENT,
            encode(session, fields::CURRENT, &ctx.current)?,
        );
        self.set(
            session,
            fields::HISTORY,
            encode(session, fields::HISTORY, &ctx.history)?,
        );
        self.set(
            session,
            fields::LAST_REQUEST,
            encode(session, fields::LAST_REQUEST, &ctx.last_request)?,
        );
        self.set(
            session,
            fields::LAST_RESPONSE,
            encode(session, fields::LAST_RESPONSE, &ctx.last_response)?,
        );
        self.set(
            session,
            fields::EXTRA,
            encode(session, fields::EXTRA, &ctx.extra)?,
        );
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    session: &str,
    field: &str,
    value: Value,
) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Codec {
        session: session.to_string(),
        field: field.to_string(),
        message: e.to_string(),
    })
}

fn encode<T: serde::Serialize>(session: &str, field: &str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Codec {
        session: session.to_string(),
        field: field.to_string(),
        message: e.to_string(),
    })
}
