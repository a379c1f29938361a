//! Session id generation.

use uuid::Uuid;

/// Generates unique session identifiers.
///
/// Ids are UUIDv4 strings, optionally under a fixed prefix so sessions from
/// different front ends stay distinguishable in logs and storage.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    prefix: Option<String>,
}

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    /// A fresh session id, unique with UUIDv4 probability.
    #[must_use]
    pub fn new_session_id(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}-{}", Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        }
    }
}
