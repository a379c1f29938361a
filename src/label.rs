//! Core label type for the colloquy dialogue engine.
//!
//! A [`Label`] identifies one node inside one flow of the conversation graph.
//! Labels are immutable, compared structurally, and cheap to clone; they are
//! the currency the [`Actor`](crate::actor::Actor) trades in: the current
//! position, every transition target, and every history entry is a `Label`.
//!
//! # Examples
//!
//! ```rust
//! use colloquy::label::Label;
//!
//! let start = Label::new("greet", "start");
//! assert_eq!(start.encode(), "greet:start");
//! assert_eq!(Label::decode("greet:start"), start);
//!
//! // A flow-scoped label (no node) is only valid as a transition target;
//! // the actor resolves it through the fallback path.
//! let anywhere = Label::flow_only("greet");
//! assert!(anywhere.is_flow_scoped());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node within a flow of the conversation graph.
///
/// Equality and hashing are structural over all three fields. The optional
/// priority is carried for transition bookkeeping and does not appear in the
/// encoded string form, which identifies graph position only.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    /// Name of the flow this label belongs to.
    pub flow: String,
    /// Name of the node inside the flow. `None` denotes "any node in this
    /// flow"; such labels never resolve directly in a script.
    pub node: Option<String>,
    /// Optional transition priority attached to this label.
    pub priority: Option<i64>,
}

impl Label {
    /// Creates a label addressing a concrete flow/node pair.
    #[must_use]
    pub fn new(flow: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            node: Some(node.into()),
            priority: None,
        }
    }

    /// Creates a flow-scoped label with no node component.
    #[must_use]
    pub fn flow_only(flow: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            node: None,
            priority: None,
        }
    }

    /// Attaches a priority, consuming and returning the label.
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Returns `true` if this label has no node component.
    #[must_use]
    pub fn is_flow_scoped(&self) -> bool {
        self.node.is_none()
    }

    /// Returns `true` if both labels address the same flow/node position,
    /// ignoring any attached priority.
    #[must_use]
    pub fn same_position(&self, other: &Label) -> bool {
        self.flow == other.flow && self.node == other.node
    }

    /// Encode the label into its persisted string form.
    ///
    /// - `("greet", Some("start"))` → `"greet:start"`
    /// - `("greet", None)` → `"greet"`
    ///
    /// Priorities are not encoded; the string form identifies position only.
    #[must_use]
    pub fn encode(&self) -> String {
        match &self.node {
            Some(node) => format!("{}:{node}", self.flow),
            None => self.flow.clone(),
        }
    }

    /// Decode a persisted string form back into a `Label`.
    ///
    /// A string without a `:` separator decodes to a flow-scoped label, so
    /// round-tripping through [`encode`](Self::encode) is lossless for
    /// position.
    pub fn decode(s: &str) -> Self {
        match s.split_once(':') {
            Some((flow, node)) => Label::new(flow, node),
            None => Label::flow_only(s),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{}:{node}", self.flow),
            None => write!(f, "{}", self.flow),
        }
    }
}

// Developer experience: allow "flow:node" literals where a Label is expected.
impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Label::decode(s)
    }
}
