//! # Colloquy: Dialogue-Flow Execution Core
//!
//! Colloquy advances conversations through a directed graph of labeled
//! nodes: a script-driven state machine paired with a lazily hydrated
//! per-session context store and an ordered async launcher.
//!
//! ## Core Concepts
//!
//! - **Labels**: Immutable flow/node identifiers, the currency of the graph
//! - **Script**: Static flow → node → transition definitions with a fluent builder
//! - **Actor**: Priority-ordered transition resolution with a fallback of last resort
//! - **ContextStore**: Lazy single-flight field hydration and batched commits
//! - **Pipeline**: Per-turn orchestration of service groups with barrier merges
//! - **Subscribers**: Passive, exactly-once observers of turn outcomes
//!
//! ## Quick Start
//!
//! ### Defining a Script
//!
//! ```
//! use colloquy::label::Label;
//! use colloquy::script::{conditions, NodeDefinition, Script};
//!
//! let script = Script::builder()
//!     .add_node(
//!         "greet",
//!         "start",
//!         NodeDefinition::new()
//!             .with_transition(conditions::request_equals("hi"), Label::new("greet", "hello"), 2)
//!             .with_transition(conditions::always(), Label::new("greet", "fallback"), 1),
//!     )
//!     .add_node("greet", "hello", NodeDefinition::new())
//!     .add_node("greet", "fallback", NodeDefinition::new())
//!     .build();
//! ```
//!
//! ### Resolving Transitions
//!
//! ```
//! use colloquy::actor::{Actor, ActorConfig};
//! use colloquy::context::Context;
//! use colloquy::label::Label;
//! # use colloquy::script::{conditions, NodeDefinition, Script};
//! # let script = Script::builder()
//! #     .add_node("greet", "start", NodeDefinition::new().with_transition(
//! #         conditions::request_equals("hi"), Label::new("greet", "hello"), 1))
//! #     .add_node("greet", "hello", NodeDefinition::new())
//! #     .add_node("greet", "fallback", NodeDefinition::new())
//! #     .build();
//!
//! let actor = Actor::new(
//!     script,
//!     Label::new("greet", "start"),
//!     Label::new("greet", "fallback"),
//!     ActorConfig::default(),
//! )?;
//!
//! let mut ctx = Context::new("session-1", Label::new("greet", "start"));
//! ctx.set_request("hi");
//! let decision = actor.advance(&mut ctx)?;
//! assert_eq!(decision.next, Label::new("greet", "hello"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Running Turns
//!
//! A [`pipeline::Pipeline`] ties the pieces together: it hydrates the
//! session's [`context::Context`] from a [`store::ContextStore`], lets the
//! actor choose the next label, fans service groups out through the
//! [`launcher::CoroutineLauncher`], merges their partial updates at a
//! barrier, commits dirty fields exactly once, and notifies subscribers
//! exactly once. See the module docs of [`pipeline`] for the turn contract.
//!
//! ## Module Guide
//!
//! - [`label`] - Flow/node identifiers and their string forms
//! - [`script`] - Static conversation graph and builder
//! - [`context`] - Per-session state and snapshots
//! - [`actor`] - Transition resolution and fallback semantics
//! - [`store`] - Lazily hydrated context persistence
//! - [`launcher`] - Ordered concurrent/sequential execution of async units
//! - [`service`] - Async service trait and partial updates
//! - [`pipeline`] - Per-turn orchestration
//! - [`subscriber`] - Turn events and observers
//! - [`extract`] - Lenient payload field extraction

pub mod actor;
pub mod context;
pub mod extract;
pub mod label;
pub mod launcher;
pub mod pipeline;
pub mod script;
pub mod service;
pub mod store;
pub mod subscriber;
pub mod telemetry;
pub mod utils;
