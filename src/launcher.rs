//! Coroutine launcher: ordered execution of asynchronous units.
//!
//! The [`CoroutineLauncher`] runs a sequence of N futures and produces N
//! results in the original input order, regardless of completion order. The
//! async/sync toggle is a scheduling-mode configuration, not two code paths:
//! one `launch` entry point parameterized by [`ExecutionMode`].
//!
//! - [`ExecutionMode::Concurrent`]: every unit is scheduled at once and the
//!   caller suspends until all complete. What happens to siblings when one
//!   unit fails is an explicit [`FailurePolicy`], never a silent default.
//! - [`ExecutionMode::Sequential`]: units are awaited strictly one after
//!   another; a failure in unit *i* prevents units *i+1..N* from starting.
//!
//! An empty input returns an empty result vector without suspending in
//! either mode.
//!
//! # Examples
//!
//! ```rust
//! use colloquy::launcher::{CoroutineLauncher, ExecutionMode};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let launcher = CoroutineLauncher::new(ExecutionMode::Concurrent);
//! let units = (0..4).map(|i| async move { Ok::<_, std::io::Error>(i * 2) });
//! let results = launcher.launch(units).await.unwrap();
//! assert_eq!(results, vec![0, 2, 4, 6]);
//! # }
//! ```

use futures_util::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Scheduling mode for a batch of asynchronous units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// All units scheduled at once; results collected in input order.
    #[default]
    Concurrent,
    /// Units awaited one at a time, in input order.
    Sequential,
}

/// What happens to sibling units when one concurrent unit fails.
///
/// Only meaningful in [`ExecutionMode::Concurrent`]; sequential execution
/// stops at the first failure by construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Drop unfinished siblings and surface the first failure immediately.
    #[default]
    CancelSiblings,
    /// Let every sibling run to completion, then surface the first failure
    /// by input order.
    DrainSiblings,
}

/// Executes ordered batches of futures in a configured scheduling mode.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoroutineLauncher {
    mode: ExecutionMode,
    failure_policy: FailurePolicy,
}

impl CoroutineLauncher {
    #[must_use]
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            failure_policy: FailurePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Runs `units`, surfacing the first failure per the configured policy.
    ///
    /// On success the result vector has exactly one entry per unit, in input
    /// order. Completion order is unconstrained in concurrent mode.
    pub async fn launch<F, T, E>(&self, units: impl IntoIterator<Item = F>) -> Result<Vec<T>, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let units: Vec<F> = units.into_iter().collect();
        tracing::debug!(count = units.len(), mode = ?self.mode, "launching units");

        match self.mode {
            ExecutionMode::Sequential => {
                let mut results = Vec::with_capacity(units.len());
                for unit in units {
                    results.push(unit.await?);
                }
                Ok(results)
            }
            ExecutionMode::Concurrent => match self.failure_policy {
                FailurePolicy::CancelSiblings => try_join_all(units).await,
                FailurePolicy::DrainSiblings => {
                    let settled = join_all(units).await;
                    settled.into_iter().collect()
                }
            },
        }
    }

    /// Runs every unit to completion and returns all outcomes in input
    /// order, failures included.
    ///
    /// Unlike [`launch`](Self::launch), a failing unit never prevents its
    /// siblings from running, in either mode. This is the primitive behind
    /// partial commits: per-field persistence failures must be reported
    /// individually, not abort the batch.
    pub async fn launch_settled<F, T, E>(
        &self,
        units: impl IntoIterator<Item = F>,
    ) -> Vec<Result<T, E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let units: Vec<F> = units.into_iter().collect();
        tracing::debug!(count = units.len(), mode = ?self.mode, "launching settled units");

        match self.mode {
            ExecutionMode::Sequential => {
                let mut results = Vec::with_capacity(units.len());
                for unit in units {
                    results.push(unit.await);
                }
                results
            }
            ExecutionMode::Concurrent => join_all(units).await,
        }
    }
}
