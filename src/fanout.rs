//! Parallel Fan-Out
//!
//! Runs one operation over many independent inputs (usually one per drive)
//! with a bounded number in flight. Results come back in input order and
//! every input runs to completion; the caller decides afterwards whether a
//! failure is fatal.
//!
//! # Example
//!
//! ```ignore
//! let fanout = FanOut::new(4);
//! let report = fanout
//!     .run_commands(&drives, |drive| crypt.unlock_raw(drive, key))
//!     .await;
//!
//! if report.failed() {
//!     warn!("unlock failed on {:?}", report.failed_inputs());
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::BryckConfig;
use crate::domain::ports::CommandOutput;
use crate::error::{Error, Result};

/// Share of logical cores used when no explicit bound is configured.
const DEFAULT_CORE_SHARE: f64 = 0.8;

/// Default worker bound: 80% of the logical cores, at least one.
pub fn default_max_workers() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    ((cores as f64 * DEFAULT_CORE_SHARE) as usize).max(1)
}

/// Bounded, order-preserving concurrent executor.
#[derive(Debug, Clone)]
pub struct FanOut {
    max_workers: usize,
    semaphore: Arc<Semaphore>,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(default_max_workers())
    }
}

impl FanOut {
    /// Create a fan-out with at most `max_workers` operations in flight.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
        }
    }

    pub fn from_config(config: &BryckConfig) -> Self {
        config.max_workers.map(Self::new).unwrap_or_default()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `op` over every input. `results[i]` belongs to `inputs[i]`.
    pub async fn run<'a, I, T, F, Fut>(&self, inputs: &'a [I], op: F) -> Vec<T>
    where
        F: Fn(&'a I) -> Fut,
        Fut: Future<Output = T>,
    {
        let tasks = inputs.iter().map(|input| {
            let operation = op(input);
            async move {
                // The semaphore is never closed, so acquire cannot fail.
                let _permit = self.semaphore.acquire().await;
                operation.await
            }
        });
        join_all(tasks).await
    }

    /// Run a command-producing operation over string inputs and pair every
    /// output with the input that produced it.
    pub async fn run_commands<'a, F, Fut>(&self, inputs: &'a [String], op: F) -> FanOutReport
    where
        F: Fn(&'a String) -> Fut,
        Fut: Future<Output = CommandOutput>,
    {
        debug!(inputs = inputs.len(), workers = self.max_workers, "Fan-out batch");
        let outputs = self.run(inputs, op).await;
        FanOutReport {
            results: inputs.iter().cloned().zip(outputs).collect(),
        }
    }
}

// =============================================================================
// Aggregated Results
// =============================================================================

/// Per-input outputs of one fan-out batch, in input order.
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    results: Vec<(String, CommandOutput)>,
}

impl FanOutReport {
    pub fn results(&self) -> &[(String, CommandOutput)] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// True iff at least one input failed.
    pub fn failed(&self) -> bool {
        self.results.iter().any(|(_, out)| !out.success())
    }

    /// Inputs whose command failed, in input order.
    pub fn failed_inputs(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|(_, out)| !out.success())
            .map(|(input, _)| input.clone())
            .collect()
    }

    /// Stdout of every input, success or not.
    pub fn combined_stdout(&self) -> String {
        self.results
            .iter()
            .map(|(_, out)| out.stdout.as_str())
            .collect()
    }

    /// Stderr of the failing inputs only.
    pub fn combined_stderr(&self) -> String {
        self.results
            .iter()
            .filter(|(_, out)| !out.success())
            .map(|(_, out)| out.stderr.as_str())
            .collect()
    }

    /// `Err(PartialFailure)` when any input failed.
    pub fn into_result(self) -> Result<FanOutReport> {
        if self.failed() {
            Err(Error::PartialFailure {
                failed: self.failed_inputs(),
                stderr: self.combined_stderr().trim().to_string(),
            })
        } else {
            Ok(self)
        }
    }
}
