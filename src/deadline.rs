//! Races an in-flight operation against a timer.
//!
//! The racer returns whichever side settles first. The losing operation is
//! abandoned, not killed: a request that already reached the remote side may
//! still take effect there, so callers release resources on both the success
//! and the timeout path.

use std::{future::Future, time::Duration};

use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeadlineError {
    #[error("{step} timed out after {}ms", after.as_millis())]
    Elapsed { step: &'static str, after: Duration },
    #[error("{step} was aborted before completing: {reason}")]
    Aborted { step: &'static str, reason: String },
}

impl DeadlineError {
    pub fn is_elapsed(&self) -> bool {
        matches!(self, DeadlineError::Elapsed { .. })
    }
}

/// Runs `operation` until it settles or `budget` elapses.
///
/// When both are ready in the same poll the timer wins, so an operation that
/// settles exactly at the deadline is reported as a timeout.
pub async fn race<F, T>(step: &'static str, budget: Duration, operation: F) -> Result<T, DeadlineError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = tokio::time::sleep(budget) => {
            debug!("[deadline] {} exceeded its {}ms budget", step, budget.as_millis());
            Err(DeadlineError::Elapsed { step, after: budget })
        }
        output = operation => Ok(output),
    }
}

/// Like [`race`], but the operation runs on its own task and keeps running
/// to completion after a timeout; its result is then discarded.
pub async fn race_detached<F, T>(
    step: &'static str,
    budget: Duration,
    operation: F,
) -> Result<T, DeadlineError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(operation);
    match race(step, budget, handle).await? {
        Ok(output) => Ok(output),
        Err(err) => Err(DeadlineError::Aborted {
            step,
            reason: err.to_string(),
        }),
    }
}
