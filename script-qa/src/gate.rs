//! Bounded, fault-absorbing access to the oracle, plus the fan-out helper
//! every phase uses to spread work across scenes.

use crate::error::PhaseError;
use oracle::{Oracle, OracleError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Shared handle to the oracle with a concurrency limit and a per-call timeout.
///
/// Cloning is cheap; clones share the same permit pool.
#[derive(Clone)]
pub struct OracleGate {
    oracle: Arc<dyn Oracle>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl OracleGate {
    /// Create a gate allowing `max_concurrent` calls in flight.
    pub fn new(oracle: Arc<dyn Oracle>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            oracle,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// The per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask the oracle, surfacing the failure.
    pub async fn try_ask(&self, prompt: &str) -> Result<String, OracleError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| OracleError::Config("oracle gate closed".to_string()))?;

        match tokio::time::timeout(self.timeout, self.oracle.infer(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout(self.timeout)),
        }
    }

    /// Ask the oracle. Failures and timeouts are logged and become `None`.
    pub async fn ask(&self, purpose: &str, prompt: &str) -> Option<String> {
        match self.try_ask(prompt).await {
            Ok(answer) => {
                tracing::debug!(oracle = self.oracle.name(), purpose, chars = answer.len(), "oracle answered");
                Some(answer)
            }
            Err(err) => {
                tracing::warn!(oracle = self.oracle.name(), purpose, error = %err, "oracle call degraded");
                None
            }
        }
    }
}

impl std::fmt::Debug for OracleGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleGate")
            .field("oracle", &self.oracle.name())
            .field("available_permits", &self.permits.available_permits())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Run `work` over every item concurrently and return results in input order.
///
/// Each task owns its item and writes only its own result. Results are
/// collected after every task has finished, then reordered by input index,
/// so the output never depends on completion order. A panicked task fails
/// the whole fan-out.
pub async fn fan_out<T, R, F, Fut>(items: Vec<T>, work: F) -> Result<Vec<R>, PhaseError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let mut set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let task = work(item);
        set.spawn(async move { (index, task.await) });
    }

    let mut indexed = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(pair) => indexed.push(pair),
            Err(err) => {
                set.abort_all();
                return Err(PhaseError::TaskFailed(err.to_string()));
            }
        }
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, result)| result).collect())
}
