use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::warn;

/// Outcome of one generation attempt for one unit of work.
///
/// Retry is an explicit loop over these values, not error-driven control
/// flow: the caller classifies each response and [`run_units`] decides
/// whether another attempt is allowed.
pub enum Attempt<T> {
    Success(T),
    /// Worth another attempt (empty or malformed response, transport error).
    Retryable(String),
    /// Not worth retrying.
    Fatal(String),
}

/// Batching, retry, and deadline policy shared by the generation stages.
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    /// Maximum concurrent outstanding requests to the generation service.
    pub batch_size: usize,
    /// Additional attempts after the first (1 = up to two calls per unit).
    pub max_retries: usize,
    /// Stage-level deadline. Outstanding units are failed when it expires;
    /// already-completed units are kept.
    pub timeout: Duration,
}

impl BatchPolicy {
    pub fn new(batch_size: usize, timeout_secs: u64) -> Self {
        Self {
            batch_size,
            max_retries: 1,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

/// A unit that ended in failure, with the last recorded reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUnit {
    pub key: String,
    pub reason: String,
}

/// Per-stage result map plus the units that failed. Completed units are
/// keyed (by theme or pair index rendered as a string), so parallel units
/// own disjoint slots and are folded in here one at a time as they finish.
pub struct BatchOutcome<T> {
    pub completed: BTreeMap<String, T>,
    pub failed: Vec<FailedUnit>,
}

impl<T> BatchOutcome<T> {
    pub fn success_rate(&self) -> f64 {
        let total = self.completed.len() + self.failed.len();
        if total == 0 {
            1.0
        } else {
            self.completed.len() as f64 / total as f64
        }
    }
}

/// Run one keyed unit of work per input, at most `batch_size` in flight,
/// with bounded retry per unit and a stage-level deadline.
pub async fn run_units<T, F, Fut>(keys: Vec<String>, policy: &BatchPolicy, unit: F) -> BatchOutcome<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let deadline = Instant::now() + policy.timeout;
    let order = keys.clone();
    let mut pending: HashSet<String> = keys.iter().cloned().collect();
    let max_retries = policy.max_retries;

    let unit = &unit;
    let mut results = stream::iter(keys.into_iter().map(|key| async move {
        let mut retries_left = max_retries;
        loop {
            match unit(key.clone()).await {
                Attempt::Success(value) => return (key, Ok(value)),
                Attempt::Retryable(reason) if retries_left > 0 => {
                    retries_left -= 1;
                    warn!(key = key.as_str(), reason = reason.as_str(), "Unit failed, retrying");
                }
                Attempt::Retryable(reason) | Attempt::Fatal(reason) => return (key, Err(reason)),
            }
        }
    }))
    .buffer_unordered(policy.batch_size.max(1));

    let mut completed = BTreeMap::new();
    let mut failed = Vec::new();

    loop {
        match timeout_at(deadline, results.next()).await {
            Ok(Some((key, Ok(value)))) => {
                pending.remove(&key);
                completed.insert(key, value);
            }
            Ok(Some((key, Err(reason)))) => {
                pending.remove(&key);
                failed.push(FailedUnit { key, reason });
            }
            Ok(None) => break,
            Err(_) => {
                warn!(outstanding = pending.len(), "Stage deadline reached, aborting outstanding units");
                for key in order.into_iter().filter(|k| pending.contains(k)) {
                    failed.push(FailedUnit {
                        key,
                        reason: "stage timeout".to_string(),
                    });
                }
                break;
            }
        }
    }

    BatchOutcome { completed, failed }
}
