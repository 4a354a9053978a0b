//! Concurrent backend fan-out with per-call timeouts.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::backend::{BackendAdapter, BackendId};
use crate::error::{Error, Result};

/// A backend that failed or timed out during a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendFailure {
    pub backend: BackendId,
    pub error: String,
}

/// Outcome of one branch.
#[derive(Debug)]
pub struct BranchOutcome<T> {
    pub backend: BackendId,
    pub result: Result<T>,
    pub elapsed: Duration,
}

/// Await `call` for at most `timeout`; expiry becomes [`Error::Timeout`].
pub async fn bounded<T>(timeout: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(timeout.as_millis() as u64)),
    }
}

/// Run `op` against every target concurrently and collect every outcome.
///
/// One branch failing never cancels or delays the others beyond `timeout`.
/// Outcomes come back in target order.
pub async fn gather<T, F, Fut>(
    targets: Vec<(BackendId, Arc<dyn BackendAdapter>)>,
    timeout: Duration,
    op: F,
) -> Vec<BranchOutcome<T>>
where
    F: Fn(Arc<dyn BackendAdapter>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let branches = targets.into_iter().map(|(backend, adapter)| {
        let call = op(adapter);
        async move {
            let start = Instant::now();
            let result = bounded(timeout, call).await;
            BranchOutcome {
                backend,
                result,
                elapsed: start.elapsed(),
            }
        }
    });
    join_all(branches).await
}

/// Split outcomes into successes and failures, keeping order.
pub fn partition<T>(outcomes: Vec<BranchOutcome<T>>) -> (Vec<(BackendId, T)>, Vec<(BackendId, Error)>) {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(value) => succeeded.push((outcome.backend, value)),
            Err(e) => failed.push((outcome.backend, e)),
        }
    }
    (succeeded, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    fn targets(backends: Vec<Arc<InMemoryBackend>>) -> Vec<(BackendId, Arc<dyn BackendAdapter>)> {
        backends
            .into_iter()
            .map(|b| (b.id(), b as Arc<dyn BackendAdapter>))
            .collect()
    }

    #[tokio::test]
    async fn test_gather_isolates_failures() {
        let healthy = Arc::new(InMemoryBackend::new(BackendId::SemanticMemory));
        let broken = Arc::new(InMemoryBackend::new(BackendId::Graph));
        broken.set_unavailable(true);

        let outcomes = gather(
            targets(vec![healthy, broken]),
            Duration::from_secs(1),
            |adapter| async move { adapter.stats().await },
        )
        .await;
        assert_eq!(outcomes.len(), 2);

        let (ok, failed) = partition(outcomes);
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].0, BackendId::SemanticMemory);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, BackendId::Graph);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gather_times_out_slow_branch() {
        let fast = Arc::new(InMemoryBackend::new(BackendId::SemanticMemory));
        let slow = Arc::new(
            InMemoryBackend::new(BackendId::Document).with_latency(Duration::from_secs(30)),
        );

        let outcomes = gather(
            targets(vec![fast, slow]),
            Duration::from_millis(100),
            |adapter| async move { adapter.stats().await },
        )
        .await;

        assert!(outcomes[0].result.is_ok());
        assert!(matches!(
            outcomes[1].result,
            Err(Error::Timeout { duration_ms: 100 })
        ));
        assert!(outcomes[1].elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_gather_empty() {
        let outcomes: Vec<BranchOutcome<()>> =
            gather(Vec::new(), Duration::from_secs(1), |_| async { Ok(()) }).await;
        assert!(outcomes.is_empty());
    }
}
