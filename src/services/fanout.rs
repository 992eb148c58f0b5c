//! Bounded fan-out over independent lookups.
//!
//! Each item runs as its own tokio task. A counting semaphore caps the number
//! of tasks in flight: the dispatcher acquires a permit before spawning, so a
//! worker never starts until a slot is free. Results and errors are appended
//! to mutex-guarded buffers and drained once every task has finished. All
//! errors of a pass are kept; there is no first-error short-circuit.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};

use crate::errors::{AggregateError, AppError};

/// Default cap on concurrent external lookups.
pub const MAX_CONCURRENT_LOOKUPS: usize = 20;

/// Run `resolve` over every item with at most `limit` tasks in flight.
///
/// `Ok(None)` from a worker means the item contributes nothing. Returns the
/// collected results in completion order, or every error once all tasks are
/// done.
pub async fn fan_out<I, T, F, Fut>(
    items: Vec<I>,
    limit: usize,
    resolve: F,
) -> Result<Vec<T>, AggregateError>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<T>, AppError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let results: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::with_capacity(items.len())));
    let errors: Arc<Mutex<AggregateError>> = Arc::new(Mutex::new(AggregateError::default()));
    let resolve = Arc::new(resolve);

    let mut handles = Vec::with_capacity(items.len());
    for item in items {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                errors
                    .lock()
                    .await
                    .push(AppError::Internal(format!("Fan-out semaphore closed: {e}")));
                break;
            }
        };

        let results = Arc::clone(&results);
        let errors = Arc::clone(&errors);
        let resolve = Arc::clone(&resolve);

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            match (*resolve)(item).await {
                Ok(Some(value)) => results.lock().await.push(value),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Fan-out lookup failed");
                    errors.lock().await.push(e);
                }
            }
        }));
    }

    for joined in futures::future::join_all(handles).await {
        if let Err(e) = joined {
            errors
                .lock()
                .await
                .push(AppError::Internal(format!("Fan-out task aborted: {e}")));
        }
    }

    std::mem::take(&mut *errors.lock().await).into_result()?;
    let collected = std::mem::take(&mut *results.lock().await);
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Gauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
    }

    impl Gauge {
        async fn track(&self, hold: Duration) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(hold).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_the_concurrency_cap() {
        let gauge = Arc::new(Gauge::default());
        let probe = Arc::clone(&gauge);

        let out = fan_out((0..25).collect(), MAX_CONCURRENT_LOOKUPS, move |i: usize| {
            let gauge = Arc::clone(&probe);
            async move {
                gauge.track(Duration::from_millis(20)).await;
                Ok(Some(i * 2))
            }
        })
        .await
        .unwrap();

        assert_eq!(out.len(), 25);
        assert!(gauge.peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_LOOKUPS);
        assert!(gauge.peak.load(Ordering::SeqCst) > 1);

        let mut sorted = out;
        sorted.sort_unstable();
        assert_eq!(sorted, (0..25).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_is_reported_after_every_lookup_completes() {
        let gauge = Arc::new(Gauge::default());
        let probe = Arc::clone(&gauge);

        let err = fan_out((1..=25).collect(), MAX_CONCURRENT_LOOKUPS, move |i: usize| {
            let gauge = Arc::clone(&probe);
            async move {
                gauge.track(Duration::from_millis(5)).await;
                if i == 13 {
                    Err(AppError::ServiceUnavailable(format!("project-{i} lookup failed")))
                } else {
                    Ok(Some(i))
                }
            }
        })
        .await
        .unwrap_err();

        assert_eq!(gauge.finished.load(Ordering::SeqCst), 25);
        assert_eq!(err.len(), 1);
        assert!(err.to_string().contains("project-13 lookup failed"));
    }

    #[tokio::test]
    async fn all_errors_are_collected() {
        let err = fan_out(vec![1, 2, 3, 4], 2, |i: i32| async move {
            if i % 2 == 0 {
                Err::<Option<i32>, _>(AppError::NotFound(format!("item {i}")))
            } else {
                Ok(Some(i))
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.len(), 2);
    }

    #[tokio::test]
    async fn none_results_are_dropped() {
        let out = fan_out(vec![1, 2, 3], 3, |i: i32| async move {
            Ok((i != 2).then_some(i))
        })
        .await
        .unwrap();
        assert_eq!(out.len(), 2);
        assert!(!out.contains(&2));
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let out: Vec<i32> = fan_out(Vec::<i32>::new(), 20, |i: i32| async move { Ok(Some(i)) })
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn zero_limit_still_makes_progress() {
        let out = fan_out(vec![7], 0, |i: i32| async move { Ok(Some(i)) }).await.unwrap();
        assert_eq!(out, vec![7]);
    }
}
