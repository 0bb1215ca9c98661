//! Bounded-concurrency batch runner used for photo downloads and push work.

use std::future::Future;

use futures::stream::{self, StreamExt};
use serde::Serialize;

/// Run `worker` over every item with at most `max_concurrent` futures in flight.
///
/// Returns once every item has finished. Results come back in input order and
/// a failing item never cancels the others. A limit of zero is treated as one.
pub async fn run_with_concurrency<I, T, E, F, Fut>(
    items: I,
    max_concurrent: usize,
    worker: F,
) -> Vec<Result<T, E>>
where
    I: IntoIterator,
    F: Fn(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut results: Vec<(usize, Result<T, E>)> = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let work = worker(item);
            async move { (index, work.await) }
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

/// Success/failure tally of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub const fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Fold another batch into this one.
    pub fn absorb(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_with_concurrency(0..10, 4, |item| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(item * 2)
            }
        })
        .await;

        assert_eq!(results.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failures_are_returned_in_place() {
        let results = run_with_concurrency(vec![3_u64, 1, 2], 2, |item| async move {
            tokio::time::sleep(Duration::from_millis(item * 5)).await;
            if item == 1 {
                Err(format!("item {item} failed"))
            } else {
                Ok(item)
            }
        })
        .await;

        assert_eq!(
            results,
            vec![Ok(3), Err("item 1 failed".to_string()), Ok(2)]
        );
    }

    #[test]
    fn absorbed_batches_add_up() {
        let mut total = BatchReport {
            succeeded: 2,
            failed: 1,
        };
        total.absorb(BatchReport {
            succeeded: 3,
            failed: 0,
        });
        assert_eq!(total.total(), 6);
        assert_eq!(total.failed, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn zero_limit_still_makes_progress() {
        let results = run_with_concurrency(0..3, 0, |item| async move { Ok::<_, ()>(item) }).await;
        assert_eq!(results, vec![Ok(0), Ok(1), Ok(2)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_batch_completes() {
        let results =
            run_with_concurrency(Vec::<u8>::new(), 4, |item| async move { Ok::<_, ()>(item) })
                .await;
        assert!(results.is_empty());
    }
}
