use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// Default worker count: the machine's available parallelism.
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, |n| n.get())
}

/// Run `work` over every item with at most `workers` units in flight.
///
/// Results come back in input order no matter which unit finishes first.
/// A unit that panics is logged and left out; siblings keep running.
pub async fn fan_out<T, R, F, Fut>(items: Vec<T>, workers: usize, work: F) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    let total = items.len();

    for (index, item) in items.into_iter().enumerate() {
        let permits = Arc::clone(&permits);
        let unit = work(item);
        tasks.spawn(async move {
            // The semaphore is never closed, so acquisition only fails if it is.
            let _permit = permits.acquire_owned().await.ok();
            (index, unit.await)
        });
    }

    let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(err) => warn!(error = %err, "worker unit failed"),
        }
    }
    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let items = vec![30u64, 0, 15, 5];
        let results = fan_out(items, 4, |delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            delay
        })
        .await;
        assert_eq!(results, vec![30, 0, 15, 5]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let results = fan_out((0..8).collect(), 2, |i: usize| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i
            }
        })
        .await;
        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results: Vec<u8> = fan_out(Vec::<u8>::new(), 3, |x| async move { x }).await;
        assert!(results.is_empty());
    }
}
