//! Bounded-concurrency fetch of many series detail pages.
//!
//! One feeder task pushes ids into a distribution channel at a fixed pace.
//! A fixed number of workers share the receiving end and fetch one series
//! at a time. Results are collected only after every worker has been joined.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::client::SeriesSource;
use super::types::{ScrapeError, SeriesId, SeriesInfo};

/// Tuning knobs for [`fetch_series_batch`].
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Number of concurrent workers (at least one is always used)
    pub workers: usize,
    /// Pause between two submissions, keeps the upstream from rate limiting us
    pub submit_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            submit_delay: Duration::from_millis(250),
        }
    }
}

/// Available parallelism, or 4 if the platform can't tell.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

/// Fetches the detail page of every id and returns the series that could be
/// parsed. Order is not guaranteed.
///
/// Per-id failures never abort the batch: invalid ids and cancellations are
/// dropped quietly, anything else is logged and skipped. Duplicate ids are
/// fetched once. On cancellation the feeder stops submitting and the series
/// fetched so far are returned.
pub async fn fetch_series_batch<S: SeriesSource>(
    source: Arc<S>,
    ids: &[SeriesId],
    options: &BatchOptions,
    cancel: &CancellationToken,
) -> Vec<SeriesInfo> {
    let mut seen = HashSet::new();
    let ids: Vec<SeriesId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
    if ids.is_empty() {
        return Vec::new();
    }

    let worker_count = options.workers.clamp(1, ids.len());
    let (job_tx, job_rx) = mpsc::channel::<SeriesId>(worker_count);
    let job_rx = Arc::new(Mutex::new(job_rx));

    tracing::debug!(
        series = ids.len(),
        workers = worker_count,
        "Starting series batch"
    );

    let feeder = tokio::spawn(feed_ids(ids, options.submit_delay, job_tx, cancel.clone()));

    let workers: Vec<_> = (0..worker_count)
        .map(|_| {
            tokio::spawn(run_worker(
                Arc::clone(&source),
                Arc::clone(&job_rx),
                cancel.clone(),
            ))
        })
        .collect();

    if let Err(e) = feeder.await {
        tracing::error!(error = %e, "Series feeder task failed");
    }

    let mut fetched = Vec::new();
    for result in futures::future::join_all(workers).await {
        match result {
            Ok(series) => fetched.extend(series),
            Err(e) => tracing::error!(error = %e, "Series worker task failed"),
        }
    }

    tracing::debug!(fetched = fetched.len(), "Series batch finished");
    fetched
}

async fn feed_ids(
    ids: Vec<SeriesId>,
    submit_delay: Duration,
    jobs: mpsc::Sender<SeriesId>,
    cancel: CancellationToken,
) {
    for (i, id) in ids.into_iter().enumerate() {
        if i > 0 && !submit_delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(submit_delay) => {}
            }
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = jobs.send(id) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    // Dropping the sender closes the channel and lets idle workers exit.
}

async fn run_worker<S: SeriesSource>(
    source: Arc<S>,
    jobs: Arc<Mutex<mpsc::Receiver<SeriesId>>>,
    cancel: CancellationToken,
) -> Vec<SeriesInfo> {
    let mut fetched = Vec::new();

    loop {
        let next = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                id = jobs.recv() => id,
            }
        };
        let Some(id) = next else {
            break;
        };

        match source.fetch_series(id, &cancel).await {
            Ok(info) => fetched.push(info),
            Err(e) if e.is_cancelled() => break,
            Err(ScrapeError::InvalidSeriesId(_)) => {
                tracing::debug!(series_id = %id, "Skipping invalid series id");
            }
            Err(e @ ScrapeError::Structure(_)) => {
                tracing::error!(series_id = %id, error = %e, "Series page layout not recognized");
            }
            Err(e) => {
                tracing::warn!(series_id = %id, error = %e, "Failed to fetch series");
            }
        }
    }

    fetched
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSeriesSource;
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;

    fn ids(raw: impl IntoIterator<Item = u64>) -> Vec<SeriesId> {
        raw.into_iter().filter_map(SeriesId::new).collect()
    }

    fn options(workers: usize) -> BatchOptions {
        BatchOptions {
            workers,
            submit_delay: Duration::from_millis(250),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_id_is_dropped_and_rest_returned() {
        let source = Arc::new(FakeSeriesSource::with_invalid(&[3]));
        let input = ids(1..=6);

        let mut fetched: Vec<u64> =
            fetch_series_batch(Arc::clone(&source), &input, &options(3), &CancellationToken::new())
                .await
                .into_iter()
                .map(|info| info.series_id.get())
                .collect();
        fetched.sort_unstable();

        assert_eq!(fetched, vec![1, 2, 4, 5, 6]);
        assert_eq!(source.call_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_ids_fetched_once() {
        let source = Arc::new(FakeSeriesSource::default());
        let input = ids([7, 7, 8, 7, 8]);

        let fetched =
            fetch_series_batch(Arc::clone(&source), &input, &options(2), &CancellationToken::new())
                .await;

        assert_eq!(fetched.len(), 2);
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_worker_count() {
        let source = Arc::new(FakeSeriesSource {
            latency: Duration::from_secs(1),
            ..FakeSeriesSource::default()
        });
        let input = ids(1..=20);
        let opts = BatchOptions {
            workers: 3,
            submit_delay: Duration::ZERO,
        };

        let fetched =
            fetch_series_batch(Arc::clone(&source), &input, &opts, &CancellationToken::new()).await;

        assert_eq!(fetched.len(), 20);
        let max = source.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "saw {max} concurrent fetches");
        assert!(max >= 2, "workers never overlapped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_returns_empty() {
        let source = Arc::new(FakeSeriesSource::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let fetched = fetch_series_batch(Arc::clone(&source), &ids(1..=10), &options(4), &cancel).await;

        assert!(fetched.is_empty());
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_batch_stops_feeding() {
        let source = Arc::new(FakeSeriesSource::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            // Roughly four submissions at 250ms apart
            tokio::time::sleep(Duration::from_millis(900)).await;
            trigger.cancel();
        });

        let fetched =
            fetch_series_batch(Arc::clone(&source), &ids(1..=100), &options(2), &cancel).await;

        assert!(fetched.len() < 100);
        assert!(source.call_count() < 100);
    }

    #[tokio::test]
    async fn test_empty_input_returns_immediately() {
        let source = Arc::new(FakeSeriesSource::default());
        let fetched =
            fetch_series_batch(source, &[], &BatchOptions::default(), &CancellationToken::new()).await;
        assert!(fetched.is_empty());
    }

    #[test]
    fn test_default_workers_positive() {
        assert!(default_workers() >= 1);
    }
}
