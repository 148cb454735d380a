use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::client::ReleaseSource;
use super::types::Release;

/// Output of one poll cycle.
#[derive(Debug, Clone)]
pub struct ReleaseBatch {
    pub releases: Vec<Release>,
    pub polled_at: DateTime<Utc>,
    failed: bool,
}

impl ReleaseBatch {
    pub fn succeeded(releases: Vec<Release>, polled_at: DateTime<Utc>) -> Self {
        Self {
            releases,
            polled_at,
            failed: false,
        }
    }

    /// A cycle whose fetch failed. Carries no releases.
    pub fn failed(polled_at: DateTime<Utc>) -> Self {
        Self {
            releases: Vec::new(),
            polled_at,
            failed: true,
        }
    }

    /// Distinguishes a failed cycle from a successful one that found nothing.
    pub fn is_failed(&self) -> bool {
        self.failed
    }
}

/// Starts polling `source` right away and then every `interval`.
///
/// Each cycle produces exactly one [`ReleaseBatch`], failed cycles included.
/// The channel holds at most one batch, so a slow consumer delays the next
/// cycle instead of piling batches up. Once `cancel` fires nothing more is
/// sent and the channel is closed.
pub fn spawn_poller<S: ReleaseSource>(
    source: Arc<S>,
    interval: Duration,
    cancel: CancellationToken,
) -> mpsc::Receiver<ReleaseBatch> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(poll_loop(source, interval, tx, cancel));
    rx
}

async fn poll_loop<S: ReleaseSource>(
    source: Arc<S>,
    interval: Duration,
    tx: mpsc::Sender<ReleaseBatch>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(interval_secs = interval.as_secs(), "Poller started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let polled_at = Utc::now();
        let batch = match source.fetch_releases(&cancel).await {
            Ok(releases) => {
                tracing::info!(releases = releases.len(), "Polled release list");
                ReleaseBatch::succeeded(releases, polled_at)
            }
            Err(e) if e.is_cancelled() => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to poll release list");
                ReleaseBatch::failed(polled_at)
            }
        };

        if cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(batch) => {
                if sent.is_err() {
                    tracing::debug!("Release consumer went away");
                    break;
                }
            }
        }
    }

    tracing::info!("Poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::types::{ScrapeError, SeriesId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl ReleaseSource for CountingSource {
        async fn fetch_releases(
            &self,
            _cancel: &CancellationToken,
        ) -> Result<Vec<Release>, ScrapeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            if self.fail {
                return Err(ScrapeError::Structure("layout changed".into()));
            }
            Ok(vec![Release {
                series_id: SeriesId::new(n),
                title: format!("title {n}"),
                label: format!("c.{n}"),
                translators: "group".into(),
                observed_at: Utc::now(),
            }])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_immediately_then_every_interval() {
        let source = Arc::new(CountingSource::default());
        let cancel = CancellationToken::new();
        let interval = Duration::from_secs(2);
        let start = Instant::now();

        let mut rx = spawn_poller(Arc::clone(&source), interval, cancel.clone());

        let first = rx.recv().await.unwrap();
        assert!(start.elapsed() < interval);
        assert!(!first.is_failed());
        assert_eq!(first.releases.len(), 1);

        rx.recv().await.unwrap();
        let third = rx.recv().await.unwrap();
        assert!(start.elapsed() >= interval * 2);
        assert_eq!(third.releases[0].label, "c.3");

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_is_marked() {
        let source = Arc::new(CountingSource {
            fail: true,
            ..CountingSource::default()
        });
        let cancel = CancellationToken::new();

        let mut rx = spawn_poller(source, Duration::from_secs(60), cancel.clone());

        let batch = rx.recv().await.unwrap();
        assert!(batch.is_failed());
        assert!(batch.releases.is_empty());

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_closes_channel_and_stops_polling() {
        let source = Arc::new(CountingSource::default());
        let cancel = CancellationToken::new();
        let interval = Duration::from_secs(2);

        let mut rx = spawn_poller(Arc::clone(&source), interval, cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let mut received = 0;
        while let Some(_batch) = rx.recv().await {
            assert!(start.elapsed() <= Duration::from_secs(10));
            received += 1;
        }
        assert!(received >= 5);

        let calls = source.calls.load(Ordering::SeqCst);
        tokio::time::sleep(interval * 5).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_blocked_on_send() {
        let source = Arc::new(CountingSource::default());
        let cancel = CancellationToken::new();

        let mut rx = spawn_poller(Arc::clone(&source), Duration::from_secs(1), cancel.clone());

        // Nobody reads: one batch sits in the channel and the poller blocks
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        let mut drained = 0;
        while rx.recv().await.is_some() {
            drained += 1;
        }
        assert!(drained <= 1);
        assert!(source.calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumer_drop_stops_poller() {
        let source = Arc::new(CountingSource::default());
        let cancel = CancellationToken::new();

        let mut rx = spawn_poller(Arc::clone(&source), Duration::from_secs(1), cancel);
        rx.recv().await.unwrap();
        drop(rx);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let calls = source.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }
}
