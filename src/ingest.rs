//! Reconciles scraped releases with storage.
//!
//! One poll cycle: resolve releases that carry no series id by title, fetch
//! the detail pages of series we have never seen, then store the releases.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::scrape::{fetch_series_batch, BatchOptions, ReleaseBatch, SeriesId, SeriesSource};
use crate::storage::Database;

/// Ids fetched and stored per step while populating a range
const POPULATE_CHUNK: usize = 500;

/// Outcome of one ingest cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub releases_seen: usize,
    /// Releases resolved through a title lookup
    pub resolved_by_title: usize,
    /// Releases still without a series id after the lookup (not stored)
    pub unresolved: usize,
    pub new_series: usize,
    pub new_releases: usize,
}

pub struct Ingestor<S> {
    db: Database,
    source: Arc<S>,
    options: BatchOptions,
}

impl<S: SeriesSource> Ingestor<S> {
    pub fn new(db: Database, source: Arc<S>, options: BatchOptions) -> Self {
        Self {
            db,
            source,
            options,
        }
    }

    /// Stores one poll cycle's releases, fetching unknown series first.
    ///
    /// Failed batches are skipped.
    pub async fn ingest(
        &self,
        batch: &ReleaseBatch,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let mut report = IngestReport {
            releases_seen: batch.releases.len(),
            ..IngestReport::default()
        };
        if batch.is_failed() {
            tracing::debug!("Skipping failed poll cycle");
            return Ok(report);
        }

        // Titles are only trusted when they name exactly one series
        let unresolved_titles: Vec<String> = batch
            .releases
            .iter()
            .filter(|r| !r.is_resolved())
            .map(|r| r.title.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut by_title: BTreeMap<String, BTreeSet<SeriesId>> = BTreeMap::new();
        for m in self.db.resolve_series_by_titles(&unresolved_titles).await? {
            by_title.entry(m.title).or_default().insert(m.series_id);
        }

        let mut releases = Vec::with_capacity(batch.releases.len());
        for release in &batch.releases {
            if release.is_resolved() {
                releases.push(release.clone());
                continue;
            }
            let unique = by_title
                .get(&release.title)
                .filter(|ids| ids.len() == 1)
                .and_then(|ids| ids.first().copied());
            match unique {
                Some(id) => {
                    report.resolved_by_title += 1;
                    releases.push(release.clone().resolved_as(id));
                }
                None => report.unresolved += 1,
            }
        }

        let ids: Vec<SeriesId> = releases
            .iter()
            .filter_map(|r| r.series_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let known: BTreeSet<SeriesId> = self
            .db
            .find_known_series_ids(&ids)
            .await?
            .into_iter()
            .collect();
        let unknown: Vec<SeriesId> = ids.into_iter().filter(|id| !known.contains(id)).collect();

        if !unknown.is_empty() {
            tracing::info!(count = unknown.len(), "Fetching unknown series");
            let fetched =
                fetch_series_batch(Arc::clone(&self.source), &unknown, &self.options, cancel).await;
            report.new_series = self.db.upsert_series(&fetched).await?;
        }

        report.new_releases = self.db.upsert_releases(&releases).await?;

        tracing::info!(
            seen = report.releases_seen,
            new_series = report.new_series,
            new_releases = report.new_releases,
            unresolved = report.unresolved,
            "Ingested poll cycle"
        );
        Ok(report)
    }

    /// Consumes poll cycles until the channel closes.
    ///
    /// Storage errors are logged and the loop keeps going.
    pub async fn run(&self, mut batches: mpsc::Receiver<ReleaseBatch>, cancel: CancellationToken) {
        while let Some(batch) = batches.recv().await {
            if let Err(e) = self.ingest(&batch, &cancel).await {
                tracing::error!(error = %e, "Failed to ingest poll cycle");
            }
        }
        tracing::info!("Ingest loop finished");
    }

    /// Fetches and stores every series in `range` that is not stored yet.
    ///
    /// Progress is committed in chunks, so a cancelled run keeps what it
    /// already fetched. Returns the number of newly stored series.
    pub async fn populate(&self, range: Range<u64>, cancel: &CancellationToken) -> Result<usize> {
        let ids: Vec<SeriesId> = range.filter_map(SeriesId::new).collect();
        let mut stored = 0;

        for chunk in ids.chunks(POPULATE_CHUNK) {
            if cancel.is_cancelled() {
                tracing::info!(stored, "Populate cancelled");
                break;
            }

            let known: BTreeSet<SeriesId> = self
                .db
                .find_known_series_ids(chunk)
                .await?
                .into_iter()
                .collect();
            let missing: Vec<SeriesId> =
                chunk.iter().copied().filter(|id| !known.contains(id)).collect();
            if missing.is_empty() {
                continue;
            }

            let fetched =
                fetch_series_batch(Arc::clone(&self.source), &missing, &self.options, cancel).await;
            stored += self.db.upsert_series(&fetched).await?;

            if let (Some(first), Some(last)) = (chunk.first(), chunk.last()) {
                tracing::info!(from = %first, to = %last, fetched = fetched.len(), "Populated series chunk");
            }
        }

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::batch::testing::{info_for, FakeSeriesSource};
    use crate::scrape::Release;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn id(raw: u64) -> SeriesId {
        SeriesId::new(raw).unwrap()
    }

    fn options() -> BatchOptions {
        BatchOptions {
            workers: 2,
            submit_delay: Duration::ZERO,
        }
    }

    fn release(series: Option<u64>, title: &str, label: &str) -> Release {
        Release {
            series_id: series.and_then(SeriesId::new),
            title: title.into(),
            label: label.into(),
            translators: "group".into(),
            observed_at: Utc::now(),
        }
    }

    async fn ingestor(source: FakeSeriesSource) -> (Ingestor<FakeSeriesSource>, Arc<FakeSeriesSource>) {
        let db = Database::open(":memory:").await.unwrap();
        let source = Arc::new(source);
        (Ingestor::new(db, Arc::clone(&source), options()), source)
    }

    #[tokio::test]
    async fn test_unknown_series_fetched_and_releases_stored() {
        let (ingestor, source) = ingestor(FakeSeriesSource::default()).await;
        let batch = ReleaseBatch::succeeded(
            vec![
                release(Some(1), "series 1", "c.1"),
                release(Some(2), "series 2", "c.5"),
                release(Some(1), "series 1", "c.2"),
            ],
            Utc::now(),
        );

        let report = ingestor.ingest(&batch, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.new_series, 2);
        assert_eq!(report.new_releases, 3);
        assert_eq!(source.call_count(), 2);

        // Second cycle with the same content: nothing new, nothing fetched
        let again = ingestor.ingest(&batch, &CancellationToken::new()).await.unwrap();
        assert_eq!(again.new_series, 0);
        assert_eq!(again.new_releases, 0);
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_newest_release_of_a_cycle_is_latest() {
        let (ingestor, _source) = ingestor(FakeSeriesSource::default()).await;
        let observed_at = Utc::now();
        let batch = ReleaseBatch::succeeded(
            vec![
                Release {
                    observed_at,
                    ..release(Some(1), "series 1", "c.12")
                },
                Release {
                    observed_at,
                    ..release(Some(1), "series 1", "c.11")
                },
            ],
            observed_at,
        );

        ingestor.ingest(&batch, &CancellationToken::new()).await.unwrap();

        let latest = ingestor.db.latest_releases_for_series(&[id(1)]).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].label, "c.12");
    }

    #[tokio::test]
    async fn test_unlinked_release_resolved_by_known_title() {
        let (ingestor, _source) = ingestor(FakeSeriesSource::default()).await;
        ingestor.db.upsert_series(&[info_for(id(9))]).await.unwrap();

        let batch = ReleaseBatch::succeeded(
            vec![
                release(None, "series 9", "c.10"),
                release(None, "never heard of it", "c.1"),
            ],
            Utc::now(),
        );

        let report = ingestor.ingest(&batch, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.resolved_by_title, 1);
        assert_eq!(report.unresolved, 1);
        assert_eq!(report.new_releases, 1);
        let latest = ingestor.db.latest_releases_for_series(&[id(9)]).await.unwrap();
        assert_eq!(latest[0].label, "c.10");
    }

    #[tokio::test]
    async fn test_invalid_series_does_not_block_releases() {
        let (ingestor, _source) = ingestor(FakeSeriesSource::with_invalid(&[4])).await;
        let batch = ReleaseBatch::succeeded(
            vec![release(Some(3), "a", "c.1"), release(Some(4), "b", "c.1")],
            Utc::now(),
        );

        let report = ingestor.ingest(&batch, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.new_series, 1);
        assert_eq!(report.new_releases, 2);
        assert_eq!(ingestor.db.series_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_is_skipped() {
        let (ingestor, source) = ingestor(FakeSeriesSource::default()).await;

        let report = ingestor
            .ingest(&ReleaseBatch::failed(Utc::now()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report, IngestReport::default());
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn test_run_consumes_until_channel_closes() {
        let (ingestor, _source) = ingestor(FakeSeriesSource::default()).await;
        let (tx, rx) = mpsc::channel(1);

        let feeder = tokio::spawn(async move {
            tx.send(ReleaseBatch::failed(Utc::now())).await.unwrap();
            tx.send(ReleaseBatch::succeeded(
                vec![release(Some(5), "series 5", "c.1")],
                Utc::now(),
            ))
            .await
            .unwrap();
        });

        ingestor.run(rx, CancellationToken::new()).await;
        feeder.await.unwrap();

        assert_eq!(ingestor.db.release_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_populate_skips_known_and_invalid() {
        let (ingestor, source) = ingestor(FakeSeriesSource::with_invalid(&[3])).await;
        ingestor.db.upsert_series(&[info_for(id(2))]).await.unwrap();

        let stored = ingestor
            .populate(0..6, &CancellationToken::new())
            .await
            .unwrap();

        // 0 is not an id, 2 is known, 3 is invalid
        assert_eq!(stored, 3);
        assert_eq!(source.call_count(), 4);
        assert_eq!(ingestor.db.series_count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_populate_cancelled_does_nothing() {
        let (ingestor, source) = ingestor(FakeSeriesSource::default()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stored = ingestor.populate(1..100, &cancel).await.unwrap();

        assert_eq!(stored, 0);
        assert_eq!(source.call_count(), 0);
    }
}
