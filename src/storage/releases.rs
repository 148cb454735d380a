use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{StoredRelease, StoredReleaseRow};
use crate::scrape::{Release, SeriesId};

const BATCH_SIZE: usize = 100;

impl Database {
    // ========================================================================
    // Release Operations
    // ========================================================================

    /// Stores resolved releases, ignoring ones already known by
    /// (series, label, translators). Unresolved releases are skipped.
    ///
    /// Returns the number of newly inserted rows.
    pub async fn upsert_releases(&self, releases: &[Release]) -> Result<usize> {
        let resolved: Vec<(SeriesId, &Release)> = releases
            .iter()
            .filter_map(|r| r.series_id.map(|id| (id, r)))
            .collect();

        let skipped = releases.len() - resolved.len();
        if skipped > 0 {
            tracing::debug!(skipped, "Skipping releases without a series id");
        }
        if resolved.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in resolved.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO releases (series_id, title, label, translators, observed_at) ",
            );
            builder.push_values(chunk, |mut b, (series_id, release)| {
                b.push_bind(series_id.as_i64())
                    .push_bind(&release.title)
                    .push_bind(&release.label)
                    .push_bind(&release.translators)
                    .push_bind(release.observed_at.timestamp());
            });
            builder.push(" ON CONFLICT(series_id, label, translators) DO NOTHING");
            inserted += builder.build().execute(&mut *tx).await?.rows_affected() as usize;
        }

        tx.commit().await?;

        tracing::debug!(candidates = resolved.len(), inserted, "Stored releases");
        Ok(inserted)
    }

    /// Latest release of each given series, newest first.
    ///
    /// Releases seen in the same poll cycle share `observed_at`; among those
    /// the first stored wins, since the releases page lists newest first.
    /// Series without any stored release are absent from the result.
    pub async fn latest_releases_for_series(
        &self,
        ids: &[SeriesId],
    ) -> Result<Vec<StoredRelease>> {
        let mut latest = Vec::new();

        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                r#"SELECT series_id, display_title, label, translators, observed_at FROM (
                    SELECT r.series_id, s.display_title, r.label, r.translators, r.observed_at,
                           ROW_NUMBER() OVER (
                               PARTITION BY r.series_id
                               ORDER BY r.observed_at DESC, r.id ASC
                           ) AS row_rank
                    FROM releases r
                    INNER JOIN series s ON s.id = r.series_id
                    WHERE r.series_id IN ("#,
            );
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_i64());
            }
            separated.push_unseparated(")) WHERE row_rank = 1");

            let rows: Vec<StoredReleaseRow> =
                builder.build_query_as().fetch_all(&self.pool).await?;
            latest.extend(rows.into_iter().filter_map(StoredReleaseRow::into_release));
        }

        latest.sort_by(|a, b| {
            b.observed_at
                .cmp(&a.observed_at)
                .then_with(|| a.series_id.cmp(&b.series_id))
        });
        Ok(latest)
    }

    /// Number of stored releases
    pub async fn release_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM releases")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
