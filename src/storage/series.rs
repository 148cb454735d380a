use anyhow::Result;
use sqlx::QueryBuilder;
use std::collections::HashSet;

use super::schema::Database;
use super::types::{SeriesTitleMatch, SeriesTitleRow};
use crate::scrape::{SeriesId, SeriesInfo};

/// SQLite's default bound-parameter limit is well above this
const BATCH_SIZE: usize = 100;

impl Database {
    // ========================================================================
    // Series Operations
    // ========================================================================

    /// Returns the subset of `ids` that already have a series row.
    pub async fn find_known_series_ids(&self, ids: &[SeriesId]) -> Result<Vec<SeriesId>> {
        let mut known = Vec::new();

        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("SELECT id FROM series WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_i64());
            }
            separated.push_unseparated(")");

            let rows: Vec<(i64,)> = builder.build_query_as().fetch_all(&self.pool).await?;
            known.extend(rows.into_iter().filter_map(|(id,)| SeriesId::from_i64(id)));
        }

        known.sort_unstable();
        known.dedup();
        Ok(known)
    }

    /// Stores series and their titles.
    ///
    /// Existing series rows are left untouched; new titles of an existing
    /// series are still added. Returns the number of newly inserted series.
    pub async fn upsert_series(&self, series: &[SeriesInfo]) -> Result<usize> {
        let mut seen = HashSet::new();
        let unique: Vec<&SeriesInfo> = series
            .iter()
            .filter(|info| seen.insert(info.series_id))
            .collect();
        if unique.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in unique.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO series (id, display_title, latest_release, created_at) ",
            );
            builder.push_values(chunk, |mut b, info| {
                b.push_bind(info.series_id.as_i64())
                    .push_bind(&info.display_title)
                    .push_bind(info.latest_release.as_deref())
                    .push_bind(now);
            });
            builder.push(" ON CONFLICT(id) DO NOTHING");
            inserted += builder.build().execute(&mut *tx).await?.rows_affected() as usize;
        }

        let titles: Vec<(i64, &str)> = unique
            .iter()
            .flat_map(|info| {
                info.titles
                    .iter()
                    .map(|t| t.trim())
                    .filter(|t| !t.is_empty())
                    .map(move |t| (info.series_id.as_i64(), t))
            })
            .collect();

        for chunk in titles.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT INTO series_titles (series_id, title) ");
            builder.push_values(chunk, |mut b, (series_id, title)| {
                b.push_bind(*series_id).push_bind(title.to_lowercase());
            });
            builder.push(" ON CONFLICT(title, series_id) DO NOTHING");
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            requested = unique.len(),
            inserted,
            titles = titles.len(),
            "Stored series"
        );
        Ok(inserted)
    }

    /// Exact lookup of lowercased titles. A title shared by several series
    /// yields one match per series.
    pub async fn resolve_series_by_titles(
        &self,
        titles: &[String],
    ) -> Result<Vec<SeriesTitleMatch>> {
        let mut matches = Vec::new();

        for chunk in titles.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                r#"SELECT t.title, t.series_id, s.display_title
                   FROM series_titles t
                   INNER JOIN series s ON s.id = t.series_id
                   WHERE t.title IN ("#,
            );
            let mut separated = builder.separated(", ");
            for title in chunk {
                separated.push_bind(title.trim().to_lowercase());
            }
            separated.push_unseparated(") ORDER BY t.title, t.series_id");

            let rows: Vec<SeriesTitleRow> = builder.build_query_as().fetch_all(&self.pool).await?;
            matches.extend(rows.into_iter().filter_map(SeriesTitleRow::into_match));
        }

        Ok(matches)
    }

    /// Number of stored series
    pub async fn series_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM series")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
