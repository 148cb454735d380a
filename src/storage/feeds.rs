use anyhow::Result;

use super::schema::Database;
use super::types::{FeedRecord, FeedRow};
use crate::feed::{FeedFingerprint, FeedFormat};
use crate::scrape::SeriesId;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Look up a feed by its fingerprint
    pub async fn get_feed_by_fingerprint(
        &self,
        fingerprint: &FeedFingerprint,
    ) -> Result<Option<FeedRecord>> {
        let row: Option<FeedRow> = sqlx::query_as(
            "SELECT fingerprint, series_ids, format, created_at FROM feeds WHERE fingerprint = ?",
        )
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(FeedRow::into_record).transpose()
    }

    /// Returns the feed stored under `fingerprint`, creating it first if it
    /// does not exist yet.
    ///
    /// An existing record is returned as stored; `series_ids` and `format`
    /// only apply to a new record. Concurrent callers with the same
    /// fingerprint all observe the same record: the primary key decides
    /// which insert wins.
    pub async fn get_or_create_feed(
        &self,
        fingerprint: &FeedFingerprint,
        series_ids: &[SeriesId],
        format: FeedFormat,
    ) -> Result<FeedRecord> {
        let mut ids: Vec<u64> = series_ids.iter().map(|id| id.get()).collect();
        ids.sort_unstable();
        ids.dedup();
        let encoded = serde_json::to_string(&ids)?;

        let created = sqlx::query(
            r#"
            INSERT INTO feeds (fingerprint, series_ids, format, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO NOTHING
        "#,
        )
        .bind(fingerprint.as_str())
        .bind(&encoded)
        .bind(format.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if created {
            tracing::info!(fingerprint = %fingerprint, series = ids.len(), "Created feed");
        }

        self.get_feed_by_fingerprint(fingerprint)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Feed {} vanished after insert", fingerprint))
    }

    /// Number of stored feeds
    pub async fn feed_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::feed::{FeedFingerprint, FeedFormat};
    use crate::scrape::SeriesId;
    use crate::storage::Database;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn ids(raw: &[u64]) -> Vec<SeriesId> {
        raw.iter().copied().filter_map(SeriesId::new).collect()
    }

    #[tokio::test]
    async fn test_get_or_create_returns_existing_unchanged() {
        let db = test_db().await;
        let fp = FeedFingerprint::compute(["1", "2"]);

        let first = db
            .get_or_create_feed(&fp, &ids(&[2, 1]), FeedFormat::Rss)
            .await
            .unwrap();
        let second = db
            .get_or_create_feed(&fp, &ids(&[1, 2]), FeedFormat::Atom)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(second.format, FeedFormat::Rss);
        assert_eq!(second.series_ids, ids(&[1, 2]));
        assert_eq!(db.feed_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_fingerprint_is_none() {
        let db = test_db().await;
        let fp = FeedFingerprint::compute(["nothing"]);
        assert!(db.get_feed_by_fingerprint(&fp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_creation_yields_one_record() {
        let db = test_db().await;
        let fp = FeedFingerprint::compute(["7", "8", "9"]);
        let series = ids(&[7, 8, 9]);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                let fp = fp.clone();
                let series = series.clone();
                tokio::spawn(async move {
                    db.get_or_create_feed(&fp, &series, FeedFormat::Json).await
                })
            })
            .collect();

        let records: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert!(records.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(db.feed_count().await.unwrap(), 1);
    }
}
