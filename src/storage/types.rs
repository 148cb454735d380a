use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::feed::{FeedFingerprint, FeedFormat};
use crate::scrape::SeriesId;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while opening or migrating the database
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The database is locked by another feedgen process. Stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Maps lock-related sqlx errors to [`DatabaseError::InstanceLocked`]
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
pub(crate) fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StoredReleaseRow {
    pub series_id: i64,
    pub display_title: String,
    pub label: String,
    pub translators: String,
    pub observed_at: i64,
}

impl StoredReleaseRow {
    pub(crate) fn into_release(self) -> Option<StoredRelease> {
        Some(StoredRelease {
            series_id: SeriesId::from_i64(self.series_id)?,
            display_title: self.display_title,
            label: self.label,
            translators: self.translators,
            observed_at: DateTime::from_timestamp(self.observed_at, 0)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SeriesTitleRow {
    pub title: String,
    pub series_id: i64,
    pub display_title: String,
}

impl SeriesTitleRow {
    pub(crate) fn into_match(self) -> Option<SeriesTitleMatch> {
        Some(SeriesTitleMatch {
            title: self.title,
            series_id: SeriesId::from_i64(self.series_id)?,
            display_title: self.display_title,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub fingerprint: String,
    pub series_ids: String,
    pub format: String,
    pub created_at: i64,
}

impl FeedRow {
    pub(crate) fn into_record(self) -> anyhow::Result<FeedRecord> {
        let raw_ids: Vec<u64> = serde_json::from_str(&self.series_ids)?;
        let series_ids = raw_ids.into_iter().filter_map(SeriesId::new).collect();
        let fingerprint = FeedFingerprint::parse(&self.fingerprint)
            .ok_or_else(|| anyhow::anyhow!("Stored fingerprint '{}' is malformed", self.fingerprint))?;
        let format: FeedFormat = self.format.parse().map_err(anyhow::Error::msg)?;
        let created_at = DateTime::from_timestamp(self.created_at, 0)
            .ok_or_else(|| anyhow::anyhow!("Stored timestamp {} is out of range", self.created_at))?;

        Ok(FeedRecord {
            fingerprint,
            series_ids,
            format,
            created_at,
        })
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Most recent stored release of a series, joined with its display title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRelease {
    pub series_id: SeriesId,
    pub display_title: String,
    pub label: String,
    pub translators: String,
    pub observed_at: DateTime<Utc>,
}

/// A persisted feed definition. Created once per distinct series set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRecord {
    pub fingerprint: FeedFingerprint,
    /// Sorted ascending
    pub series_ids: Vec<SeriesId>,
    pub format: FeedFormat,
    pub created_at: DateTime<Utc>,
}

/// A known title and the series it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesTitleMatch {
    pub title: String,
    pub series_id: SeriesId,
    pub display_title: String,
}
