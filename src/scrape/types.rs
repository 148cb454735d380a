use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use super::fetcher::FetchError;

// ============================================================================
// Identifiers
// ============================================================================

/// Upstream catalog id of a series. Always in `1..=i64::MAX`, so it fits an
/// SQLite integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId(u64);

impl SeriesId {
    /// Returns `None` for zero, which the catalog never assigns, and for
    /// values SQLite cannot store.
    pub fn new(raw: u64) -> Option<Self> {
        (raw > 0 && i64::try_from(raw).is_ok()).then_some(Self(raw))
    }

    /// Parses a decimal id, ignoring surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<u64>().ok().and_then(Self::new)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// SQLite integer representation.
    pub(crate) fn as_i64(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }

    pub(crate) fn from_i64(raw: i64) -> Option<Self> {
        u64::try_from(raw).ok().and_then(Self::new)
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Scraped Records
// ============================================================================

/// One release announcement scraped from the releases page.
///
/// `series_id` is `None` when the title cell carried no usable series link.
/// Such releases are resolved later by title lookup; this is an expected
/// state, not a parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub series_id: Option<SeriesId>,
    /// Lowercased title as shown in the releases table
    pub title: String,
    /// Chapter/volume label, e.g. `"v.2 c.14"`
    pub label: String,
    pub translators: String,
    pub observed_at: DateTime<Utc>,
}

impl Release {
    pub fn is_resolved(&self) -> bool {
        self.series_id.is_some()
    }

    /// Returns a copy of this release attributed to `series_id`.
    pub fn resolved_as(self, series_id: SeriesId) -> Self {
        Self {
            series_id: Some(series_id),
            ..self
        }
    }
}

/// Metadata scraped from a single series detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesInfo {
    pub series_id: SeriesId,
    pub display_title: String,
    /// Lowercased, trimmed, deduplicated. Contains the display title.
    pub titles: BTreeSet<String>,
    /// `None` when the page lists no release ("N/A")
    pub latest_release: Option<String>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors produced while fetching and parsing upstream pages.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The page could not be fetched
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The catalog reported that this series id does not exist
    #[error("invalid series id {0}")]
    InvalidSeriesId(SeriesId),
    /// The page did not have the expected shape (upstream layout drift)
    #[error("unexpected page structure: {0}")]
    Structure(String),
}

impl ScrapeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScrapeError::Fetch(FetchError::Cancelled))
    }
}
