use std::collections::BTreeSet;
use thiserror::Error;
use url::Url;

use super::fingerprint::{normalize_entry, FeedFingerprint};
use super::format::FeedFormat;
use super::render::{render, FeedChannel, FeedItem};
use crate::scrape::SeriesId;
use crate::storage::{Database, FeedRecord, StoredRelease};

const FEED_TITLE: &str = "MangaUpdates Release Page Feed";
const FEED_DESCRIPTION: &str =
    "Latest releases of the requested series, as last seen on the MangaUpdates releases page.";

/// Errors surfaced to feed callers.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Nothing matched the request, or the fingerprint is malformed or unknown
    #[error("Feed not found")]
    NotFound,
    #[error("Failed to render feed: {0}")]
    Render(String),
    #[error("Storage error: {0}")]
    Database(String),
}

impl From<anyhow::Error> for FeedError {
    fn from(err: anyhow::Error) -> Self {
        FeedError::Database(format!("{err:#}"))
    }
}

/// A feed creation request: series ids and/or titles, plus a format.
#[derive(Debug, Clone, Default)]
pub struct FeedRequest {
    pub entries: Vec<String>,
    pub format: FeedFormat,
}

impl FeedRequest {
    pub fn new<I, S>(entries: I, format: FeedFormat) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
            format,
        }
    }
}

/// A rendered feed document.
#[derive(Debug, Clone)]
pub struct RenderedFeed {
    pub record: FeedRecord,
    pub format: FeedFormat,
    pub body: String,
}

impl RenderedFeed {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// Creates and renders feeds from stored series and releases.
#[derive(Clone)]
pub struct FeedService {
    db: Database,
    catalog: Url,
    feed_link: String,
}

impl FeedService {
    /// `catalog` is the upstream base URL; `feed_link` is the public prefix
    /// under which feeds are served, the fingerprint is appended to it.
    pub fn new(db: Database, catalog: Url, feed_link: impl Into<String>) -> Self {
        Self {
            db,
            catalog,
            feed_link: feed_link.into(),
        }
    }

    /// Resolves the request to a set of known series and returns the feed
    /// for that set, creating it on first use.
    ///
    /// Numeric entries are taken as series ids, falling back to a title
    /// lookup when no series has that id; everything else is looked up as a
    /// title. Requests that differ only in order, case, whitespace or
    /// duplicates map to the same feed.
    ///
    /// # Errors
    ///
    /// [`FeedError::NotFound`] if no entry resolves to a known series.
    pub async fn create_feed(&self, request: &FeedRequest) -> Result<FeedRecord, FeedError> {
        let entries: BTreeSet<String> = request
            .entries
            .iter()
            .filter_map(|e| normalize_entry(e))
            .collect();

        let ids: Vec<SeriesId> = entries.iter().filter_map(|e| SeriesId::parse(e)).collect();
        let mut resolved: BTreeSet<SeriesId> = self
            .db
            .find_known_series_ids(&ids)
            .await?
            .into_iter()
            .collect();

        let titles: Vec<String> = entries
            .into_iter()
            .filter(|entry| !SeriesId::parse(entry).is_some_and(|id| resolved.contains(&id)))
            .collect();

        let matches = self.db.resolve_series_by_titles(&titles).await?;
        let matched_titles: BTreeSet<&str> = matches.iter().map(|m| m.title.as_str()).collect();
        let unmatched = titles
            .iter()
            .filter(|t| !matched_titles.contains(t.as_str()))
            .count();
        resolved.extend(matches.iter().map(|m| m.series_id));

        tracing::debug!(
            requested = request.entries.len(),
            resolved = resolved.len(),
            unmatched_titles = unmatched,
            "Resolved feed request"
        );

        if resolved.is_empty() {
            return Err(FeedError::NotFound);
        }

        let series_ids: Vec<SeriesId> = resolved.into_iter().collect();
        let fingerprint = FeedFingerprint::compute(series_ids.iter().map(SeriesId::to_string));

        Ok(self
            .db
            .get_or_create_feed(&fingerprint, &series_ids, request.format)
            .await?)
    }

    /// Renders the feed stored under `fingerprint`.
    ///
    /// The stored format is used unless `format_override` is given.
    ///
    /// # Errors
    ///
    /// [`FeedError::NotFound`] for malformed or unknown fingerprints.
    pub async fn view_feed(
        &self,
        fingerprint: &str,
        format_override: Option<FeedFormat>,
    ) -> Result<RenderedFeed, FeedError> {
        let fingerprint = FeedFingerprint::parse(&fingerprint.trim().to_ascii_lowercase())
            .ok_or(FeedError::NotFound)?;
        let record = self
            .db
            .get_feed_by_fingerprint(&fingerprint)
            .await?
            .ok_or(FeedError::NotFound)?;

        let releases = self.db.latest_releases_for_series(&record.series_ids).await?;
        let format = format_override.unwrap_or(record.format);
        let channel = self.channel_for(&record, releases);
        let body = render(format, &channel).map_err(|e| FeedError::Render(format!("{e:#}")))?;

        Ok(RenderedFeed {
            record,
            format,
            body,
        })
    }

    pub fn series_link(&self, id: SeriesId) -> String {
        let mut url = self
            .catalog
            .join("series.html")
            .unwrap_or_else(|_| self.catalog.clone());
        url.query_pairs_mut().append_pair("id", &id.to_string());
        url.to_string()
    }

    fn channel_for(&self, record: &FeedRecord, releases: Vec<StoredRelease>) -> FeedChannel {
        let updated = releases
            .iter()
            .map(|r| r.observed_at)
            .max()
            .unwrap_or(record.created_at);

        let items = releases
            .into_iter()
            .map(|release| FeedItem {
                id: release.series_id.to_string(),
                link: self.series_link(release.series_id),
                title: release.display_title,
                summary: release.label,
                author: release.translators,
                published: release.observed_at,
            })
            .collect();

        FeedChannel {
            title: FEED_TITLE.to_string(),
            home_page: self.catalog.to_string(),
            self_link: format!(
                "{}/{}",
                self.feed_link.trim_end_matches('/'),
                record.fingerprint
            ),
            description: FEED_DESCRIPTION.to_string(),
            updated,
            items,
        }
    }
}
