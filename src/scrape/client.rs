use chrono::Utc;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::fetcher::PageFetcher;
use super::releases::parse_releases_page;
use super::series::parse_series_page;
use super::types::{Release, ScrapeError, SeriesId, SeriesInfo};

/// Anything that can produce the current release list.
pub trait ReleaseSource: Send + Sync + 'static {
    fn fetch_releases(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<Release>, ScrapeError>> + Send;
}

/// Anything that can produce the detail record of one series.
pub trait SeriesSource: Send + Sync + 'static {
    fn fetch_series(
        &self,
        id: SeriesId,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<SeriesInfo, ScrapeError>> + Send;
}

/// Catalog client: builds page URLs, fetches them and hands the bodies to
/// the parsers.
#[derive(Clone)]
pub struct Scraper {
    fetcher: PageFetcher,
    base: Url,
}

impl Scraper {
    pub fn new(fetcher: PageFetcher, base: Url) -> Self {
        Self { fetcher, base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn releases_url(&self) -> String {
        self.page_url("releases.html", None)
    }

    pub fn series_url(&self, id: SeriesId) -> String {
        self.page_url("series.html", Some(id))
    }

    fn page_url(&self, page: &str, id: Option<SeriesId>) -> String {
        let mut url = self.base.join(page).unwrap_or_else(|_| self.base.clone());
        if let Some(id) = id {
            url.query_pairs_mut().append_pair("id", &id.to_string());
        }
        url.to_string()
    }
}

impl ReleaseSource for Scraper {
    async fn fetch_releases(&self, cancel: &CancellationToken) -> Result<Vec<Release>, ScrapeError> {
        let body = self.fetcher.fetch(&self.releases_url(), cancel).await?;
        parse_releases_page(&body, &self.base, Utc::now())
    }
}

impl SeriesSource for Scraper {
    async fn fetch_series(
        &self,
        id: SeriesId,
        cancel: &CancellationToken,
    ) -> Result<SeriesInfo, ScrapeError> {
        let body = self.fetcher.fetch(&self.series_url(id), cancel).await?;
        parse_series_page(id, &body)
    }
}
