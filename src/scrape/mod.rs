//! Upstream catalog ingestion: fetching, parsing, fan-out and polling.
//!
//! - [`fetcher`]: single page GET with bounded, jittered retries
//! - [`releases`] / [`series`]: HTML parsers for the two page kinds
//! - [`batch`]: worker-pool fetch of many series pages
//! - [`poller`]: periodic release-list fetch feeding a channel

pub mod batch;
pub mod client;
pub mod fetcher;
mod html;
pub mod poller;
pub mod releases;
pub mod series;
pub mod types;

pub use batch::{default_workers, fetch_series_batch, BatchOptions};
pub use client::{ReleaseSource, Scraper, SeriesSource};
pub use fetcher::{FetchError, PageFetcher, RequestIds, RetryPolicy};
pub use poller::{spawn_poller, ReleaseBatch};
pub use types::{Release, ScrapeError, SeriesId, SeriesInfo};
