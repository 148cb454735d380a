//! Feed identity, persistence-facing service and rendering.
//!
//! - [`fingerprint`] - content-derived feed identifier
//! - [`service`] - create a feed from titles/ids, view it by fingerprint
//! - [`render`] - RSS 2.0, Atom 1.0 and JSON Feed 1.1 output

pub mod fingerprint;
mod format;
pub mod render;
pub mod service;

pub use fingerprint::{normalize_entry, FeedFingerprint};
pub use format::FeedFormat;
pub use service::{FeedError, FeedRequest, FeedService, RenderedFeed};
