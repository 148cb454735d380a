//! Release feed generator for a serialized-fiction catalog.
//!
//! Polls the catalog's release list, stores releases and series metadata in
//! SQLite and serves them back as RSS, Atom or JSON feeds identified by a
//! fingerprint of the series they follow.

pub mod config;
pub mod feed;
pub mod ingest;
pub mod scrape;
pub mod storage;
