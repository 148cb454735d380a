mod feeds;
mod releases;
mod schema;
mod series;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, FeedRecord, SeriesTitleMatch, StoredRelease};
