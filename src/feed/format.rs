use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Syndication format a feed is rendered in.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    #[default]
    Json,
    Rss,
    Atom,
}

impl FeedFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedFormat::Json => "json",
            FeedFormat::Rss => "rss",
            FeedFormat::Atom => "atom",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            FeedFormat::Json => "application/feed+json",
            FeedFormat::Rss => "application/rss+xml",
            FeedFormat::Atom => "application/atom+xml",
        }
    }
}

impl fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(FeedFormat::Json),
            "rss" => Ok(FeedFormat::Rss),
            "atom" => Ok(FeedFormat::Atom),
            other => Err(format!("unknown feed format '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_json() {
        assert_eq!(FeedFormat::default(), FeedFormat::Json);
    }

    #[test]
    fn test_from_str_round_trips_as_str() {
        for format in [FeedFormat::Json, FeedFormat::Rss, FeedFormat::Atom] {
            assert_eq!(format.as_str().parse::<FeedFormat>(), Ok(format));
        }
        assert_eq!(" RSS ".parse::<FeedFormat>(), Ok(FeedFormat::Rss));
        assert!("opml".parse::<FeedFormat>().is_err());
    }
}
