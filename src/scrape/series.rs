//! Parser for a single series detail page.

use scraper::Html;
use std::collections::BTreeSet;

use super::html::{clean_text, direct_text_nodes, find_path, Step};
use super::types::{ScrapeError, SeriesId, SeriesInfo};

/// `/html/body/div[2]/div[2]/div[2]/div[2]/div/div[2]/div[1]`
const INFO_PANEL: &[Step] = &[
    Step::Nth("body", 1),
    Step::Nth("div", 2),
    Step::Nth("div", 2),
    Step::Nth("div", 2),
    Step::Nth("div", 2),
    Step::Any("div"),
    Step::Nth("div", 2),
    Step::Nth("div", 1),
];

/// `/html/body/div[2]/div[2]/div[2]/div[2]/div/div/div/div[2]/div`
const ERROR_PANEL: &[Step] = &[
    Step::Nth("body", 1),
    Step::Nth("div", 2),
    Step::Nth("div", 2),
    Step::Nth("div", 2),
    Step::Nth("div", 2),
    Step::Any("div"),
    Step::Any("div"),
    Step::Any("div"),
    Step::Nth("div", 2),
    Step::Any("div"),
];

// Relative to the info panel
const MAIN_TITLE: &[Step] = &[Step::Nth("div", 1), Step::Nth("span", 1)];
const ASSOCIATED_NAMES: &[Step] = &[Step::Nth("div", 3), Step::Nth("div", 8)];
const LATEST_RELEASE: &[Step] = &[Step::Nth("div", 3), Step::Nth("div", 12)];

const INVALID_ID_MESSAGE: &str = "You specified an invalid series id.";
const NOT_AVAILABLE: &str = "N/A";
const RELEASE_BY_SEPARATOR: &str = " by ";

/// Parses a series detail page.
///
/// # Errors
///
/// - [`ScrapeError::InvalidSeriesId`] if the catalog rendered its
///   "invalid series id" panel instead of series information
/// - [`ScrapeError::Structure`] if the page does not have the expected shape
pub fn parse_series_page(series_id: SeriesId, html: &str) -> Result<SeriesInfo, ScrapeError> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let Some(panel) = find_path(root, INFO_PANEL) else {
        let invalid_id = find_path(root, ERROR_PANEL)
            .map(|error| clean_text(error).contains(INVALID_ID_MESSAGE))
            .unwrap_or(false);
        return Err(if invalid_id {
            ScrapeError::InvalidSeriesId(series_id)
        } else {
            ScrapeError::Structure(format!("series {series_id}: no info panel"))
        });
    };

    let display_title = find_path(panel, MAIN_TITLE)
        .map(clean_text)
        .ok_or_else(|| ScrapeError::Structure(format!("series {series_id}: no title")))?;
    if display_title.is_empty() {
        return Err(ScrapeError::Structure(format!(
            "series {series_id}: empty title"
        )));
    }

    let names = find_path(panel, ASSOCIATED_NAMES).ok_or_else(|| {
        ScrapeError::Structure(format!("series {series_id}: no associated names"))
    })?;
    let mut titles: BTreeSet<String> = direct_text_nodes(names)
        .into_iter()
        .filter(|name| !is_placeholder(name))
        .map(|name| name.to_lowercase())
        .collect();
    titles.insert(display_title.to_lowercase());

    let releases = find_path(panel, LATEST_RELEASE).ok_or_else(|| {
        ScrapeError::Structure(format!("series {series_id}: no latest release"))
    })?;
    let latest_release = latest_release_label(&clean_text(releases));

    Ok(SeriesInfo {
        series_id,
        display_title,
        titles,
        latest_release,
    })
}

fn is_placeholder(name: &str) -> bool {
    name.is_empty() || name.eq_ignore_ascii_case(NOT_AVAILABLE)
}

/// `"c.45 by Some Group, 2 days ago"` → `Some("c.45")`; `"N/A"` → `None`.
fn latest_release_label(text: &str) -> Option<String> {
    if text.contains(NOT_AVAILABLE) {
        return None;
    }
    text.split(RELEASE_BY_SEPARATOR)
        .next()
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Wraps `inner` so that it sits at the given chain of 1-based `<div>`
    /// positions, each level padded with empty sibling divs.
    pub(crate) fn nest(positions: &[usize], inner: &str) -> String {
        positions.iter().rev().fold(inner.to_string(), |acc, &n| {
            format!("{}<div>{acc}</div>", "<div></div>".repeat(n - 1))
        })
    }

    /// A detail page with the info panel populated.
    pub(crate) fn series_page(title: &str, associated: &str, latest: &str) -> String {
        let column: String = (1..=12)
            .map(|i| match i {
                8 => format!(r#"<div class="sContent">{associated}</div>"#),
                12 => format!(r#"<div class="sContent">{latest}</div>"#),
                _ => r#"<div class="sCat"></div>"#.to_string(),
            })
            .collect();
        let panel = format!(
            r#"<div><span class="releasestitle">{title}</span></div><div></div><div>{column}</div>"#
        );
        format!(
            "<html><body>{}</body></html>",
            nest(&[2, 2, 2, 2, 1, 2, 1], &panel)
        )
    }

    /// The page the catalog serves for an unknown id.
    pub(crate) fn invalid_id_page() -> String {
        format!(
            "<html><body>{}</body></html>",
            nest(
                &[2, 2, 2, 2, 1, 1, 1, 2, 1],
                "You specified an invalid series id."
            )
        )
    }
}
