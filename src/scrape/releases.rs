//! Parser for the catalog's "recent releases" page.
//!
//! The page lists releases in per-day sections. Each section is a flat run of
//! sibling `<div>` cells; the cell's CSS class says which column it belongs
//! to. A title cell starts a new row, so rows are rebuilt by walking the
//! cells in document order.

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

use super::html::{clean_text, find_path, has_class, Step};
use super::types::{Release, ScrapeError, SeriesId};

const TITLE_CLASS: &str = "col-6";
const TRANSLATORS_CLASS: &str = "col-4";
const LABEL_CLASS: &str = "col-2";

/// Today's section, relative to `#main_content`.
const TODAY_SECTION: &[Step] = &[
    Step::Nth("div", 2),
    Step::Any("div"),
    Step::Nth("div", 2),
    Step::Any("div"),
];

/// Yesterday's section, relative to `#main_content`.
const YESTERDAY_SECTION: &[Step] = &[
    Step::Nth("div", 2),
    Step::Any("div"),
    Step::Nth("div", 3),
    Step::Any("div"),
];

static MAIN_CONTENT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#main_content").expect("static selector"));
static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("static selector"));

/// Parses the full releases page: today's releases followed by yesterday's.
///
/// # Errors
///
/// Returns [`ScrapeError::Structure`] if the page has no today section.
/// A missing yesterday section is tolerated (early in the day the catalog
/// sometimes renders only one).
pub fn parse_releases_page(
    html: &str,
    base: &Url,
    observed_at: DateTime<Utc>,
) -> Result<Vec<Release>, ScrapeError> {
    let document = Html::parse_document(html);
    let main = document
        .select(&MAIN_CONTENT)
        .next()
        .ok_or_else(|| ScrapeError::Structure("releases page has no #main_content".into()))?;

    let today = find_path(main, TODAY_SECTION)
        .ok_or_else(|| ScrapeError::Structure("releases page has no section for today".into()))?;
    let mut releases = parse_day_section(today, base, observed_at);

    match find_path(main, YESTERDAY_SECTION) {
        Some(yesterday) => releases.extend(parse_day_section(yesterday, base, observed_at)),
        None => tracing::warn!("Releases page has no section for yesterday"),
    }

    Ok(releases)
}

/// Parses a bare day section (the cells of one table, header row included).
pub fn parse_releases_fragment(
    html: &str,
    base: &Url,
    observed_at: DateTime<Utc>,
) -> Vec<Release> {
    let fragment = Html::parse_fragment(html);
    parse_day_section(fragment.root_element(), base, observed_at)
}

/// Rebuilds release rows from the cells directly under `section`.
///
/// The first completed row is the table header and is dropped. Output keeps
/// document order.
pub fn parse_day_section(
    section: ElementRef<'_>,
    base: &Url,
    observed_at: DateTime<Utc>,
) -> Vec<Release> {
    let mut rows = Vec::new();
    let mut current: Option<Release> = None;

    for cell in section.children().filter_map(ElementRef::wrap) {
        if has_class(cell, TITLE_CLASS) {
            if let Some(done) = current.take().filter(|r| !r.title.is_empty()) {
                rows.push(done);
            }
            current = Some(open_row(cell, base, observed_at));
        } else if has_class(cell, TRANSLATORS_CLASS) {
            if let Some(row) = current.as_mut() {
                row.translators = clean_text(cell);
            }
        } else if has_class(cell, LABEL_CLASS) {
            if let Some(row) = current.as_mut() {
                row.label = clean_text(cell);
            }
        }
    }
    if let Some(done) = current.filter(|r| !r.title.is_empty()) {
        rows.push(done);
    }

    // Header row: "Title", "Release", "Groups"
    rows.into_iter().skip(1).collect()
}

fn open_row(cell: ElementRef<'_>, base: &Url, observed_at: DateTime<Utc>) -> Release {
    let link = cell.select(&ANCHOR).next();
    let title = clean_text(link.unwrap_or(cell)).to_lowercase();
    let series_id = link
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| series_id_from_href(base, href));

    Release {
        series_id,
        title,
        label: String::new(),
        translators: String::new(),
        observed_at,
    }
}

/// Extracts the `id` query parameter of a series link. Relative links are
/// resolved against `base`.
pub(crate) fn series_id_from_href(base: &Url, href: &str) -> Option<SeriesId> {
    let link = base.join(href.trim()).ok()?;
    let (_, id) = link.query_pairs().find(|(key, _)| key == "id")?;
    SeriesId::parse(&id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn base() -> Url {
        Url::parse("https://www.mangaupdates.com/").unwrap()
    }

    const HEADER: &str = r#"
        <div class="col-6 pbreak"><b>Title</b></div>
        <div class="col-2 pbreak"><b>Release</b></div>
        <div class="col-4 pbreak"><b>Groups</b></div>"#;

    fn row(title_cell: &str, label: &str, group: &str) -> String {
        format!(
            r#"<div class="col-6 pbreak">{title_cell}</div>
               <div class="col-2 pbreak">{label}</div>
               <div class="col-4 pbreak"><a href="https://www.mangaupdates.com/groups.html?id=9">{group}</a></div>"#
        )
    }

    #[test]
    fn test_header_plus_one_linked_row() {
        let html = format!(
            "{HEADER}{}",
            row(
                r#"<a href="https://www.mangaupdates.com/series.html?id=1234" title="Series Info">Some Title</a>"#,
                "c.5",
                "Scans Group"
            )
        );
        let now = Utc::now();

        let releases = parse_releases_fragment(&html, &base(), now);

        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].series_id, SeriesId::new(1234));
        assert_eq!(releases[0].title, "some title");
        assert_eq!(releases[0].label, "c.5");
        assert_eq!(releases[0].translators, "Scans Group");
        assert_eq!(releases[0].observed_at, now);
    }

    #[test]
    fn test_row_without_link_is_unresolved() {
        let html = format!("{HEADER}{}", row("Unlinked Title", "v.2 c.10", "Group"));

        let releases = parse_releases_fragment(&html, &base(), Utc::now());

        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].series_id, None);
        assert_eq!(releases[0].title, "unlinked title");
    }

    #[test]
    fn test_link_with_unparsable_id_is_unresolved() {
        let html = format!(
            "{HEADER}{}",
            row(r#"<a href="series.html?id=abc">Odd Link</a>"#, "c.1", "Group")
        );

        let releases = parse_releases_fragment(&html, &base(), Utc::now());

        assert_eq!(releases.len(), 1);
        assert!(!releases[0].is_resolved());
    }

    #[test]
    fn test_relative_link_resolves_against_base() {
        let html = format!(
            "{HEADER}{}",
            row(r#"<a href="series.html?id=77">Relative</a>"#, "c.1", "Group")
        );

        let releases = parse_releases_fragment(&html, &base(), Utc::now());

        assert_eq!(releases[0].series_id, SeriesId::new(77));
    }

    #[test]
    fn test_preserves_document_order() {
        let html = format!(
            "{HEADER}{}{}{}",
            row(r#"<a href="series.html?id=3">Third Newest</a>"#, "c.3", "A"),
            row(r#"<a href="series.html?id=1">Second Newest</a>"#, "c.2", "B"),
            row(r#"<a href="series.html?id=2">Oldest</a>"#, "c.1", "C"),
        );

        let releases = parse_releases_fragment(&html, &base(), Utc::now());

        let titles: Vec<_> = releases.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["third newest", "second newest", "oldest"]);
    }

    #[test]
    fn test_header_only_yields_nothing() {
        assert!(parse_releases_fragment(HEADER, &base(), Utc::now()).is_empty());
        assert!(parse_releases_fragment("", &base(), Utc::now()).is_empty());
    }

    #[test]
    fn test_cells_before_first_title_are_ignored() {
        let html = format!(
            r#"<div class="col-4">stray</div>{HEADER}{}"#,
            row("Title", "c.1", "G")
        );

        let releases = parse_releases_fragment(&html, &base(), Utc::now());

        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].translators, "G");
    }

    fn releases_page(today: &str, yesterday: Option<&str>) -> String {
        let yesterday = yesterday
            .map(|rows| format!("<div><div>{rows}</div></div>"))
            .unwrap_or_default();
        format!(
            r#"<html><body><div id="main_content">
                <div>banner</div>
                <div><div>
                    <div>heading</div>
                    <div><div>{today}</div></div>
                    {yesterday}
                </div></div>
            </div></body></html>"#
        )
    }

    #[test]
    fn test_full_page_concatenates_today_then_yesterday() {
        let today = format!("{HEADER}{}", row("Today Title", "c.9", "G1"));
        let yesterday = format!("{HEADER}{}", row("Yesterday Title", "c.8", "G2"));
        let html = releases_page(&today, Some(&yesterday));

        let releases = parse_releases_page(&html, &base(), Utc::now()).unwrap();

        let titles: Vec<_> = releases.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["today title", "yesterday title"]);
    }

    #[test]
    fn test_full_page_without_yesterday_is_tolerated() {
        let today = format!("{HEADER}{}", row("Only Today", "c.1", "G"));
        let html = releases_page(&today, None);

        let releases = parse_releases_page(&html, &base(), Utc::now()).unwrap();

        assert_eq!(releases.len(), 1);
    }

    #[test]
    fn test_full_page_without_main_content_is_structure_error() {
        let result = parse_releases_page("<html><body><p>maintenance</p></body></html>", &base(), Utc::now());
        assert!(matches!(result, Err(ScrapeError::Structure(_))));
    }
}
