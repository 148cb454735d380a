//! Feed document rendering: RSS 2.0 and Atom 1.0 through `quick-xml`,
//! JSON Feed 1.1 through `serde_json`.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;
use std::io::Cursor;

use super::format::FeedFormat;

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
const JSON_FEED_VERSION: &str = "https://jsonfeed.org/version/1.1";

/// Format-independent feed content.
#[derive(Debug, Clone)]
pub struct FeedChannel {
    pub title: String,
    /// Upstream catalog home page
    pub home_page: String,
    /// Where this feed can be fetched
    pub self_link: String,
    pub description: String,
    pub updated: DateTime<Utc>,
    pub items: Vec<FeedItem>,
}

/// One entry: the latest release of one series.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    /// Release label, e.g. "v.2 c.14"
    pub summary: String,
    /// Translator group(s)
    pub author: String,
    pub link: String,
    pub published: DateTime<Utc>,
}

pub fn render(format: FeedFormat, channel: &FeedChannel) -> Result<String> {
    match format {
        FeedFormat::Json => render_json(channel),
        FeedFormat::Rss => render_rss(channel),
        FeedFormat::Atom => render_atom(channel),
    }
}

// ============================================================================
// XML helpers
// ============================================================================

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn new_xml_writer() -> Result<XmlWriter> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;
    Ok(writer)
}

fn start(writer: &mut XmlWriter, element: BytesStart<'_>) -> Result<()> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    writer
        .write_event(Event::Start(element))
        .with_context(|| format!("Failed to write {name} element"))
}

fn end(writer: &mut XmlWriter, name: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .with_context(|| format!("Failed to write {name} end"))
}

fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<()> {
    start(writer, BytesStart::new(name))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .with_context(|| format!("Failed to write {name} text"))?;
    end(writer, name)
}

fn empty_element(writer: &mut XmlWriter, element: BytesStart<'_>) -> Result<()> {
    writer
        .write_event(Event::Empty(element))
        .context("Failed to write empty element")
}

fn finish(writer: XmlWriter) -> Result<String> {
    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).context("Generated feed contains invalid UTF-8")
}

// ============================================================================
// RSS 2.0
// ============================================================================

pub fn render_rss(channel: &FeedChannel) -> Result<String> {
    let mut writer = new_xml_writer()?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:dc", DC_NS));
    start(&mut writer, rss)?;
    start(&mut writer, BytesStart::new("channel"))?;

    text_element(&mut writer, "title", &channel.title)?;
    text_element(&mut writer, "link", &channel.home_page)?;
    text_element(&mut writer, "description", &channel.description)?;
    text_element(&mut writer, "lastBuildDate", &channel.updated.to_rfc2822())?;

    for item in &channel.items {
        start(&mut writer, BytesStart::new("item"))?;
        text_element(&mut writer, "title", &item.title)?;
        text_element(&mut writer, "link", &item.link)?;

        let mut guid = BytesStart::new("guid");
        guid.push_attribute(("isPermaLink", "false"));
        start(&mut writer, guid)?;
        writer
            .write_event(Event::Text(BytesText::new(&item.id)))
            .context("Failed to write guid text")?;
        end(&mut writer, "guid")?;

        text_element(&mut writer, "description", &item.summary)?;
        if !item.author.is_empty() {
            text_element(&mut writer, "dc:creator", &item.author)?;
        }
        text_element(&mut writer, "pubDate", &item.published.to_rfc2822())?;
        end(&mut writer, "item")?;
    }

    end(&mut writer, "channel")?;
    end(&mut writer, "rss")?;
    finish(writer)
}

// ============================================================================
// Atom 1.0
// ============================================================================

fn rfc3339(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn render_atom(channel: &FeedChannel) -> Result<String> {
    let mut writer = new_xml_writer()?;

    let mut feed = BytesStart::new("feed");
    feed.push_attribute(("xmlns", ATOM_NS));
    start(&mut writer, feed)?;

    text_element(&mut writer, "title", &channel.title)?;
    text_element(&mut writer, "subtitle", &channel.description)?;
    text_element(&mut writer, "id", &channel.self_link)?;

    let mut home = BytesStart::new("link");
    home.push_attribute(("href", channel.home_page.as_str()));
    empty_element(&mut writer, home)?;
    let mut this = BytesStart::new("link");
    this.push_attribute(("rel", "self"));
    this.push_attribute(("href", channel.self_link.as_str()));
    empty_element(&mut writer, this)?;

    text_element(&mut writer, "updated", &rfc3339(&channel.updated))?;

    for item in &channel.items {
        start(&mut writer, BytesStart::new("entry"))?;
        text_element(&mut writer, "title", &item.title)?;
        text_element(&mut writer, "id", &format!("{}#{}", item.link, item.published.timestamp()))?;

        let mut link = BytesStart::new("link");
        link.push_attribute(("href", item.link.as_str()));
        empty_element(&mut writer, link)?;

        text_element(&mut writer, "updated", &rfc3339(&item.published))?;
        text_element(&mut writer, "summary", &item.summary)?;
        if !item.author.is_empty() {
            start(&mut writer, BytesStart::new("author"))?;
            text_element(&mut writer, "name", &item.author)?;
            end(&mut writer, "author")?;
        }
        end(&mut writer, "entry")?;
    }

    end(&mut writer, "feed")?;
    finish(writer)
}

// ============================================================================
// JSON Feed 1.1
// ============================================================================

#[derive(Serialize)]
struct JsonFeed<'a> {
    version: &'static str,
    title: &'a str,
    home_page_url: &'a str,
    feed_url: &'a str,
    description: &'a str,
    items: Vec<JsonFeedItem<'a>>,
}

#[derive(Serialize)]
struct JsonFeedItem<'a> {
    id: &'a str,
    url: &'a str,
    title: &'a str,
    summary: &'a str,
    content_text: &'a str,
    date_published: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    authors: Vec<JsonFeedAuthor<'a>>,
}

#[derive(Serialize)]
struct JsonFeedAuthor<'a> {
    name: &'a str,
}

pub fn render_json(channel: &FeedChannel) -> Result<String> {
    let feed = JsonFeed {
        version: JSON_FEED_VERSION,
        title: &channel.title,
        home_page_url: &channel.home_page,
        feed_url: &channel.self_link,
        description: &channel.description,
        items: channel
            .items
            .iter()
            .map(|item| JsonFeedItem {
                id: &item.id,
                url: &item.link,
                title: &item.title,
                summary: &item.summary,
                content_text: &item.summary,
                date_published: rfc3339(&item.published),
                authors: if item.author.is_empty() {
                    Vec::new()
                } else {
                    vec![JsonFeedAuthor { name: &item.author }]
                },
            })
            .collect(),
    };
    serde_json::to_string_pretty(&feed).context("Failed to serialize JSON feed")
}
