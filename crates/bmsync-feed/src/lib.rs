//! Bookmark feed reading: RSS 2.0, RSS 1.0 (RDF) and Atom parsing into
//! `BookmarkRecord`s.

mod xml;

use bmsync_core::BookmarkRecord;
use bmsync_storage::{FeedFetcher, FetchError};
use thiserror::Error;
use tracing::{debug, info};

use crate::xml::{parse_document, Element};

pub const CRATE_NAME: &str = "bmsync-feed";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("fetching feed {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("parsing feed: {0}")]
    Parse(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("feed is not valid utf-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("malformed xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed xml markup: {0}")]
    Markup(String),
    #[error("malformed feed document: {0}")]
    Document(String),
    #[error("unsupported feed root element <{0}>")]
    UnsupportedRoot(String),
    #[error("feed document has no root element")]
    Empty,
    #[error("entry {index}: {reason}")]
    Entry { index: usize, reason: String },
}

/// Format-neutral view of one feed entry before validation.
#[derive(Debug)]
struct FeedEntry {
    uri: Option<String>,
    title: Option<String>,
    link: Option<String>,
    categories: Vec<String>,
    description: Option<String>,
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    element.child(name).map(Element::text)
}

fn child_content(element: &Element, name: &str) -> Option<String> {
    element.child(name).map(Element::content)
}

/// Identifiers are trimmed; everything else is carried as written.
fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

impl FeedEntry {
    fn from_rss_item(item: &Element) -> Self {
        Self {
            uri: trimmed(child_text(item, "guid")),
            title: child_text(item, "title"),
            link: trimmed(child_text(item, "link")),
            categories: item.children_named("category").map(Element::text).collect(),
            description: child_content(item, "description"),
        }
    }

    fn from_rdf_item(item: &Element) -> Self {
        let link = trimmed(child_text(item, "link"));
        let uri = item
            .attr("about")
            .map(|about| about.trim().to_string())
            .or_else(|| link.clone());
        Self {
            uri,
            title: child_text(item, "title"),
            link,
            categories: item.children_named("dc:subject").map(Element::text).collect(),
            description: child_content(item, "description")
                .or_else(|| child_content(item, "dc:description")),
        }
    }

    fn from_atom_entry(entry: &Element) -> Self {
        let link = entry
            .children_named("link")
            .find(|l| matches!(l.attr("rel"), None | Some("alternate")))
            .and_then(|l| l.attr("href"))
            .map(|href| href.trim().to_string());
        Self {
            uri: trimmed(child_text(entry, "id")),
            title: entry.child("title").map(atom_text),
            link,
            categories: entry
                .children_named("category")
                .filter_map(|c| c.attr("term"))
                .map(str::to_string)
                .collect(),
            description: entry
                .child("summary")
                .or_else(|| entry.child("content"))
                .map(atom_text),
        }
    }
}

/// Atom text constructs. For `type="xhtml"` the wrapping `<div>` is dropped
/// and its inner markup kept.
fn atom_text(element: &Element) -> String {
    if element.attr("type") != Some("xhtml") {
        return element.content();
    }
    let mut children = element.elements();
    match (children.next(), children.next()) {
        (Some(div), None) if div.local_name() == "div" => div.inner_markup(),
        _ => element.inner_markup(),
    }
}

/// Extracts the bookmark id from an entry URI: the text strictly between the
/// last `/` and the last `#`.
pub fn bookmark_id_from_uri(uri: &str) -> Result<&str, &'static str> {
    let slash = uri.rfind('/').ok_or("uri has no '/'")?;
    let hash = uri.rfind('#').ok_or("uri has no '#'")?;
    if hash < slash {
        return Err("uri fragment '#' precedes the last '/'");
    }
    let id = &uri[slash + 1..hash];
    if id.is_empty() {
        return Err("uri has an empty segment between '/' and '#'");
    }
    Ok(id)
}

fn entry_to_bookmark(index: usize, entry: FeedEntry) -> Result<BookmarkRecord, ParseError> {
    let invalid = |reason: String| ParseError::Entry { index, reason };

    let uri = entry
        .uri
        .ok_or_else(|| invalid("missing entry uri (guid/id)".to_string()))?;
    let id = bookmark_id_from_uri(&uri).map_err(|reason| invalid(format!("{reason}: {uri}")))?;
    let link = entry
        .link
        .ok_or_else(|| invalid(format!("missing link for {uri}")))?;

    Ok(BookmarkRecord::new(
        id,
        entry.title.unwrap_or_default(),
        link,
        entry.categories,
        entry.description,
    ))
}

/// Parses a whole feed document. Any invalid entry fails the entire parse.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<BookmarkRecord>, ParseError> {
    let xml = std::str::from_utf8(bytes)?.trim_start_matches('\u{feff}');
    let root = parse_document(xml)?;

    let entries: Vec<FeedEntry> = match root.local_name() {
        "rss" => {
            let channel = root
                .child("channel")
                .ok_or_else(|| ParseError::Document("<rss> has no <channel>".to_string()))?;
            channel.children_named("item").map(FeedEntry::from_rss_item).collect()
        }
        "RDF" => root.children_named("item").map(FeedEntry::from_rdf_item).collect(),
        "feed" => root.children_named("entry").map(FeedEntry::from_atom_entry).collect(),
        other => return Err(ParseError::UnsupportedRoot(other.to_string())),
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| entry_to_bookmark(index, entry))
        .collect()
}

pub struct FeedReader<'a> {
    fetcher: &'a dyn FeedFetcher,
}

impl<'a> FeedReader<'a> {
    pub fn new(fetcher: &'a dyn FeedFetcher) -> Self {
        Self { fetcher }
    }

    pub async fn read(&self, feed_url: &str) -> Result<Vec<BookmarkRecord>, FeedError> {
        let response = self
            .fetcher
            .fetch(feed_url)
            .await
            .map_err(|source| FeedError::Fetch {
                url: feed_url.to_string(),
                source,
            })?;

        let bookmarks = parse_feed(&response.body)?;
        for bookmark in &bookmarks {
            debug!(id = bookmark.id(), link = bookmark.link(), "parsed bookmark");
        }
        info!(
            feed_url,
            entries = bookmarks.len(),
            from_cache = response.from_cache,
            "read feed"
        );
        Ok(bookmarks)
    }
}
