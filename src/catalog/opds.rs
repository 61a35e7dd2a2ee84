//! Minimal OPDS acquisition feeds (Atom).

use chrono::{DateTime, Utc};

use super::{CategoryListing, Feed, ListingEntry};
use crate::markup::{title_case, xml_escape};

pub const CATALOG_FILENAME: &str = "catalog.xml";
const FEED_ID: &str = "presspack";
const FEED_TITLE: &str = "Press Pack";

pub fn mime_type(ext: &str) -> &'static str {
    match ext {
        "epub" => "application/epub+zip",
        "mobi" | "azw" => "application/x-mobipocket-ebook",
        "azw3" => "application/x-mobi8-ebook",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// One feed per category plus the aggregate `catalog.xml`, in that order.
pub fn render_feeds(listing: &[CategoryListing], publish_site: &str, now: DateTime<Utc>) -> Vec<Feed> {
    let mut all_entries = String::new();
    let mut feeds = Vec::with_capacity(listing.len() + 1);
    for category in listing {
        let mut entries = String::new();
        for entry in &category.entries {
            render_entry(&mut entries, &category.category, entry);
        }
        all_entries.push_str(&entries);
        let title = format!("{FEED_TITLE} - {}", title_case(&category.category));
        feeds.push(Feed {
            file_name: format!("{}.xml", category.slug),
            xml: render_feed(&title, publish_site, now, &entries),
        });
    }
    feeds.push(Feed {
        file_name: CATALOG_FILENAME.to_owned(),
        xml: render_feed(FEED_TITLE, publish_site, now, &all_entries),
    });
    feeds
}

fn render_feed(title: &str, publish_site: &str, now: DateTime<Utc>, entries: &str) -> String {
    let site = xml_escape(publish_site);
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<feed xmlns=\"http://www.w3.org/2005/Atom\" xmlns:dc=\"http://purl.org/dc/terms/\" xmlns:opds=\"http://opds-spec.org/2010/catalog\">\n",
    );
    out.push_str(&format!("<id>{FEED_ID}</id>\n"));
    out.push_str(&format!("<title>{}</title>\n", xml_escape(title)));
    out.push_str(&format!("<updated>{}</updated>\n", now.format("%Y-%m-%dT%H:%M:%SZ")));
    out.push_str(&format!("<author>\n<name>{site}</name>\n<uri>{site}</uri>\n</author>\n"));
    out.push_str(entries);
    out.push_str("</feed>\n");
    out
}

fn render_entry(out: &mut String, category: &str, entry: &ListingEntry) {
    let title = entry.display_title();
    let label = xml_escape(&title_case(category));
    let content = if entry.description.is_empty() {
        &entry.name
    } else {
        &entry.description
    };

    out.push_str("<entry>\n");
    out.push_str(&format!("<id>{}</id>\n", xml_escape(&entry.slug)));
    out.push_str(&format!("<title>{}</title>\n", xml_escape(title)));
    out.push_str(&format!(
        "<summary>{}</summary>\n",
        xml_escape(&format!(
            "{title} published at {}.",
            entry.published.format("%Y-%m-%d %H:%M%p")
        ))
    ));
    out.push_str(&format!(
        "<content type=\"text/html\">{}</content>\n",
        xml_escape(content)
    ));
    out.push_str(&format!(
        "<updated>{}</updated>\n",
        entry.published.format("%Y-%m-%dT%H:%M:%SZ")
    ));
    out.push_str(&format!("<category label=\"{label}\"/>\n"));
    out.push_str(&format!("<author>\n<name>{label}</name>\n</author>\n"));
    for file in &entry.files {
        out.push_str(&format!(
            "<link rel=\"http://opds-spec.org/acquisition\" type=\"{}\" href=\"{}\"/>\n",
            mime_type(&file.ext),
            xml_escape(&file.name)
        ));
    }
    out.push_str("</entry>\n");
}
