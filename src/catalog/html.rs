use std::fmt::Write as _;

use super::{CategoryListing, ListingEntry, UnavailableEntry};
use crate::markup::{natural_size, title_case, xml_escape};

pub const DEFAULT_TEMPLATE: &str = include_str!("../../static/index.html");

fn hashtags(tags: &[String]) -> String {
    if tags.is_empty() {
        String::new()
    } else {
        format!("#{}", xml_escape(&tags.join(" #")))
    }
}

pub fn render_listing(listing: &[CategoryListing]) -> String {
    let mut out = String::new();
    for category in listing {
        let name = xml_escape(&category.category);
        let slug = xml_escape(&category.slug);
        let _ = write!(
            out,
            "<div class=\"category-container is-open\"><h2 id=\"cat-{slug}\" class=\"category is-open\">{name}\n\
             <a class=\"opds\" title=\"OPDS for {title}\" href=\"{slug}.xml\">OPDS</a></h2>\n\
             <ol class=\"books\">",
            title = xml_escape(&title_case(&category.category)),
        );
        for entry in &category.entries {
            render_entry(&mut out, category, entry);
        }
        for entry in &category.unavailable {
            render_unavailable(&mut out, category, entry);
        }
        let _ = writeln!(
            out,
            "</ol>\n<div class=\"close-cat-container\"><div class=\"close-cat-shortcut\" data-click-target=\"cat-{slug}\"></div></div>\n</div>"
        );
    }
    out
}

fn render_entry(out: &mut String, category: &CategoryListing, entry: &ListingEntry) {
    let tags = hashtags(&entry.tags);
    let _ = write!(
        out,
        "\n<li id=\"{id}\" data-cat-id=\"cat-{cat_slug}\" data-cat-name=\"{cat_name}\" data-tags=\"{tags}\">\n\
         <span class=\"title\">{title}</span>\n",
        id = xml_escape(&entry.slug),
        cat_slug = xml_escape(&category.slug),
        cat_name = xml_escape(&category.category),
        title = xml_escape(entry.display_title()),
    );
    let links: Vec<String> = entry
        .files
        .iter()
        .map(|file| {
            let size = file.size.map(natural_size).unwrap_or_default();
            format!(
                "<div class=\"book\"><a href=\"{href}\">.{ext}<span class=\"file-size\">{size}</span></a></div>",
                href = xml_escape(&file.name),
                ext = xml_escape(&file.ext),
            )
        })
        .collect();
    out.push_str(&links.join(" "));
    let _ = write!(
        out,
        "\n<div class=\"pub-date\" data-pub-date=\"{millis}\">\nPublished at {date}\n",
        millis = entry.published.timestamp_millis(),
        date = entry.published.format("%Y-%m-%d %-I:%M%p %z"),
    );
    if !tags.is_empty() {
        let _ = writeln!(out, "<span class=\"tags\">{tags}</span>");
    }
    let _ = write!(
        out,
        "</div>\n<div class=\"contents hide\">{}</div>\n</li>",
        entry.description
    );
}

fn render_unavailable(out: &mut String, category: &CategoryListing, entry: &UnavailableEntry) {
    let tags = hashtags(&entry.tags);
    let _ = write!(
        out,
        "\n<li id=\"{id}\" data-cat-id=\"cat-{cat_slug}\" data-cat-name=\"{cat_name}\" class=\"not-available\" data-tags=\"{tags}\">\n\
         <span class=\"title\">{name}</span>\n\
         <div class=\"pub-date\">Not available\n<span class=\"tags\">{tags}</span>\n</div></li>",
        id = xml_escape(&entry.slug),
        cat_slug = xml_escape(&category.slug),
        cat_name = xml_escape(&category.category),
        name = xml_escape(&entry.name),
    );
}

/// Values substituted into the page template.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub listing: String,
    pub css: String,
    pub js: String,
    pub refreshed_ts: i64,
    pub refreshed_dt: String,
    pub publish_site: String,
    pub elapsed: String,
    pub catalog: String,
    pub source_link: String,
}

impl PageContext {
    fn value(&self, key: &str) -> Option<String> {
        let value = match key {
            "listing" => self.listing.clone(),
            "css" => self.css.clone(),
            "js" => self.js.clone(),
            "refreshed_ts" => self.refreshed_ts.to_string(),
            "refreshed_dt" => self.refreshed_dt.clone(),
            "publish_site" => self.publish_site.clone(),
            "elapsed" => self.elapsed.clone(),
            "catalog" => self.catalog.clone(),
            "source_link" => self.source_link.clone(),
            _ => return None,
        };
        Some(value)
    }
}

/// Link to the source revision the site was built from.
pub fn source_link(source_url: &str, commit_hash: &str) -> String {
    let short: String = commit_hash.chars().take(7).collect();
    format!(
        "<a class=\"git\" href=\"{}\">{}.</a>",
        xml_escape(source_url),
        xml_escape(&short)
    )
}

/// Fills `{name}` placeholders; `{{` and `}}` stand for literal braces.
pub fn render_page(template: &str, context: &PageContext) -> anyhow::Result<String> {
    let mut out = String::with_capacity(template.len() + context.listing.len());
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
        } else {
            let end = tail
                .find('}')
                .ok_or_else(|| anyhow::anyhow!("unclosed template placeholder"))?;
            let key = &tail[1..end];
            let value = context
                .value(key)
                .ok_or_else(|| anyhow::anyhow!("unknown template placeholder: {{{key}}}"))?;
            out.push_str(&value);
            rest = &tail[end + 1..];
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};

    use super::*;
    use crate::catalog::ListedFile;

    fn listing() -> Vec<CategoryListing> {
        vec![CategoryListing {
            category: "Arts & Culture".to_owned(),
            slug: "arts-culture".to_owned(),
            entries: vec![ListingEntry {
                slug: "poetry".to_owned(),
                name: "Poetry".to_owned(),
                title: String::new(),
                tags: vec!["poems".to_owned(), "monthly".to_owned()],
                published: Utc.with_ymd_and_hms(2024, 5, 1, 14, 5, 0).unwrap(),
                description: "<ul><li>x</li></ul>".to_owned(),
                files: vec![ListedFile {
                    name: "poetry-2024-05-01.epub".to_owned(),
                    ext: "epub".to_owned(),
                    size: Some(1_234_567),
                }],
            }],
            unavailable: vec![UnavailableEntry {
                slug: "lrb".to_owned(),
                name: "London Review".to_owned(),
                tags: Vec::new(),
            }],
        }]
    }

    #[test]
    fn listing_renders_entries_and_unavailable() {
        let html = render_listing(&listing());
        assert!(html.contains("<h2 id=\"cat-arts-culture\" class=\"category is-open\">Arts &amp; Culture"));
        assert!(html.contains("href=\"arts-culture.xml\">OPDS</a>"));
        assert!(html.contains("<span class=\"title\">Poetry</span>"));
        assert!(html.contains(
            "<a href=\"poetry-2024-05-01.epub\">.epub<span class=\"file-size\">1.2MB</span></a>"
        ));
        assert!(html.contains("data-tags=\"#poems #monthly\""));
        assert!(html.contains("Published at 2024-05-01 2:05PM +0000"));
        assert!(html.contains("<div class=\"contents hide\"><ul><li>x</li></ul></div>"));
        assert!(html.contains("class=\"not-available\""));
        assert!(html.contains("<span class=\"title\">London Review</span>"));
        assert!(html.contains("Not available"));
    }

    #[test]
    fn render_page_fills_placeholders_and_keeps_braces() -> anyhow::Result<()> {
        let context = PageContext {
            listing: "<ol></ol>".to_owned(),
            elapsed: "5 seconds".to_owned(),
            ..PageContext::default()
        };
        let page = render_page("<style>a {{ color: red; }}</style>{listing} took {elapsed}", &context)?;
        assert_eq!(page, "<style>a { color: red; }</style><ol></ol> took 5 seconds");

        assert!(render_page("{nope}", &context).is_err());
        assert!(render_page("{listing", &context).is_err());
        Ok(())
    }

    #[test]
    fn default_template_uses_only_known_placeholders() -> anyhow::Result<()> {
        let page = render_page(DEFAULT_TEMPLATE, &PageContext::default())?;
        assert!(page.contains("<html"));
        Ok(())
    }

    #[test]
    fn source_link_shortens_commit() {
        assert_eq!(
            source_link("https://github.com/o/r", "0123456789abcdef"),
            "<a class=\"git\" href=\"https://github.com/o/r\">0123456.</a>"
        );
    }
}
