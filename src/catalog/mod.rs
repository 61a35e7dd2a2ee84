//! The published catalog: HTML listing, OPDS feeds and the JSON index.

pub mod html;
pub mod opds;

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context as _;
use chrono::{DateTime, Utc};

use crate::cache::INDEX_FILENAME;
use crate::formats::{Generated, PublishedIndex};
use crate::job_log::write_json_atomic;
use crate::naming::slugify;
use crate::recipe::RecipeBook;

/// Listed categories by position, unlisted ones after them; ties by name.
pub fn compare_categories(order: &[String], a: &str, b: &str) -> Ordering {
    let rank = |category: &str| {
        order
            .iter()
            .position(|listed| listed == category)
            .unwrap_or(usize::MAX)
    };
    rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListedFile {
    pub name: String,
    pub ext: String,
    /// `None` when the file could not be stat'ed.
    pub size: Option<u64>,
}

/// A recipe that produced output this run.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    pub slug: String,
    pub name: String,
    pub title: String,
    pub tags: Vec<String>,
    pub published: DateTime<Utc>,
    pub description: String,
    pub files: Vec<ListedFile>,
}

impl ListingEntry {
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.name
        } else {
            &self.title
        }
    }
}

/// A configured recipe without output this run.
#[derive(Debug, Clone, PartialEq)]
pub struct UnavailableEntry {
    pub slug: String,
    pub name: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryListing {
    pub category: String,
    pub slug: String,
    /// Newest first.
    pub entries: Vec<ListingEntry>,
    pub unavailable: Vec<UnavailableEntry>,
}

/// Groups this run's outputs by category for display.
///
/// File sizes are read from `publish_dir`, so outputs must already carry
/// their canonical names on disk.
pub fn build_listing(generated: &Generated, book: &RecipeBook, publish_dir: &Path) -> Vec<CategoryListing> {
    let mut categories: Vec<&str> = generated
        .keys()
        .map(String::as_str)
        .chain(book.recipes.iter().map(|r| r.category.as_str()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    categories.sort_by(|a, b| compare_categories(&book.categories_sort, a, b));

    categories
        .into_iter()
        .map(|category| {
            let mut entries: Vec<ListingEntry> = generated
                .get(category)
                .into_iter()
                .flatten()
                .filter_map(|recipe| {
                    let first = recipe.outputs.first()?;
                    let tags = book
                        .recipes
                        .iter()
                        .find(|r| r.slug == recipe.slug)
                        .map(|r| r.tags.clone())
                        .unwrap_or_default();
                    let files = recipe
                        .outputs
                        .iter()
                        .map(|output| ListedFile {
                            name: output.rename_to.clone(),
                            ext: output.extension().to_owned(),
                            size: file_size(&publish_dir.join(&output.rename_to)),
                        })
                        .collect();
                    Some(ListingEntry {
                        slug: recipe.slug.clone(),
                        name: recipe.name.clone(),
                        title: first.title.clone(),
                        tags,
                        published: recipe.latest_published().unwrap_or(first.published),
                        description: first.description.clone(),
                        files,
                    })
                })
                .collect();
            entries.sort_by(|a, b| b.published.cmp(&a.published));

            let unavailable = book
                .recipes
                .iter()
                .filter(|r| r.category == category)
                .filter(|r| !entries.iter().any(|e| e.slug == r.slug))
                .map(|r| UnavailableEntry {
                    slug: r.slug.clone(),
                    name: r.name.clone(),
                    tags: r.tags.clone(),
                })
                .collect();

            CategoryListing {
                category: category.to_owned(),
                slug: slugify(category),
                entries,
                unavailable,
            }
        })
        .collect()
}

fn file_size(path: &Path) -> Option<u64> {
    match std::fs::metadata(path) {
        Ok(meta) => Some(meta.len()),
        Err(err) => {
            tracing::warn!(path = %path.display(), ?err, "unable to stat output");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub file_name: String,
    pub xml: String,
}

/// Everything the catalog publishes besides the page itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub listing_html: String,
    pub feeds: Vec<Feed>,
    pub index: PublishedIndex,
}

impl Catalog {
    pub fn build(
        listing: &[CategoryListing],
        mut index: PublishedIndex,
        publish_site: &str,
        now: DateTime<Utc>,
    ) -> Self {
        index.generated = Some(now.timestamp());
        Self {
            listing_html: html::render_listing(listing),
            feeds: opds::render_feeds(listing, publish_site, now),
            index,
        }
    }

    pub fn write(&self, publish_dir: &Path) -> anyhow::Result<()> {
        write_json_atomic(&publish_dir.join(INDEX_FILENAME), &self.index)
            .context("write published index")?;
        for feed in &self.feeds {
            let path = publish_dir.join(&feed.file_name);
            std::fs::write(&path, &feed.xml)
                .with_context(|| format!("write feed: {}", path.display()))?;
        }
        tracing::info!(
            dir = %publish_dir.display(),
            feeds = self.feeds.len(),
            recipes = self.index.recipes.len(),
            "wrote catalog"
        );
        Ok(())
    }
}
