use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::schedule::Schedule;

pub const DEFAULT_RECIPE_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_TITLE_DATE_FORMAT: &str = "%-d %b, %Y";

/// Cover rendering options handed to the external cover renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverOptions {
    pub cover_width: u32,
    pub cover_height: u32,
    pub border_offset: u32,
    pub border_width: u32,
    pub text_colour: String,
    pub background_colour: String,
    pub title_font_path: String,
    pub title_font_size: u32,
    pub datestamp_font_path: String,
    pub datestamp_font_size: u32,
    /// png/jpg/gif, local path or URL.
    pub logo_path_or_url: String,
}

impl Default for CoverOptions {
    fn default() -> Self {
        Self {
            cover_width: 889,
            cover_height: 1186,
            border_offset: 25,
            border_width: 2,
            text_colour: "black".to_owned(),
            background_colour: "white".to_owned(),
            title_font_path: "static/OpenSans-Bold.ttf".to_owned(),
            title_font_size: 80,
            datestamp_font_path: "static/OpenSans-Bold.ttf".to_owned(),
            datestamp_font_size: 72,
            logo_path_or_url: String::new(),
        }
    }
}

/// One content source and how to turn it into e-books.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeSpec {
    /// Converter recipe identifier (`<recipe>.recipe`).
    pub recipe: String,
    /// File name slug, unique across the recipe book.
    pub slug: String,
    /// Primary output format produced by the converter.
    pub src_ext: String,
    pub category: String,
    /// Display name. Resolved from the recipe source when empty.
    #[serde(default)]
    pub name: String,
    /// Extra formats converted from the primary output.
    #[serde(default)]
    pub target_ext: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub overwrite_cover: bool,
    #[serde(default)]
    pub enable_on: Schedule,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_conv_options")]
    pub conv_options: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub cover_options: CoverOptions,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Overrides the global title date format for this recipe.
    #[serde(default)]
    pub title_date_format: Option<String>,
}

impl RecipeSpec {
    pub fn is_enabled(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        self.enable_on.is_enabled(last_run, now)
    }

    pub fn title_date_format<'a>(&'a self, default: &'a str) -> &'a str {
        self.title_date_format.as_deref().unwrap_or(default)
    }

    pub fn conv_options_for(&self, ext: &str) -> &[String] {
        self.conv_options
            .get(ext)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Source format first, then target formats.
    pub fn formats(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.src_ext.as_str()).chain(self.target_ext.iter().map(String::as_str))
    }
}

fn default_timeout() -> u64 {
    DEFAULT_RECIPE_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    1
}

pub fn default_conv_options() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        (
            "mobi".to_owned(),
            vec![
                "--output-profile=kindle_oasis".to_owned(),
                "--mobi-file-type=both".to_owned(),
            ],
        ),
        ("pdf".to_owned(), vec!["--pdf-page-numbers".to_owned()]),
        ("epub".to_owned(), vec!["--output-profile=tablet".to_owned()]),
    ])
}

/// The recipe book file: display order of categories plus the recipes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeBook {
    #[serde(default)]
    pub categories_sort: Vec<String>,
    pub recipes: Vec<RecipeSpec>,
}

impl RecipeBook {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("read recipe book: {}", path.display()))?;
        let book: Self = serde_yaml::from_str(&yaml)
            .with_context(|| format!("parse recipe book: {}", path.display()))?;
        book.validate()?;
        Ok(book)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for recipe in &self.recipes {
            if recipe.slug.trim().is_empty() {
                anyhow::bail!("recipe {:?} has an empty slug", recipe.recipe);
            }
            if !seen.insert(recipe.slug.as_str()) {
                anyhow::bail!("duplicate recipe slug: {}", recipe.slug);
            }
            if recipe.src_ext.trim().is_empty() {
                anyhow::bail!("recipe {} has an empty src_ext", recipe.slug);
            }
            let mut formats = std::collections::HashSet::from([recipe.src_ext.as_str()]);
            for ext in &recipe.target_ext {
                if !formats.insert(ext.as_str()) {
                    anyhow::bail!("recipe {} lists format {ext} more than once", recipe.slug);
                }
            }
        }
        Ok(())
    }

    /// Fill in display names that the recipe book left empty.
    pub fn resolve_names(&mut self, recipes_dir: &Path) {
        for recipe in &mut self.recipes {
            if recipe.name.trim().is_empty() {
                recipe.name = resolve_display_name(recipes_dir, &recipe.recipe);
            }
        }
    }
}

static RECIPE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\n_name\s=\s['"](?P<name>.+)['"]\n"#).expect("valid recipe name regex")
});
static RECIPE_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\btitle\s+=\s+u?['"](?P<name>.+)['"]\n"#).expect("valid recipe title regex")
});

/// Display name from the recipe definition (`_name = "..."`, else `title = "..."`).
///
/// Built-in converter recipes have no local definition; those fall back to
/// `<recipe>.recipe`.
pub fn resolve_display_name(recipes_dir: &Path, recipe: &str) -> String {
    let fallback = format!("{recipe}.recipe");
    let path = recipes_dir.join(&fallback);
    let source = match std::fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => {
            tracing::warn!(
                recipe,
                ?err,
                "recipe definition not readable; configure a display name"
            );
            return fallback;
        }
    };

    let found = RECIPE_NAME_RE
        .captures(&source)
        .or_else(|| RECIPE_TITLE_RE.captures(&source))
        .map(|caps| caps["name"].to_owned());
    match found {
        Some(name) => name,
        None => {
            tracing::warn!(recipe, "unable to extract recipe name");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOK: &str = r#"
categories_sort: [News, Magazines]
recipes:
  - recipe: economist
    slug: economist
    src_ext: mobi
    target_ext: [epub]
    category: Magazines
    timeout: 240
    overwrite_cover: false
    enable_on: { kind: weekdays, days: [4, 5], offset_hours: -4 }
  - recipe: example
    slug: example-01
    name: Example
    src_ext: epub
    category: Examples
    title_date_format: "%b %-d, %Y"
"#;

    #[test]
    fn recipe_book_applies_defaults() -> anyhow::Result<()> {
        let book: RecipeBook = serde_yaml::from_str(BOOK)?;
        book.validate()?;
        assert_eq!(book.categories_sort, vec!["News", "Magazines"]);

        let economist = &book.recipes[0];
        assert_eq!(economist.timeout, 240);
        assert!(!economist.overwrite_cover);
        assert_eq!(economist.retry_attempts, 1);
        assert_eq!(
            economist.conv_options_for("mobi"),
            ["--output-profile=kindle_oasis", "--mobi-file-type=both"]
        );
        assert_eq!(
            economist.formats().collect::<Vec<_>>(),
            vec!["mobi", "epub"]
        );

        let example = &book.recipes[1];
        assert_eq!(example.timeout, DEFAULT_RECIPE_TIMEOUT_SECS);
        assert!(example.overwrite_cover);
        assert_eq!(example.enable_on, Schedule::Always);
        assert_eq!(example.cover_options, CoverOptions::default());
        assert_eq!(
            example.title_date_format(DEFAULT_TITLE_DATE_FORMAT),
            "%b %-d, %Y"
        );
        assert_eq!(
            economist.title_date_format(DEFAULT_TITLE_DATE_FORMAT),
            DEFAULT_TITLE_DATE_FORMAT
        );
        Ok(())
    }

    #[test]
    fn duplicate_slugs_are_rejected() -> anyhow::Result<()> {
        let yaml = r#"
recipes:
  - { recipe: a, slug: same, src_ext: epub, category: News }
  - { recipe: b, slug: same, src_ext: mobi, category: News }
"#;
        let book: RecipeBook = serde_yaml::from_str(yaml)?;
        let err = book.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate recipe slug"));
        Ok(())
    }

    #[test]
    fn repeated_formats_are_rejected() -> anyhow::Result<()> {
        for targets in ["[pdf, pdf]", "[epub]"] {
            let yaml = format!(
                "recipes:\n  - {{ recipe: a, slug: a, src_ext: epub, target_ext: {targets}, category: News }}\n"
            );
            let book: RecipeBook = serde_yaml::from_str(&yaml)?;
            let err = book.validate().unwrap_err();
            assert!(err.to_string().contains("more than once"), "{targets}: {err}");
        }

        let ok = "recipes:\n  - { recipe: a, slug: a, src_ext: epub, target_ext: [pdf, mobi], category: News }\n";
        let book: RecipeBook = serde_yaml::from_str(ok)?;
        book.validate()?;
        Ok(())
    }

    #[test]
    fn display_name_comes_from_recipe_source() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        std::fs::write(
            temp.path().join("wired.recipe"),
            "from calibre import x\n_name = \"Wired\"\n\nclass Wired:\n    title = \"Ignored\"\n",
        )?;
        std::fs::write(
            temp.path().join("vox.recipe"),
            "class Vox:\n    title = u\"Vox\"\n",
        )?;

        assert_eq!(resolve_display_name(temp.path(), "wired"), "Wired");
        assert_eq!(resolve_display_name(temp.path(), "vox"), "Vox");
        assert_eq!(
            resolve_display_name(temp.path(), "Macrobusiness"),
            "Macrobusiness.recipe"
        );
        Ok(())
    }
}
