use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One published file as recorded in `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    pub filename: String,
    /// Publish time as epoch seconds.
    pub published: f64,
}

/// The machine-readable index written next to the catalog.
///
/// The next run fetches it back from the live site and uses it as the cached
/// index, so the layout (recipe key -> records, plus `_generated`) must not
/// change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PublishedIndex {
    #[serde(rename = "_generated", default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<i64>,
    #[serde(flatten)]
    pub recipes: BTreeMap<String, Vec<IndexRecord>>,
}

impl PublishedIndex {
    /// Records for a recipe, looked up by slug first and display name second.
    pub fn records_for(&self, slug: &str, name: &str) -> &[IndexRecord] {
        match self.recipes.get(slug) {
            Some(records) if !records.is_empty() => records,
            _ => self.recipes.get(name).map(Vec::as_slice).unwrap_or_default(),
        }
    }
}

/// A single produced artifact for one recipe in one format.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeOutput {
    pub slug: String,
    pub recipe_name: String,
    pub category: String,
    pub title: String,
    /// File name as produced (converter output, download, or leftover).
    pub file: String,
    /// Canonical `slug-YYYY-MM-DD.ext` name it is published under.
    pub rename_to: String,
    pub published: DateTime<Utc>,
    pub description: String,
}

impl RecipeOutput {
    pub fn extension(&self) -> &str {
        self.rename_to
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or_default()
    }

    pub fn index_record(&self) -> IndexRecord {
        IndexRecord {
            filename: self.rename_to.clone(),
            published: self.published.timestamp_millis() as f64 / 1000.0,
        }
    }
}

/// All outputs of one recipe, in production order (primary format first).
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedRecipe {
    pub slug: String,
    pub name: String,
    pub outputs: Vec<RecipeOutput>,
}

impl GeneratedRecipe {
    pub fn latest_published(&self) -> Option<DateTime<Utc>> {
        self.outputs.iter().map(|output| output.published).max()
    }
}

/// Category -> recipes that produced output this run, in recipe-book order.
pub type Generated = BTreeMap<String, Vec<GeneratedRecipe>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_index_keeps_generated_beside_recipe_keys() -> anyhow::Result<()> {
        let json = r#"{
            "economist": [{"filename": "economist-2024-01-05.mobi", "published": 1704412800.0}],
            "_generated": 1704420000
        }"#;
        let index: PublishedIndex = serde_json::from_str(json)?;
        assert_eq!(index.generated, Some(1_704_420_000));
        assert_eq!(index.recipes.len(), 1);
        assert_eq!(
            index.recipes["economist"][0].filename,
            "economist-2024-01-05.mobi"
        );

        let value = serde_json::to_value(&index)?;
        assert_eq!(value["_generated"], 1_704_420_000);
        assert!(value["economist"].is_array());
        Ok(())
    }

    #[test]
    fn records_for_falls_back_to_display_name() {
        let mut index = PublishedIndex::default();
        index.recipes.insert(
            "The Economist".to_owned(),
            vec![IndexRecord {
                filename: "economist-2024-01-05.mobi".to_owned(),
                published: 1.0,
            }],
        );
        assert_eq!(index.records_for("economist", "The Economist").len(), 1);
        assert!(index.records_for("wired", "Wired").is_empty());
    }
}
