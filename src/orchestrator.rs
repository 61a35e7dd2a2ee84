//! Per-recipe build state machine.
//!
//! Recipes run one at a time in recipe-book order. Every failure ends in a
//! terminal [`RecipeStatus`] for that recipe; nothing here stops the batch.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Datelike as _, Utc};

use crate::cache::{CachePolicy, CacheSource, download_recipe};
use crate::clock::{Clock, precise_delta};
use crate::cover::CoverRenderer;
use crate::error::{RecipeError, RunError};
use crate::formats::{Generated, GeneratedRecipe, IndexRecord, PublishedIndex, RecipeOutput};
use crate::job_log::JobLog;
use crate::metadata::{self, ArtifactMetadata, MetadataReader, MetadataUpdate};
use crate::naming::{OutputTable, canonical_name, fresh_name};
use crate::recipe::{RecipeBook, RecipeSpec};
use crate::runner::{Converter, ProcessExit, SeriesInfo};

const MAX_RECIPE_TIMEOUT_SECS: u64 = 20 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeStatus {
    Completed,
    FromLocal,
    FromCache,
    Skipped,
    NoOutput,
    ConvertTimeout,
    ConvertFailed,
    CacheTimeout,
}

impl RecipeStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Completed => ":white_check_mark: Completed",
            Self::FromLocal => ":file_folder: From local",
            Self::FromCache => ":outbox_tray: From cache",
            Self::Skipped => ":arrow_right_hook: Skipped",
            Self::NoOutput => ":x: No output",
            Self::ConvertTimeout => ":x: Convert Timeout",
            Self::ConvertFailed => ":x: Convert Failed",
            Self::CacheTimeout => ":x: Cache Timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub slug: String,
    pub name: String,
    pub status: RecipeStatus,
    pub elapsed: Duration,
}

/// Per-recipe outcome table, rendered as Markdown for the job summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub rows: Vec<SummaryRow>,
}

impl RunSummary {
    pub fn status_of(&self, slug: &str) -> Option<RecipeStatus> {
        self.rows.iter().find(|row| row.slug == slug).map(|row| row.status)
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::from("| Recipe | Status | Duration |\n| ------ | ------ | -------- |\n");
        for row in &self.rows {
            let duration = if row.status == RecipeStatus::Skipped {
                "0".to_owned()
            } else {
                precise_delta(row.elapsed)
            };
            let _ = writeln!(out, "| {} | {} | {duration} |", row.name, row.status.label());
        }
        out
    }
}

/// External collaborators of a run.
pub struct Tools<'a> {
    pub converter: &'a dyn Converter,
    pub metadata: &'a dyn MetadataReader,
    pub cache: &'a dyn CacheSource,
    pub cover: Option<&'a dyn CoverRenderer>,
    pub clock: &'a dyn Clock,
}

#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub skip: BTreeSet<String>,
    pub regenerate: BTreeSet<String>,
    /// Publisher written into artifacts; also the cache site.
    pub publish_site: String,
    pub cache_policy: CachePolicy,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub generated: Generated,
    pub job_log: JobLog,
    pub summary: RunSummary,
    pub index: PublishedIndex,
}

pub struct JobOrchestrator<'a> {
    tools: Tools<'a>,
    config: RunConfig,
}

/// Series index stamped into artifacts: `year * 1000 + day of year`.
pub fn series_index(published: DateTime<Utc>) -> u32 {
    published.year().unsigned_abs() * 1000 + published.ordinal()
}

/// Wait before retrying a timed-out recipe, and the grown timeout.
pub fn retry_backoff(timeout: Duration) -> (Duration, Duration) {
    let secs = timeout.as_secs();
    let wait = secs.div_ceil(100).clamp(2, 10);
    let grown = (secs * 11 / 10).min(MAX_RECIPE_TIMEOUT_SECS).max(secs);
    (Duration::from_secs(wait), Duration::from_secs(grown))
}

struct RunState {
    generated: Generated,
    job_log: JobLog,
    index: PublishedIndex,
}

impl<'a> JobOrchestrator<'a> {
    pub fn new(tools: Tools<'a>, config: RunConfig) -> Self {
        Self { tools, config }
    }

    pub fn run(
        &self,
        book: &RecipeBook,
        cached: &PublishedIndex,
        job_log: JobLog,
        outputs: &mut OutputTable,
    ) -> RunOutcome {
        let mut state = RunState {
            generated: Generated::new(),
            job_log,
            index: PublishedIndex::default(),
        };
        let mut summary = RunSummary::default();

        for recipe in &book.recipes {
            let span = tracing::info_span!("recipe", slug = %recipe.slug);
            let _enter = span.enter();

            if self.config.skip.contains(&recipe.slug) {
                tracing::info!("skipped");
                summary.rows.push(SummaryRow {
                    slug: recipe.slug.clone(),
                    name: recipe.name.clone(),
                    status: RecipeStatus::Skipped,
                    elapsed: Duration::ZERO,
                });
                continue;
            }

            let started = self.tools.clock.now();
            let cached_records = cached.records_for(&recipe.slug, &recipe.name);
            let status = self.process(recipe, cached_records, &mut state, outputs);
            let elapsed = (self.tools.clock.now() - started)
                .to_std()
                .unwrap_or_default();

            tracing::info!(
                status = status.label(),
                elapsed = %precise_delta(elapsed),
                "recipe finished"
            );
            summary.rows.push(SummaryRow {
                slug: recipe.slug.clone(),
                name: recipe.name.clone(),
                status,
                elapsed,
            });
        }

        RunOutcome {
            generated: state.generated,
            job_log: state.job_log,
            summary,
            index: state.index,
        }
    }

    fn should_generate(&self, recipe: &RecipeSpec, cached_records: &[IndexRecord], job_log: &JobLog) -> bool {
        let enabled = recipe.is_enabled(job_log.last_run(&recipe.slug), self.tools.clock.now());
        (enabled && self.config.regenerate.is_empty())
            || self.config.regenerate.contains(&recipe.slug)
            || cached_records.is_empty()
    }

    fn process(
        &self,
        recipe: &RecipeSpec,
        cached_records: &[IndexRecord],
        state: &mut RunState,
        outputs: &mut OutputTable,
    ) -> RecipeStatus {
        state.index.recipes.insert(recipe.slug.clone(), Vec::new());

        let mut status = RecipeStatus::Completed;
        let mut fresh = false;
        let mut failed_exit = None;

        if outputs.exists(&recipe.slug, &recipe.src_ext) {
            tracing::info!("using existing local output");
            status = RecipeStatus::FromLocal;
        } else if self.should_generate(recipe, cached_records, &state.job_log) {
            match self.generate(recipe) {
                Ok(ProcessExit::Success) => {
                    fresh = true;
                    state.job_log.record(&recipe.slug, self.tools.clock.now());
                    outputs.refresh(&fresh_name(&recipe.slug, &recipe.src_ext));
                }
                Ok(ProcessExit::Failure(code)) => {
                    let err = RecipeError::ConversionFailed { code };
                    tracing::error!(error = %err, "recipe failed");
                    failed_exit = Some(code);
                    outputs.discard(&fresh_name(&recipe.slug, &recipe.src_ext));
                }
                Err(err) => {
                    tracing::error!(error = %err, "recipe timed out");
                    outputs.discard(&fresh_name(&recipe.slug, &recipe.src_ext));
                    return RecipeStatus::ConvertTimeout;
                }
            }
        } else {
            tracing::warn!("using cached copy");
            match self.download(recipe, cached_records, outputs) {
                Ok(_) => status = RecipeStatus::FromCache,
                Err(err) => {
                    tracing::error!(error = %err, "cache download failed");
                    // Keep the last published copy listed in the index.
                    state
                        .index
                        .recipes
                        .insert(recipe.slug.clone(), cached_records.to_vec());
                    return RecipeStatus::CacheTimeout;
                }
            }
        }

        if !outputs.exists(&recipe.slug, &recipe.src_ext) && !cached_records.is_empty() {
            tracing::warn!("recipe has no output; trying cached copy");
            if let Err(err) = self.download(recipe, cached_records, outputs) {
                tracing::warn!(error = %err, "cache fallback failed");
            }
            if outputs.exists(&recipe.slug, &recipe.src_ext) {
                status = RecipeStatus::FromCache;
                failed_exit = None;
            }
        }

        let Some(source_name) = outputs.winner(&recipe.slug, &recipe.src_ext).map(str::to_owned) else {
            let (err, status) = match failed_exit {
                Some(code) => (RecipeError::ConversionFailed { code }, RecipeStatus::ConvertFailed),
                None => (
                    RecipeError::NoOutputProduced {
                        slug: recipe.slug.clone(),
                        ext: recipe.src_ext.clone(),
                    },
                    RecipeStatus::NoOutput,
                ),
            };
            tracing::error!(error = %err, "no output");
            return status;
        };

        let source_path = outputs.path_of(&source_name);
        let meta = metadata::extract(self.tools.metadata, &source_path, self.tools.clock.now());
        let series = SeriesInfo {
            series: recipe.name.clone(),
            index: series_index(meta.published),
            publisher: self.config.publish_site.clone(),
        };
        if fresh {
            self.stamp_artifact(recipe, &source_path, &meta, &series);
        }

        let mut produced = vec![self.output(recipe, &meta, source_name, &recipe.src_ext)];
        for ext in &recipe.target_ext {
            if let Some(file) = self.convert_target(recipe, &source_path, ext, &series, outputs) {
                produced.push(self.output(recipe, &meta, file, ext));
            }
        }

        state
            .index
            .recipes
            .insert(recipe.slug.clone(), produced.iter().map(RecipeOutput::index_record).collect());
        state
            .generated
            .entry(recipe.category.clone())
            .or_default()
            .push(GeneratedRecipe {
                slug: recipe.slug.clone(),
                name: recipe.name.clone(),
                outputs: produced,
            });
        status
    }

    /// Runs the converter, retrying expired attempts with a growing timeout.
    fn generate(&self, recipe: &RecipeSpec) -> Result<ProcessExit, RecipeError> {
        let mut timeout = Duration::from_secs(recipe.timeout);
        let mut attempt = 0;
        loop {
            tracing::info!(attempt, timeout_secs = timeout.as_secs(), "running recipe");
            match self.tools.converter.run_recipe(recipe, timeout) {
                Ok(exit) => return Ok(exit),
                Err(RunError::Expired { .. }) if attempt < recipe.retry_attempts => {
                    let (wait, grown) = retry_backoff(timeout);
                    tracing::warn!(
                        attempt,
                        wait_secs = wait.as_secs(),
                        next_timeout_secs = grown.as_secs(),
                        "recipe timed out; retrying"
                    );
                    self.tools.clock.sleep(wait);
                    timeout = grown;
                    attempt += 1;
                }
                Err(RunError::Expired { .. }) => {
                    return Err(RecipeError::ConversionTimeout {
                        attempts: attempt + 1,
                    });
                }
                Err(err) => {
                    tracing::error!(error = %err, "unable to run converter");
                    return Ok(ProcessExit::Failure(None));
                }
            }
        }
    }

    fn download(
        &self,
        recipe: &RecipeSpec,
        cached_records: &[IndexRecord],
        outputs: &mut OutputTable,
    ) -> Result<Vec<String>, RecipeError> {
        download_recipe(
            self.tools.cache,
            self.tools.clock,
            &self.config.cache_policy,
            recipe,
            cached_records,
            outputs,
        )
    }

    /// Writes cover, series and publisher into a freshly generated artifact.
    fn stamp_artifact(&self, recipe: &RecipeSpec, path: &Path, meta: &ArtifactMetadata, series: &SeriesInfo) {
        let mut update = MetadataUpdate {
            cover: None,
            series: series.series.clone(),
            series_index: series.index,
            publisher: series.publisher.clone(),
        };

        let cover_dir = match self.tools.cover {
            Some(renderer) if recipe.overwrite_cover && !meta.title.is_empty() => {
                match render_cover(renderer, &recipe.slug, &meta.title, recipe) {
                    Ok((dir, cover)) => {
                        update.cover = Some(cover);
                        Some(dir)
                    }
                    Err(err) => {
                        let err = RecipeError::CoverGeneration(err);
                        tracing::warn!(error = %err, "keeping converter cover");
                        None
                    }
                }
            }
            _ => None,
        };

        if let Err(err) = self.tools.metadata.write(path, &update) {
            tracing::warn!(path = %path.display(), ?err, "unable to write metadata");
        }
        drop(cover_dir);
    }

    /// Produces one target format; failures are logged and the format omitted.
    fn convert_target(
        &self,
        recipe: &RecipeSpec,
        source: &Path,
        ext: &str,
        series: &SeriesInfo,
        outputs: &mut OutputTable,
    ) -> Option<String> {
        if !outputs.exists(&recipe.slug, ext) {
            let target_name = fresh_name(&recipe.slug, ext);
            let target = outputs.path_of(&target_name);
            let timeout = Duration::from_secs(recipe.timeout);
            match self.tools.converter.convert(recipe, source, &target, series, timeout) {
                Ok(ProcessExit::Success) => {
                    outputs.refresh(&target_name);
                }
                Ok(ProcessExit::Failure(code)) => {
                    tracing::warn!(ext, ?code, "format conversion failed");
                    outputs.discard(&target_name);
                    return None;
                }
                Err(err) => {
                    tracing::warn!(ext, error = %err, "format conversion failed");
                    outputs.discard(&target_name);
                    return None;
                }
            }
        }
        let found = outputs.winner(&recipe.slug, ext).map(str::to_owned);
        if found.is_none() {
            tracing::warn!(ext, "format conversion produced no file");
        }
        found
    }

    fn output(&self, recipe: &RecipeSpec, meta: &ArtifactMetadata, file: String, ext: &str) -> RecipeOutput {
        RecipeOutput {
            slug: recipe.slug.clone(),
            recipe_name: recipe.name.clone(),
            category: recipe.category.clone(),
            title: meta.title.clone(),
            rename_to: canonical_name(&recipe.slug, ext, meta.published),
            file,
            published: meta.published,
            description: meta.description.clone(),
        }
    }
}

fn render_cover(
    renderer: &dyn CoverRenderer,
    slug: &str,
    title: &str,
    recipe: &RecipeSpec,
) -> anyhow::Result<(tempfile::TempDir, std::path::PathBuf)> {
    let dir = tempfile::Builder::new()
        .prefix("presspack-cover")
        .tempdir()
        .context("create cover temp dir")?;
    let cover = dir.path().join(format!("{slug}.png"));
    renderer.render(&cover, title, &recipe.cover_options)?;
    Ok((dir, cover))
}

/// Moves every output onto its canonical name.
pub fn finalize_names(generated: &Generated, outputs: &mut OutputTable) -> anyhow::Result<()> {
    for output in generated.values().flatten().flat_map(|recipe| &recipe.outputs) {
        outputs
            .rename(&output.file, &output.rename_to)
            .with_context(|| format!("publish {}", output.rename_to))?;
    }
    Ok(())
}
