use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;

use crate::cache::{CachePolicy, HttpCacheSource, load_index};
use crate::catalog::html::{DEFAULT_TEMPLATE, PageContext, render_page, source_link};
use crate::catalog::opds::CATALOG_FILENAME;
use crate::catalog::{Catalog, build_listing};
use crate::cli::{BuildArgs, EnabledArgs, csv_set};
use crate::clock::{Clock, SystemClock, precise_delta};
use crate::cover::{CommandCoverRenderer, CoverRenderer};
use crate::job_log::JobLog;
use crate::metadata::EbookMetaTool;
use crate::naming::OutputTable;
use crate::orchestrator::{JobOrchestrator, RunConfig, RunSummary, Tools, finalize_names};
use crate::recipe::RecipeBook;
use crate::runner::{Accounts, CommandConverter};

pub const PAGE_FILENAME: &str = "index.html";

pub fn run(args: BuildArgs, verbose: bool) -> anyhow::Result<RunSummary> {
    let clock = SystemClock;
    let started = clock.now();

    let publish_site = if args.publish_site.ends_with('/') {
        args.publish_site.clone()
    } else {
        format!("{}/", args.publish_site)
    };

    let mut book = RecipeBook::load(&args.recipes).context("load recipe book")?;
    book.resolve_names(&args.recipes_dir);
    tracing::info!(
        recipes = book.recipes.len(),
        path = %args.recipes.display(),
        "loaded recipe book"
    );

    std::fs::create_dir_all(&args.publish_dir)
        .with_context(|| format!("create publish dir: {}", args.publish_dir.display()))?;
    let job_log_path = JobLog::path_in(&args.meta_dir);
    let job_log = JobLog::load_or_default(&job_log_path);

    let cache_policy = CachePolicy {
        index_timeout: Duration::from_secs(args.index_timeout_secs),
        file_timeout: Duration::from_secs(args.cache_timeout_secs),
        retry_wait: Duration::from_secs(args.retry_wait_secs),
        ..CachePolicy::default()
    };
    let cache = HttpCacheSource::new(&publish_site)?;
    let cached = load_index(&cache, &clock, &cache_policy);

    let mut outputs = OutputTable::scan(&args.publish_dir)?;

    let converter = CommandConverter {
        bin: args.converter.clone(),
        recipes_dir: args.recipes_dir.clone(),
        publish_dir: args.publish_dir.clone(),
        static_dir: args.static_dir.clone(),
        title_date_format: args.title_date_format.clone(),
        accounts: args.accounts.as_deref().map(Accounts::parse).unwrap_or_default(),
        verbose,
    };
    let meta_tool = EbookMetaTool {
        bin: args.meta_tool.clone(),
    };
    let cover = args
        .cover_command
        .clone()
        .filter(|bin| !bin.trim().is_empty())
        .map(|bin| CommandCoverRenderer { bin });

    let orchestrator = JobOrchestrator::new(
        Tools {
            converter: &converter,
            metadata: &meta_tool,
            cache: &cache,
            cover: cover.as_ref().map(|c| c as &dyn CoverRenderer),
            clock: &clock,
        },
        RunConfig {
            skip: csv_set(&args.skip),
            regenerate: csv_set(&args.regenerate),
            publish_site: publish_site.clone(),
            cache_policy,
        },
    );
    let outcome = orchestrator.run(&book, &cached, job_log, &mut outputs);

    finalize_names(&outcome.generated, &mut outputs).context("rename outputs")?;

    let listing = build_listing(&outcome.generated, &book, &args.publish_dir);
    let now = clock.now();
    let catalog = Catalog::build(&listing, outcome.index, &publish_site, now);
    catalog.write(&args.publish_dir)?;

    outcome.job_log.save(&job_log_path)?;

    let elapsed = (clock.now() - started).to_std().unwrap_or_default();
    let template = match &args.template {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("read template: {}", path.display()))?,
        None => DEFAULT_TEMPLATE.to_owned(),
    };
    let page = render_page(
        &template,
        &PageContext {
            listing: catalog.listing_html.clone(),
            css: read_optional(&args.static_dir.join("site.css"))?,
            js: read_optional(&args.static_dir.join("site.js"))?,
            refreshed_ts: now.timestamp_millis(),
            refreshed_dt: now.format("%Y-%m-%d %H:%M:%S%:z").to_string(),
            publish_site: publish_site.clone(),
            elapsed: precise_delta(elapsed),
            catalog: CATALOG_FILENAME.to_owned(),
            source_link: source_link(&args.source_url, &args.commit_hash),
        },
    )
    .context("render page")?;
    let page_path = args.publish_dir.join(PAGE_FILENAME);
    std::fs::write(&page_path, page)
        .with_context(|| format!("write page: {}", page_path.display()))?;

    std::fs::write(&args.summary, outcome.summary.to_markdown())
        .with_context(|| format!("write job summary: {}", args.summary.display()))?;

    tracing::info!(
        elapsed = %precise_delta(elapsed),
        publish_dir = %args.publish_dir.display(),
        "build complete"
    );
    Ok(outcome.summary)
}

/// Prints the slugs whose schedule is enabled now, one per line.
pub fn enabled(args: EnabledArgs) -> anyhow::Result<Vec<String>> {
    let book = RecipeBook::load(&args.recipes).context("load recipe book")?;
    let job_log = JobLog::load_or_default(&JobLog::path_in(&args.meta_dir));
    let now = SystemClock.now();
    let slugs: Vec<String> = book
        .recipes
        .iter()
        .filter(|recipe| recipe.is_enabled(job_log.last_run(&recipe.slug), now))
        .map(|recipe| recipe.slug.clone())
        .collect();
    for slug in &slugs {
        println!("{slug}");
    }
    Ok(slugs)
}

fn read_optional(path: &Path) -> anyhow::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}
