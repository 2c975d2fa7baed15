use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use serde_json::json;

use crate::article::{ArticleSpec, SyncOutcome, sync_article};
use crate::assets::{ImageSync, reconcile_images};
use crate::config::SyncConfig;
use crate::html::{gather_images, rewrite_image_macros};
use crate::page::{Page, image_slug, is_published, resolve_slug, scan_pages};
use crate::publish::set_publication_state;
use crate::retry::RetryPolicy;
use crate::runtime::ResolvedPaths;
use crate::taxonomy::{
    TaxonomyLookup, fetch_channel_token, fetch_repository_id, fetch_taxonomy, load_tag_map,
    tags_to_structure, translate_tags,
};
use crate::toolkit::ContentApi;

/// Everything a run threads through every page: configuration, the
/// resolved layout, and remote identities fetched once and cached.
pub struct SyncContext {
    pub config: SyncConfig,
    pub paths: ResolvedPaths,
    pub persist_slugs: bool,
    tag_map: BTreeMap<String, String>,
    repository_id: Option<String>,
    taxonomy: Option<TaxonomyLookup>,
}

impl SyncContext {
    pub fn new(
        config: SyncConfig,
        paths: ResolvedPaths,
        persist_slugs: Option<bool>,
    ) -> Result<Self> {
        let tag_map = load_tag_map(&paths.data_dir.join(config.tag_map_file()))?;
        let persist_slugs = persist_slugs.unwrap_or_else(|| config.persist_slugs());
        Ok(Self {
            config,
            paths,
            persist_slugs,
            tag_map,
            repository_id: None,
            taxonomy: None,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.retry_attempts(),
            Duration::from_secs(self.config.retry_delay_secs()),
        )
    }

    fn repository_id(&mut self, api: &mut dyn ContentApi) -> Result<String> {
        if let Some(id) = &self.repository_id {
            return Ok(id.clone());
        }
        let id = fetch_repository_id(api, &self.config.repository()?)?;
        self.repository_id = Some(id.clone());
        Ok(id)
    }

    /// Taxonomy identity and categories, fetched on first use. `None`
    /// when no taxonomy is configured.
    fn taxonomy(&mut self, api: &mut dyn ContentApi) -> Result<Option<TaxonomyLookup>> {
        let Some(name) = self.config.taxonomy.name.clone() else {
            return Ok(None);
        };
        if let Some(lookup) = &self.taxonomy {
            return Ok(Some(lookup.clone()));
        }
        let token = fetch_channel_token(api, &self.config.channel()?)?;
        let lookup = fetch_taxonomy(api, &name, &token)?;
        self.taxonomy = Some(lookup.clone());
        Ok(Some(lookup))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageResult {
    Created,
    Updated,
    Unchanged,
    Retired,
    Skipped,
    Failed,
}

impl PageResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Retired => "retired",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub source: PathBuf,
    pub slug: String,
    pub result: PageResult,
}

#[derive(Debug, Default)]
pub struct DeployReport {
    pub outcomes: Vec<PageOutcome>,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub retired: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub request_count: usize,
}

impl DeployReport {
    fn record(&mut self, page: &Page, slug: &str, result: PageResult) {
        match result {
            PageResult::Created => self.created += 1,
            PageResult::Updated => self.updated += 1,
            PageResult::Unchanged => self.unchanged += 1,
            PageResult::Retired => self.retired += 1,
            PageResult::Skipped => self.skipped += 1,
            PageResult::Failed => self.failed += 1,
        }
        self.outcomes.push(PageOutcome {
            source: page.source.clone(),
            slug: slug.to_string(),
            result,
        });
    }
}

/// Synchronize the site into the remote repository, one page at a
/// time. Per-page failures are accumulated; only front-matter
/// corruption or an unusable layout aborts the run.
pub fn deploy_site(
    api: &mut dyn ContentApi,
    ctx: &mut SyncContext,
    only_page: Option<&Path>,
) -> Result<DeployReport> {
    let (pages, warnings) = scan_pages(&ctx.paths)?;
    let mut report = DeployReport {
        warnings,
        ..DeployReport::default()
    };

    for page in &pages {
        if let Some(filter) = only_page
            && !(page.source == filter || page.source.ends_with(filter))
        {
            continue;
        }
        deploy_page(api, ctx, page, &mut report);
    }

    report.request_count = api.command_count();
    Ok(report)
}

fn deploy_page(
    api: &mut dyn ContentApi,
    ctx: &mut SyncContext,
    page: &Page,
    report: &mut DeployReport,
) {
    let resolved = match resolve_slug(page, ctx.config.article_slug_prefix(), ctx.persist_slugs) {
        Ok(resolved) => resolved,
        Err(error) => {
            report
                .errors
                .push(format!("{}: {error:#}", page.source.display()));
            report.record(page, "", PageResult::Failed);
            return;
        }
    };
    let slug = resolved.full;
    info!("syncing {} as {slug}", page.source.display());

    let result = sync_one_page(api, ctx, page, &slug, report);
    match result {
        Ok(result) => report.record(page, &slug, result),
        Err(error) => {
            report.errors.push(format!("{slug}: {error:#}"));
            report.record(page, &slug, PageResult::Failed);
        }
    }
}

fn sync_one_page(
    api: &mut dyn ContentApi,
    ctx: &mut SyncContext,
    page: &Page,
    slug: &str,
    report: &mut DeployReport,
) -> Result<PageResult> {
    let published = is_published(&page.front);

    let Some(html_path) = &page.html_path else {
        if published {
            warn!("skipping {}: no rendered HTML", page.source.display());
            return Ok(PageResult::Skipped);
        }
        // A draft with no rendered output still gets taken out of the
        // channel.
        let errors = set_publication_state(
            api,
            false,
            ctx.config.publish.when_unpublished,
            ctx.config.content_type(),
            slug,
            &[],
        );
        report.errors.extend(errors);
        return Ok(PageResult::Retired);
    };
    let html = fs::read_to_string(html_path)
        .with_context(|| format!("failed to read {}", html_path.display()))?;

    let page_dir = page.source.parent().unwrap_or(&ctx.paths.project_root);
    let images = gather_images(
        &html,
        page_dir,
        &ctx.paths.project_root,
        ctx.config.sync.remote_src_prefix.as_deref(),
    )?;
    let queued: Vec<ImageSync> = images
        .into_iter()
        .map(|image| ImageSync {
            slug: image_slug(&image.file, ctx.config.image_slug_prefix()),
            src: image.src,
            file: image.file,
            alt: image.alt,
        })
        .collect();

    let reconciled = reconcile_images(api, &queued)?;
    report
        .errors
        .extend(reconciled.errors.iter().map(|error| format!("{slug}: {error}")));

    let replacements: Vec<(String, String)> = reconciled
        .synced
        .iter()
        .map(|image| (image.src.clone(), image.id.clone()))
        .collect();
    let html = rewrite_image_macros(&html, &replacements);

    let taxonomies = match ctx.taxonomy(api)? {
        Some(lookup) => {
            let ids = translate_tags(&page.front.tags, &ctx.tag_map, &lookup);
            tags_to_structure(&lookup.id, &ids)
        }
        None => json!({}),
    };

    let image_slugs: Vec<String> = reconciled
        .synced
        .iter()
        .map(|image| image.slug.clone())
        .collect();
    let image_ids: Vec<String> = reconciled
        .synced
        .iter()
        .map(|image| image.id.clone())
        .collect();

    let spec = ArticleSpec {
        slug: slug.to_string(),
        title: page
            .front
            .title
            .clone()
            .unwrap_or_else(|| slug.to_string()),
        author_slug: page
            .front
            .author
            .as_ref()
            .map(|author| name_slug(author.name())),
        html,
        toc: page.front.toc,
        taxonomies,
        content_type: ctx.config.content_type().to_string(),
        repository_id: ctx.repository_id(api)?,
        image_slugs: image_slugs.clone(),
        image_ids,
    };

    let outcome = sync_article(
        api,
        &spec,
        ctx.retry_policy(),
        Duration::from_secs(ctx.config.indexing_delay_secs()),
    )?;

    // Content syncs either way; the publication flag only decides
    // whether the result goes live or comes out of the channel.
    let errors = set_publication_state(
        api,
        published,
        ctx.config.publish.when_unpublished,
        ctx.config.content_type(),
        slug,
        &image_slugs,
    );
    report.errors.extend(errors);

    Ok(if !published {
        PageResult::Retired
    } else {
        match outcome {
            SyncOutcome::Created => PageResult::Created,
            SyncOutcome::Updated => PageResult::Updated,
            SyncOutcome::Unchanged => PageResult::Unchanged,
        }
    })
}

fn name_slug(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct SlugPassReport {
    pub written: Vec<PathBuf>,
    pub already_present: usize,
}

/// Persist derived slugs into every page that lacks one. This is the
/// only pass that mutates source files wholesale; deploys otherwise
/// honor the configured persistence flag page by page.
pub fn persist_missing_slugs(paths: &ResolvedPaths, prefix: &str) -> Result<SlugPassReport> {
    let (pages, _) = scan_pages(paths)?;
    let mut report = SlugPassReport::default();
    for page in &pages {
        let resolved = resolve_slug(page, prefix, true)?;
        if resolved.persisted {
            report.written.push(page.source.clone());
        } else {
            report.already_present += 1;
        }
    }
    Ok(report)
}

#[derive(Debug, Default)]
pub struct StatusReport {
    pub pages: usize,
    pub published: usize,
    pub unpublished: usize,
    pub missing_slug: usize,
    pub missing_html: usize,
    pub warnings: Vec<String>,
}

/// Dry scan of the site: what a deploy would see, without any remote
/// command.
pub fn site_status(paths: &ResolvedPaths) -> Result<StatusReport> {
    let (pages, warnings) = scan_pages(paths)?;
    let mut report = StatusReport {
        pages: pages.len(),
        warnings,
        ..StatusReport::default()
    };
    for page in &pages {
        if is_published(&page.front) {
            report.published += 1;
        } else {
            report.unpublished += 1;
        }
        if page.front.slug.as_deref().map(str::trim).unwrap_or("").is_empty() {
            report.missing_slug += 1;
        }
        if page.html_path.is_none() {
            report.missing_html += 1;
        }
    }
    Ok(report)
}
