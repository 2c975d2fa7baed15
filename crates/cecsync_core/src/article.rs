use std::fs;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde_json::{Value, json};
use similar::TextDiff;

use crate::bundle::zip_export_dir;
use crate::manifest::rewrite_manifest;
use crate::retry::{RetryPolicy, retry_until};
use crate::toolkit::{ContentApi, ContentExport, slug_or_query, slug_query};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Everything the article state machine needs to drive one page to
/// its remote counterpart.
#[derive(Debug, Clone)]
pub struct ArticleSpec {
    pub slug: String,
    pub title: String,
    pub author_slug: Option<String>,
    pub html: String,
    pub toc: bool,
    pub taxonomies: Value,
    pub content_type: String,
    pub repository_id: String,
    pub image_slugs: Vec<String>,
    pub image_ids: Vec<String>,
}

/// Drive one article from its current remote state to the local one.
///
/// Absent articles first get an empty shell (placeholder body) so the
/// server assigns an id, then the full export is polled until indexing
/// catches up. An export whose content already matches the local HTML,
/// chapter flag, and taxonomy structure uploads nothing.
pub fn sync_article(
    api: &mut dyn ContentApi,
    spec: &ArticleSpec,
    policy: RetryPolicy,
    indexing_delay: Duration,
) -> Result<SyncOutcome> {
    let lookup = api
        .download_by_query(&slug_query(&spec.slug))
        .with_context(|| format!("lookup failed for {}", spec.slug))?;
    let created = lookup.is_none();
    if created {
        info!("article {} is absent; creating an empty shell", spec.slug);
        api.create_content_item(&shell_payload(spec))
            .with_context(|| format!("failed to create shell for {}", spec.slug))?;
        sleep(indexing_delay);
    }

    let mut query_slugs = vec![spec.slug.clone()];
    query_slugs.extend(spec.image_slugs.iter().cloned());
    let query = slug_or_query(&query_slugs);

    let (export, article_path) = retry_until(policy, "article export download", || {
        let Some(export) = api.download_by_query(&query)? else {
            return Ok(None);
        };
        Ok(locate_article(&export, &spec.content_type, &spec.slug)?
            .map(|path| (export, path)))
    })
    .with_context(|| format!("article {} never appeared in an export", spec.slug))?;

    let raw = fs::read_to_string(&article_path)
        .with_context(|| format!("failed to read {}", article_path.display()))?;
    let mut article: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid article JSON in {}", article_path.display()))?;

    let current_html = article["fields"]["html"].as_str().unwrap_or("");
    let current_toc = article["fields"]["display_chapters"]
        .as_bool()
        .unwrap_or(false);
    let current_taxonomies = article.get("taxonomies").cloned().unwrap_or(json!({}));

    if !created
        && current_html == spec.html
        && current_toc == spec.toc
        && current_taxonomies == spec.taxonomies
    {
        info!("article {} is unchanged", spec.slug);
        return Ok(SyncOutcome::Unchanged);
    }

    if current_html != spec.html {
        let diff = TextDiff::from_lines(current_html, &spec.html);
        debug!("html change for {}:\n{}", spec.slug, diff.unified_diff());
    }

    let Some(article_id) = article["id"].as_str().map(str::to_string) else {
        bail!("exported article {} has no id", spec.slug);
    };

    article["fields"]["html"] = json!(spec.html);
    article["fields"]["display_chapters"] = json!(spec.toc);
    if let Some(author_slug) = &spec.author_slug {
        article["fields"]["author_slug"] = json!(author_slug);
    }
    article["taxonomies"] = spec.taxonomies.clone();
    let rendered = serde_json::to_string_pretty(&article)
        .with_context(|| format!("failed to serialize article {}", spec.slug))?;
    fs::write(&article_path, rendered)
        .with_context(|| format!("failed to write {}", article_path.display()))?;

    rewrite_manifest(
        &export.metadata_path(),
        &spec.content_type,
        &article_id,
        &spec.image_ids,
    )?;
    let bundle = zip_export_dir(&export.dir)?;
    api.upload_bundle(&bundle)
        .with_context(|| format!("bundle upload failed for {}", spec.slug))?;

    Ok(if created {
        SyncOutcome::Created
    } else {
        SyncOutcome::Updated
    })
}

/// Empty shell the server indexes before the real content arrives.
/// The placeholder body guarantees the first full sync sees a
/// difference and uploads.
fn shell_payload(spec: &ArticleSpec) -> Value {
    json!({
        "name": spec.title,
        "type": spec.content_type,
        "description": "",
        "repositoryId": spec.repository_id,
        "slug": spec.slug,
        "language": "en",
        "translatable": true,
        "fields": { "html": "DEFINE" },
    })
}

/// Find the exported article JSON whose slug matches, ignoring the
/// asset files next to it.
fn locate_article(
    export: &ContentExport,
    content_type: &str,
    slug: &str,
) -> Result<Option<PathBuf>> {
    let type_dir = export.item_type_dir(content_type);
    let Ok(entries) = fs::read_dir(&type_dir) else {
        return Ok(None);
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let item: Value = serde_json::from_str(&raw)
            .with_context(|| format!("invalid item JSON in {}", path.display()))?;
        if item.get("slug").and_then(Value::as_str) == Some(slug) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
