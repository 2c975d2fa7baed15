use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use log::{info, warn};
use walkdir::WalkDir;

use crate::frontmatter::{FrontMatter, load_document, update_front_matter_key};
use crate::runtime::ResolvedPaths;

/// One Markdown source that participates in the sync, paired with its
/// rendered HTML output when the site build produced one.
#[derive(Debug, Clone)]
pub struct Page {
    pub source: PathBuf,
    /// Path relative to the content dir; drives slug derivation.
    pub relative: PathBuf,
    pub html_path: Option<PathBuf>,
    pub front: FrontMatter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugResolution {
    /// Bare slug as stored in front matter.
    pub base: String,
    /// Namespaced slug used for every remote query.
    pub full: String,
    /// Whether this resolution wrote the slug back to the source file.
    pub persisted: bool,
}

/// Resolve a page's slug. A slug already present in front matter wins
/// and never changes; otherwise one is derived from the file path and,
/// when `persist` is set, written back so every later run resolves the
/// same value even if the file moves.
pub fn resolve_slug(
    page: &Page,
    prefix: &str,
    persist: bool,
) -> Result<SlugResolution> {
    if let Some(existing) = page.front.slug.as_deref()
        && !existing.trim().is_empty()
    {
        let base = existing.trim().to_string();
        return Ok(SlugResolution {
            full: format!("{prefix}{base}"),
            base,
            persisted: false,
        });
    }

    let base = derive_slug_base(&page.relative);
    let mut persisted = false;
    if persist {
        update_front_matter_key(&page.source, "slug", &base)
            .with_context(|| format!("failed to persist slug for {}", page.source.display()))?;
        info!("persisted slug {base} into {}", page.source.display());
        persisted = true;
    } else {
        warn!(
            "derived slug {base} for {} is not persisted; run the slugs pass",
            page.source.display()
        );
    }
    Ok(SlugResolution {
        full: format!("{prefix}{base}"),
        base,
        persisted,
    })
}

/// Derive a bare slug from the path under the content dir. An `index`
/// basename takes its parent segment's name; nested content is
/// prefixed with the remaining parent segments joined by `_`.
pub fn derive_slug_base(relative: &Path) -> String {
    let mut segments: Vec<String> = relative
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|component| match component {
                    Component::Normal(name) => Some(name.to_string_lossy().to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let stem = relative
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = if stem == "index" {
        segments.pop().unwrap_or(stem)
    } else {
        stem
    };

    segments.push(stem);
    segments.join("_")
}

/// Slug for an uploaded image: fixed prefix plus the file stem with
/// every non-alphanumeric character mapped to `-`.
pub fn image_slug(file: &Path, prefix: &str) -> String {
    let stem = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{prefix}{cleaned}")
}

/// A page is published unless a front-matter flag opts it out or its
/// date lies in the future.
pub fn is_published(front: &FrontMatter) -> bool {
    is_published_at(front, today_in_days())
}

fn is_published_at(front: &FrontMatter, today: i64) -> bool {
    if front.draft == Some(true)
        || front.published == Some(false)
        || front.archive == Some(true)
        || front.archived == Some(true)
    {
        return false;
    }
    if let Some(date) = front.date.as_deref()
        && let Some(days) = parse_date_days(date)
        && days > today
    {
        return false;
    }
    true
}

fn today_in_days() -> i64 {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    (seconds / 86_400) as i64
}

/// Parse the `YYYY-MM-DD` head of a front-matter date into days since
/// the Unix epoch. Anything unparseable is treated as no date.
fn parse_date_days(raw: &str) -> Option<i64> {
    let head = raw.trim().get(..10)?;
    let mut parts = head.split('-');
    let year: i64 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(days_from_civil(year, month, day))
}

// Howard Hinnant's days-from-civil algorithm.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let year_of_era = year - era * 400;
    let month_shifted = i64::from((month + 9) % 12);
    let day_of_year = (153 * month_shifted + 2) / 5 + i64::from(day) - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

/// Where the site generator renders this source: `foo.md` becomes
/// `foo/index.html`, `index.md` stays beside its directory.
pub fn rendered_html_path(site_dir: &Path, relative: &Path) -> PathBuf {
    let parent = relative.parent().unwrap_or_else(|| Path::new(""));
    let stem = relative
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    if stem == "index" {
        site_dir.join(parent).join("index.html")
    } else {
        site_dir.join(parent).join(stem).join("index.html")
    }
}

/// Walk the content dir for Markdown sources that declare a `parent`
/// and pair each with its rendered HTML. Missing HTML is a per-page
/// warning; malformed front matter aborts the scan.
pub fn scan_pages(paths: &ResolvedPaths) -> Result<(Vec<Page>, Vec<String>)> {
    let mut pages = Vec::new();
    let mut warnings = Vec::new();

    for entry in WalkDir::new(&paths.content_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let source = entry.path();
        if source.extension().and_then(|ext| ext.to_str()) != Some("md") {
            continue;
        }

        let document = load_document(source)?;
        if document.front.parent.is_none() {
            continue;
        }

        let relative = source
            .strip_prefix(&paths.content_dir)
            .unwrap_or(source)
            .to_path_buf();
        let html = rendered_html_path(&paths.site_dir, &relative);
        let html_path = if html.is_file() {
            Some(html)
        } else {
            warnings.push(format!(
                "no rendered HTML for {} (expected {})",
                source.display(),
                html.display()
            ));
            None
        };

        pages.push(Page {
            source: source.to_path_buf(),
            relative,
            html_path,
            front: document.front,
        });
    }

    Ok((pages, warnings))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::tempdir;

    use super::{
        Page, derive_slug_base, image_slug, is_published_at, parse_date_days, rendered_html_path,
        resolve_slug, scan_pages,
    };
    use crate::frontmatter::{FrontMatter, load_document};
    use crate::runtime::{PathOverrides, ResolutionContext, resolve_paths_with_lookup};

    fn page_at(source: PathBuf, relative: &str, front: FrontMatter) -> Page {
        Page {
            source,
            relative: PathBuf::from(relative),
            html_path: None,
            front,
        }
    }

    #[test]
    fn derive_slug_handles_flat_nested_and_index_paths() {
        assert_eq!(
            derive_slug_base(Path::new("graalvm-observability.md")),
            "graalvm-observability"
        );
        assert_eq!(
            derive_slug_base(Path::new("graalvm/metrics.md")),
            "graalvm_metrics"
        );
        assert_eq!(derive_slug_base(Path::new("graalvm/index.md")), "graalvm");
        assert_eq!(
            derive_slug_base(Path::new("cloud/graalvm/index.md")),
            "cloud_graalvm"
        );
    }

    #[test]
    fn resolve_slug_persists_once_and_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("graalvm-observability.md");
        fs::write(&source, "---\ntitle: GraalVM\nparent: tutorials\n---\nbody\n")
            .expect("write page");

        let page = page_at(
            source.clone(),
            "graalvm-observability.md",
            FrontMatter::default(),
        );
        let first = resolve_slug(&page, "devo-", true).expect("resolve");
        assert_eq!(first.full, "devo-graalvm-observability");
        assert!(first.persisted);

        // The persisted slug wins on every later resolution.
        let front = load_document(&source).expect("reload").front;
        assert_eq!(front.slug.as_deref(), Some("graalvm-observability"));
        let page = page_at(source, "graalvm-observability.md", front);
        let second = resolve_slug(&page, "devo-", true).expect("resolve");
        assert_eq!(second.full, first.full);
        assert!(!second.persisted);
    }

    #[test]
    fn resolve_slug_without_persist_leaves_the_file_alone() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("page.md");
        let raw = "---\ntitle: A\nparent: tutorials\n---\nbody\n";
        fs::write(&source, raw).expect("write page");

        let page = page_at(source.clone(), "page.md", FrontMatter::default());
        let resolved = resolve_slug(&page, "devo-", false).expect("resolve");
        assert_eq!(resolved.full, "devo-page");
        assert!(!resolved.persisted);
        assert_eq!(fs::read_to_string(&source).expect("read"), raw);
    }

    #[test]
    fn image_slug_normalizes_non_alphanumerics() {
        assert_eq!(
            image_slug(Path::new("assets/arch diagram_v2.png"), "jekyll-"),
            "jekyll-arch-diagram-v2"
        );
    }

    #[test]
    fn publication_flags_and_future_dates_suppress_publishing() {
        let today = parse_date_days("2026-08-23").expect("date");
        let mut front = FrontMatter::default();
        assert!(is_published_at(&front, today));

        front.date = Some("2026-08-22 09:00".to_string());
        assert!(is_published_at(&front, today));
        front.date = Some("2026-09-01".to_string());
        assert!(!is_published_at(&front, today));

        front.date = None;
        front.draft = Some(true);
        assert!(!is_published_at(&front, today));
        front.draft = None;
        front.published = Some(false);
        assert!(!is_published_at(&front, today));
        front.published = None;
        front.archived = Some(true);
        assert!(!is_published_at(&front, today));
    }

    #[test]
    fn rendered_html_path_maps_stems_to_pretty_urls() {
        let site = Path::new("/site/_site");
        assert_eq!(
            rendered_html_path(site, Path::new("graalvm/metrics.md")),
            Path::new("/site/_site/graalvm/metrics/index.html")
        );
        assert_eq!(
            rendered_html_path(site, Path::new("graalvm/index.md")),
            Path::new("/site/_site/graalvm/index.html")
        );
    }

    #[test]
    fn scan_pages_pairs_sources_with_rendered_html() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("tutorials")).expect("create content");
        fs::create_dir_all(root.join("_site/with-html")).expect("create site");
        fs::write(
            root.join("tutorials/with-html.md"),
            "---\ntitle: A\nparent: tutorials\n---\nbody\n",
        )
        .expect("write page");
        fs::write(
            root.join("tutorials/without-html.md"),
            "---\ntitle: B\nparent: tutorials\n---\nbody\n",
        )
        .expect("write page");
        fs::write(
            root.join("tutorials/not-synced.md"),
            "---\ntitle: C\n---\nno parent key\n",
        )
        .expect("write page");
        fs::write(root.join("_site/with-html/index.html"), "<html></html>")
            .expect("write html");

        let overrides = PathOverrides {
            project_root: Some(root.to_path_buf()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext {
            cwd: root.to_path_buf(),
        };
        let paths =
            resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve paths");

        let (pages, warnings) = scan_pages(&paths).expect("scan");
        assert_eq!(pages.len(), 2);
        assert!(pages[0].html_path.is_some());
        assert!(pages[1].html_path.is_none());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("without-html"));
    }
}
