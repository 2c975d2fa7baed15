use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use log::warn;
use regex::Regex;

/// One `<img>` reference found in rendered HTML, resolved to the local
/// file that backs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// The `src` attribute exactly as it appears in the HTML.
    pub src: String,
    /// Local file backing the reference.
    pub file: PathBuf,
    pub alt: String,
}

fn img_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<img\b[^>]*>").expect("valid img-tag pattern"))
}

fn src_attr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"src\s*=\s*"([^"]*)""#).expect("valid src pattern"))
}

fn alt_attr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"alt\s*=\s*"([^"]*)""#).expect("valid alt pattern"))
}

fn is_remote(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://") || src.starts_with("//")
}

/// Scan rendered HTML for `<img>` tags and resolve each `src` to a
/// local file. Root-relative paths resolve against the project root,
/// page-relative paths against the Markdown source's directory.
/// Remote URLs are skipped, except those under `remote_src_prefix`,
/// which are stripped back to a project-relative path. A reference
/// whose local file is missing is skipped with a warning.
pub fn gather_images(
    html: &str,
    page_dir: &Path,
    project_root: &Path,
    remote_src_prefix: Option<&str>,
) -> Result<Vec<ImageRef>> {
    let mut images = Vec::new();
    for tag in img_tag_pattern().find_iter(html) {
        let tag = tag.as_str();
        let Some(src) = src_attr_pattern()
            .captures(tag)
            .and_then(|captures| captures.get(1))
            .map(|value| value.as_str())
        else {
            continue;
        };
        let alt = alt_attr_pattern()
            .captures(tag)
            .and_then(|captures| captures.get(1))
            .map(|value| value.as_str())
            .unwrap_or("")
            .to_string();

        let local = match remote_src_prefix.and_then(|prefix| src.strip_prefix(prefix)) {
            Some(stripped) => project_root.join(stripped.trim_start_matches('/')),
            None if is_remote(src) => continue,
            None if src.starts_with('/') => project_root.join(src.trim_start_matches('/')),
            None => page_dir.join(src),
        };

        if !local.is_file() {
            warn!("image referenced by {src} not found at {}", local.display());
            continue;
        }
        // The same image can appear more than once; sync it once.
        if images.iter().any(|image: &ImageRef| image.src == src) {
            continue;
        }
        images.push(ImageRef {
            src: src.to_string(),
            file: local,
            alt,
        });
    }
    Ok(images)
}

/// Replace each synced `src` value with the CMS digital-asset macro so
/// the published HTML renders the managed asset.
pub fn rewrite_image_macros(html: &str, replacements: &[(String, String)]) -> String {
    let mut rewritten = html.to_string();
    for (src, asset_id) in replacements {
        let target = format!("\"{src}\"");
        let replacement =
            format!("\"[!--$CEC_DIGITAL_ASSET--]{asset_id}[/!--$CEC_DIGITAL_ASSET--]\"");
        rewritten = rewritten.replace(&target, &replacement);
    }
    rewritten
}
