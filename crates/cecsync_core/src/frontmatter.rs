use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_yaml::Value;

/// Typed view of the front-matter keys the sync cares about. Unknown
/// keys are ignored here and preserved by [`update_front_matter_key`].
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FrontMatter {
    pub slug: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub toc: bool,
    pub parent: Option<String>,
    pub date: Option<String>,
    pub draft: Option<bool>,
    pub published: Option<bool>,
    pub archive: Option<bool>,
    pub archived: Option<bool>,
}

/// Jekyll front matter carries the author either as a plain string or
/// as a mapping with a `name` key.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Author {
    Name(String),
    Record { name: String },
}

impl Author {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Record { name } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub front: FrontMatter,
    pub body: String,
}

/// Split a raw Markdown file into its YAML header text and body.
/// Malformed front matter aborts the whole run, by contract.
pub fn split_document(raw: &str, origin: &Path) -> Result<(String, String)> {
    let parts: Vec<&str> = raw.split("\n---").collect();
    if !raw.starts_with("---") || parts.len() < 2 {
        bail!("missing YAML front matter in {}", origin.display());
    }
    let header = parts[0]
        .strip_prefix("---")
        .unwrap_or(parts[0])
        .to_string();
    let body = parts[1..].join("\n---");
    Ok((header, body))
}

pub fn load_document(path: &Path) -> Result<Document> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (header, body) = split_document(&raw, path)?;
    let front: FrontMatter = serde_yaml::from_str(&header)
        .with_context(|| format!("invalid YAML front matter in {}", path.display()))?;
    Ok(Document { front, body })
}

/// Rewrite one front-matter key in place, preserving every other key.
/// Returns `true` when a write occurred.
pub fn update_front_matter_key(path: &Path, key: &str, value: &str) -> Result<bool> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (header, body) = split_document(&raw, path)?;

    let mut mapping: Value = serde_yaml::from_str(&header)
        .with_context(|| format!("invalid YAML front matter in {}", path.display()))?;
    let table = mapping
        .as_mapping_mut()
        .ok_or_else(|| anyhow::anyhow!("front matter is not a mapping in {}", path.display()))?;

    let yaml_key = Value::String(key.to_string());
    let yaml_value = Value::String(value.to_string());
    if table.get(&yaml_key) == Some(&yaml_value) {
        return Ok(false);
    }
    table.insert(yaml_key, yaml_value);

    let rendered = serde_yaml::to_string(&mapping)
        .with_context(|| format!("failed to serialize front matter for {}", path.display()))?;
    fs::write(path, format!("---\n{rendered}---{body}"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{load_document, split_document, update_front_matter_key};

    const SAMPLE: &str = "---\ntitle: GraalVM Observability\nparent: tutorials\ntags:\n  - graalvm\n  - observability\ntoc: true\n---\n\nBody text with --- a divider.\n";

    #[test]
    fn split_document_separates_header_and_body() {
        let (header, body) =
            split_document(SAMPLE, Path::new("sample.md")).expect("split document");
        assert!(header.contains("title: GraalVM Observability"));
        assert!(body.contains("Body text with --- a divider."));
    }

    #[test]
    fn split_document_rejects_missing_front_matter() {
        let err = split_document("no front matter here", Path::new("bad.md"))
            .expect_err("must fail");
        assert!(err.to_string().contains("missing YAML front matter"));
    }

    #[test]
    fn load_document_parses_typed_fields() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("page.md");
        fs::write(&path, SAMPLE).expect("write page");

        let document = load_document(&path).expect("load document");
        assert_eq!(
            document.front.title.as_deref(),
            Some("GraalVM Observability")
        );
        assert_eq!(document.front.tags, vec!["graalvm", "observability"]);
        assert!(document.front.toc);
        assert!(document.front.slug.is_none());
    }

    #[test]
    fn load_document_rejects_invalid_yaml() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("page.md");
        fs::write(&path, "---\ntitle: [unclosed\n---\nbody\n").expect("write page");
        let err = load_document(&path).expect_err("must fail");
        assert!(err.to_string().contains("invalid YAML front matter"));
    }

    #[test]
    fn update_front_matter_key_preserves_other_keys_and_body() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("page.md");
        fs::write(&path, SAMPLE).expect("write page");

        let wrote = update_front_matter_key(&path, "slug", "graalvm-observability")
            .expect("update front matter");
        assert!(wrote);

        let document = load_document(&path).expect("reload");
        assert_eq!(document.front.slug.as_deref(), Some("graalvm-observability"));
        assert_eq!(
            document.front.title.as_deref(),
            Some("GraalVM Observability")
        );
        assert!(document.body.contains("Body text with --- a divider."));

        // Second identical update is a no-op.
        let wrote = update_front_matter_key(&path, "slug", "graalvm-observability")
            .expect("update front matter");
        assert!(!wrote);
    }

    #[test]
    fn author_accepts_string_and_mapping() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("page.md");
        fs::write(&path, "---\ntitle: A\nauthor: Jane Doe\n---\nbody\n").expect("write page");
        let document = load_document(&path).expect("load");
        assert_eq!(
            document.front.author.as_ref().map(|author| author.name()),
            Some("Jane Doe")
        );

        fs::write(
            &path,
            "---\ntitle: A\nauthor:\n  name: Jane Doe\n  title: Engineer\n---\nbody\n",
        )
        .expect("write page");
        let document = load_document(&path).expect("load");
        assert_eq!(
            document.front.author.as_ref().map(|author| author.name()),
            Some("Jane Doe")
        );
    }
}
