use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde_json::{Map, Value, json};

fn group_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^group\d+$").expect("valid group-key pattern"))
}

/// Rewrite an export manifest so the bundle imports the article and
/// its image assets together. Prior `groupN` keys are dropped first so
/// indices stay contiguous from zero; every other key is preserved.
/// Group 0 lists the content types in the bundle, group 1 the items,
/// images before the article they belong to.
pub fn rewrite_manifest(
    metadata_path: &Path,
    content_type: &str,
    article_id: &str,
    image_ids: &[String],
) -> Result<()> {
    let raw = fs::read_to_string(metadata_path)
        .with_context(|| format!("failed to read {}", metadata_path.display()))?;
    let mut manifest: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid manifest JSON in {}", metadata_path.display()))?;
    let Some(table) = manifest.as_object_mut() else {
        bail!("manifest is not a JSON object: {}", metadata_path.display());
    };

    set_groups(table, content_type, article_id, image_ids);

    let rendered = serde_json::to_string_pretty(&manifest)
        .context("failed to serialize export manifest")?;
    fs::write(metadata_path, rendered)
        .with_context(|| format!("failed to write {}", metadata_path.display()))?;
    Ok(())
}

fn set_groups(
    table: &mut Map<String, Value>,
    content_type: &str,
    article_id: &str,
    image_ids: &[String],
) {
    table.retain(|key, _| key != "groups" && !group_key_pattern().is_match(key));

    let mut types = vec![content_type.to_string()];
    if !image_ids.is_empty() {
        types.push("ImageAsset".to_string());
    }

    let mut items: Vec<String> = image_ids
        .iter()
        .map(|id| format!("ImageAsset:{id}"))
        .collect();
    items.push(format!("{content_type}:{article_id}"));

    table.insert("groups".to_string(), json!(2));
    table.insert("group0".to_string(), json!(types));
    table.insert("group1".to_string(), json!(items));
}

/// Item ids listed in the manifest's groups, in listed order, filtered
/// to one content type.
pub fn group_ids_for_type(manifest: &Value, type_name: &str) -> Vec<String> {
    let Some(table) = manifest.as_object() else {
        return Vec::new();
    };
    let group_count = table.get("groups").and_then(Value::as_u64).unwrap_or(0);
    let prefix = format!("{type_name}:");

    let mut ids = Vec::new();
    for index in 1..group_count {
        let Some(entries) = table
            .get(&format!("group{index}"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for entry in entries.iter().filter_map(Value::as_str) {
            if let Some(id) = entry.strip_prefix(&prefix) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}
