use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use serde_json::{Value, json};

use crate::toolkit::ContentApi;

/// Mapping from local tag names to CMS category names, loaded from a
/// YAML data file. A missing file disables tag translation for the run.
pub fn load_tag_map(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.is_file() {
        warn!("tag map {} is missing; tags will not translate", path.display());
        return Ok(BTreeMap::new());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let map: BTreeMap<String, String> = serde_yaml::from_str(&raw)
        .with_context(|| format!("invalid tag map YAML in {}", path.display()))?;
    Ok(map)
}

/// Taxonomy identity plus its published categories, fetched once per
/// run and cached by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyLookup {
    pub id: String,
    /// `(category id, category name)` pairs.
    pub categories: Vec<(String, String)>,
}

pub fn fetch_repository_id(api: &mut dyn ContentApi, repository: &str) -> Result<String> {
    let listing = api.get_json("/content/management/api/v1.1/repositories?fields=all&limit=500")?;
    find_named_item(&listing, repository)
        .and_then(|item| item.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("repository {repository} not found on the server"))
}

pub fn fetch_channel_token(api: &mut dyn ContentApi, channel: &str) -> Result<String> {
    let listing = api.get_json("/content/management/api/v1.1/channels?fields=all&limit=500")?;
    let item = find_named_item(&listing, channel)
        .ok_or_else(|| anyhow::anyhow!("channel {channel} not found on the server"))?;
    item.get("channelTokens")
        .and_then(Value::as_array)
        .and_then(|tokens| tokens.first())
        .and_then(|token| token.get("token"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("channel {channel} has no channel token"))
}

pub fn fetch_taxonomy(
    api: &mut dyn ContentApi,
    name: &str,
    channel_token: &str,
) -> Result<TaxonomyLookup> {
    let description = api.describe_taxonomy(name)?;
    // The toolkit wraps the description in a `data` envelope.
    let Some(id) = description
        .get("data")
        .and_then(|data| data.get("id"))
        .and_then(Value::as_str)
    else {
        bail!("taxonomy {name} has no id in its description");
    };
    let id = id.to_string();

    let listing = api.get_json(&format!(
        "/content/published/api/v1.1/taxonomies/{id}/categories?limit=500&channelToken={channel_token}"
    ))?;
    let categories = listing
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let category_id = item.get("id")?.as_str()?;
                    let category_name = item.get("name")?.as_str()?;
                    Some((category_id.to_string(), category_name.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(TaxonomyLookup { id, categories })
}

/// Translate local tags into category ids: tag -> mapped CMS name ->
/// published category, matched case-insensitively. Unmapped tags drop
/// out with a debug note.
pub fn translate_tags(
    tags: &[String],
    tag_map: &BTreeMap<String, String>,
    lookup: &TaxonomyLookup,
) -> Vec<String> {
    let mut ids = Vec::new();
    for tag in tags {
        let Some(mapped) = tag_map.get(tag) else {
            debug!("tag {tag} has no CMS mapping");
            continue;
        };
        let category = lookup
            .categories
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(mapped));
        match category {
            Some((id, _)) if !ids.contains(id) => ids.push(id.clone()),
            Some(_) => {}
            None => debug!("mapped tag {mapped} is not a published category"),
        }
    }
    ids
}

/// Render category ids into the taxonomy structure the CMS expects on
/// an item. No categories means an empty object, not an empty list.
pub fn tags_to_structure(taxonomy_id: &str, category_ids: &[String]) -> Value {
    if category_ids.is_empty() {
        return json!({});
    }
    let categories: Vec<Value> = category_ids.iter().map(|id| json!({ "id": id })).collect();
    json!({
        "data": [{
            "id": taxonomy_id,
            "categories": categories,
        }]
    })
}

fn find_named_item<'a>(listing: &'a Value, name: &str) -> Option<&'a Value> {
    listing
        .get("items")?
        .as_array()?
        .iter()
        .find(|item| item.get("name").and_then(Value::as_str) == Some(name))
}
