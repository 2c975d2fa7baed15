use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTENT_TYPE: &str = "DEVO_GitHub-Technical-Content";
pub const DEFAULT_ARTICLE_SLUG_PREFIX: &str = "devo-";
pub const DEFAULT_IMAGE_SLUG_PREFIX: &str = "jekyll-";
pub const DEFAULT_RETRY_ATTEMPTS: usize = 4;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_INDEXING_DELAY_SECS: u64 = 5;
pub const DEFAULT_TAG_MAP_FILE: &str = "cec_tags.yaml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct SyncConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub slugs: SlugSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub taxonomy: TaxonomySection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ServerSection {
    pub name: Option<String>,
    pub repository: Option<String>,
    pub channel: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SlugSection {
    pub article_prefix: Option<String>,
    pub image_prefix: Option<String>,
    /// Whether resolving a slug may write it back into front matter.
    pub persist: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncSection {
    pub retry_attempts: Option<usize>,
    pub retry_delay_secs: Option<u64>,
    pub indexing_delay_secs: Option<u64>,
    /// Absolute image URLs carrying this prefix are stripped back to a
    /// repository-relative path instead of being skipped.
    pub remote_src_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnpublishedAction {
    #[default]
    Unpublish,
    Archive,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PublishSection {
    #[serde(default)]
    pub when_unpublished: UnpublishedAction,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TaxonomySection {
    pub name: Option<String>,
    /// Tag-mapping YAML file, relative to the site data dir.
    pub tag_map_file: Option<String>,
}

impl SyncConfig {
    /// Resolve the cec server name: env CEC_SERVER > config. Required.
    pub fn server_name(&self) -> Result<String> {
        if let Some(value) = non_empty_env("CEC_SERVER") {
            return Ok(value);
        }
        match self.server.name.as_deref() {
            Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => bail!("server name is not configured (set [server].name or CEC_SERVER)"),
        }
    }

    /// Resolve the repository: env CEC_REPOSITORY > config. Required.
    pub fn repository(&self) -> Result<String> {
        if let Some(value) = non_empty_env("CEC_REPOSITORY") {
            return Ok(value);
        }
        match self.server.repository.as_deref() {
            Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => bail!(
                "repository is not configured (set [server].repository or CEC_REPOSITORY)"
            ),
        }
    }

    /// Resolve the publish channel: env CEC_CHANNEL > config > repository.
    pub fn channel(&self) -> Result<String> {
        if let Some(value) = non_empty_env("CEC_CHANNEL") {
            return Ok(value);
        }
        if let Some(value) = self.server.channel.as_deref()
            && !value.trim().is_empty()
        {
            return Ok(value.trim().to_string());
        }
        self.repository()
    }

    pub fn content_type(&self) -> &str {
        self.server
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    pub fn article_slug_prefix(&self) -> &str {
        self.slugs
            .article_prefix
            .as_deref()
            .unwrap_or(DEFAULT_ARTICLE_SLUG_PREFIX)
    }

    pub fn image_slug_prefix(&self) -> &str {
        self.slugs
            .image_prefix
            .as_deref()
            .unwrap_or(DEFAULT_IMAGE_SLUG_PREFIX)
    }

    pub fn persist_slugs(&self) -> bool {
        self.slugs.persist.unwrap_or(true)
    }

    pub fn retry_attempts(&self) -> usize {
        self.sync.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS)
    }

    pub fn retry_delay_secs(&self) -> u64 {
        self.sync.retry_delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS)
    }

    pub fn indexing_delay_secs(&self) -> u64 {
        self.sync
            .indexing_delay_secs
            .unwrap_or(DEFAULT_INDEXING_DELAY_SECS)
    }

    pub fn tag_map_file(&self) -> &str {
        self.taxonomy
            .tag_map_file
            .as_deref()
            .unwrap_or(DEFAULT_TAG_MAP_FILE)
    }
}

/// Load and parse a SyncConfig from a TOML file. Returns default if
/// the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<SyncConfig> {
    if !config_path.exists() {
        return Ok(SyncConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SyncConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn non_empty_env(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{SyncConfig, UnpublishedAction, load_config};

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config.content_type(), super::DEFAULT_CONTENT_TYPE);
        assert_eq!(config.retry_attempts(), 4);
        assert!(config.persist_slugs());
        assert_eq!(
            config.publish.when_unpublished,
            UnpublishedAction::Unpublish
        );
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[server]
name = "ost"
repository = "DevO_QA"
channel = "DevO_QA"
content_type = "DEVO_GitHub-Technical-Content"

[slugs]
article_prefix = "devo-"
image_prefix = "jekyll-"
persist = false

[sync]
retry_attempts = 6
retry_delay_secs = 2
remote_src_prefix = "https://github.com/oracle-devrel/devo.tutorials/raw/main/"

[publish]
when_unpublished = "archive"

[taxonomy]
name = "DevO-Developer Relations"
tag_map_file = "cec_tags.yaml"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.server_name().expect("server").as_str(), "ost");
        assert_eq!(config.repository().expect("repo").as_str(), "DevO_QA");
        assert_eq!(config.channel().expect("channel").as_str(), "DevO_QA");
        assert_eq!(config.retry_attempts(), 6);
        assert_eq!(config.retry_delay_secs(), 2);
        assert!(!config.persist_slugs());
        assert_eq!(config.publish.when_unpublished, UnpublishedAction::Archive);
        assert_eq!(
            config.taxonomy.name.as_deref(),
            Some("DevO-Developer Relations")
        );
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[server]\nname = \"ost\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.server_name().expect("server").as_str(), "ost");
        assert!(config.repository().is_err());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[server\nname = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn channel_falls_back_to_repository() {
        let mut config = SyncConfig::default();
        config.server.repository = Some("DevO_QA".to_string());
        assert_eq!(config.channel().expect("channel").as_str(), "DevO_QA");
    }
}
