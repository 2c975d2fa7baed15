use std::fs;

use log::info;
use serde_json::{Value, json};

use crate::config::UnpublishedAction;
use crate::manifest::group_ids_for_type;
use crate::toolkit::{ContentApi, ControlAction, ControlOutcome, id_or_query, slug_or_query, slug_query};

/// Align the remote publication state with the page's local one.
/// Failures are collected and returned so a run can finish the rest of
/// the site before reporting them.
pub fn set_publication_state(
    api: &mut dyn ContentApi,
    published: bool,
    action: UnpublishedAction,
    content_type: &str,
    slug: &str,
    image_slugs: &[String],
) -> Vec<String> {
    if published {
        publish_page(api, slug, image_slugs)
    } else {
        retire_page(api, action, content_type, slug, image_slugs)
    }
}

/// Publish the article and, when it carries images, its assets. The
/// toolkit reporting nothing to publish is a recorded failure: the
/// item was expected to exist by this point.
fn publish_page(api: &mut dyn ContentApi, slug: &str, image_slugs: &[String]) -> Vec<String> {
    let mut errors = Vec::new();

    match api.control_content(ControlAction::Publish, &slug_query(slug)) {
        Ok(ControlOutcome::Done) => info!("published {slug}"),
        Ok(ControlOutcome::NoItems) => errors.push(format!("no item to publish for {slug}")),
        Err(error) => errors.push(format!("publish failed for {slug}: {error:#}")),
    }

    if !image_slugs.is_empty() {
        match api.control_content(ControlAction::Publish, &slug_or_query(image_slugs)) {
            Ok(ControlOutcome::Done) => info!("published {} images for {slug}", image_slugs.len()),
            Ok(ControlOutcome::NoItems) => {
                errors.push(format!("no image assets to publish for {slug}"))
            }
            Err(error) => errors.push(format!("image publish failed for {slug}: {error:#}")),
        }
    }

    errors
}

/// Take an unpublished page out of the channel, either by unpublishing
/// it or by archiving the whole item group, per configured policy.
fn retire_page(
    api: &mut dyn ContentApi,
    action: UnpublishedAction,
    content_type: &str,
    slug: &str,
    image_slugs: &[String],
) -> Vec<String> {
    let mut all_slugs = vec![slug.to_string()];
    all_slugs.extend(image_slugs.iter().cloned());
    let query = slug_or_query(&all_slugs);

    match action {
        UnpublishedAction::Unpublish => match api.control_content(ControlAction::Unpublish, &query)
        {
            // Nothing published under these slugs is already the
            // desired state.
            Ok(_) => {
                info!("unpublished {slug}");
                Vec::new()
            }
            Err(error) => vec![format!("unpublish failed for {slug}: {error:#}")],
        },
        UnpublishedAction::Archive => archive_page(api, content_type, slug, &query),
    }
}

fn archive_page(
    api: &mut dyn ContentApi,
    content_type: &str,
    slug: &str,
    query: &str,
) -> Vec<String> {
    let export = match api.download_by_query(query) {
        Ok(Some(export)) => export,
        Ok(None) => return Vec::new(),
        Err(error) => return vec![format!("archive lookup failed for {slug}: {error:#}")],
    };

    let manifest = match fs::read_to_string(export.metadata_path())
        .map_err(anyhow::Error::from)
        .and_then(|raw| serde_json::from_str::<Value>(&raw).map_err(anyhow::Error::from))
    {
        Ok(manifest) => manifest,
        Err(error) => return vec![format!("archive manifest unreadable for {slug}: {error:#}")],
    };

    let mut ids = group_ids_for_type(&manifest, "ImageAsset");
    ids.extend(group_ids_for_type(&manifest, content_type));
    if ids.is_empty() {
        return Vec::new();
    }

    let payload = json!({ "q": id_or_query(&ids) });
    match api.post_json(
        "/content/management/api/v1.1/bulkItemsOperations/archive",
        &payload,
    ) {
        Ok(()) => {
            info!("archived {} items for {slug}", ids.len());
            Vec::new()
        }
        Err(error) => vec![format!("archive failed for {slug}: {error:#}")],
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use serde_json::json;
    use tempfile::tempdir;

    use super::set_publication_state;
    use crate::config::UnpublishedAction;
    use crate::toolkit::testing::MockContentApi;
    use crate::toolkit::{ContentExport, ControlAction};

    const CONTENT_TYPE: &str = "DEVO_GitHub-Technical-Content";
    const SLUG: &str = "devo-graalvm-observability";

    fn images() -> Vec<String> {
        vec!["jekyll-arch-diagram".to_string()]
    }

    #[test]
    fn published_page_publishes_article_then_images() {
        let mut api = MockContentApi::default();
        let errors = set_publication_state(
            &mut api,
            true,
            UnpublishedAction::Unpublish,
            CONTENT_TYPE,
            SLUG,
            &images(),
        );
        assert!(errors.is_empty());
        assert_eq!(api.control_log.len(), 2);
        assert_eq!(api.control_log[0].0, ControlAction::Publish);
        assert_eq!(api.control_log[0].1, format!("slug eq \"{SLUG}\""));
        assert_eq!(
            api.control_log[1].1,
            "slug eq \"jekyll-arch-diagram\"".to_string()
        );
    }

    #[test]
    fn nothing_to_publish_is_a_recorded_failure() {
        let mut api = MockContentApi::default();
        api.control_no_items = true;
        let errors = set_publication_state(
            &mut api,
            true,
            UnpublishedAction::Unpublish,
            CONTENT_TYPE,
            SLUG,
            &images(),
        );
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("no item to publish"));
    }

    #[test]
    fn unpublished_page_unpublishes_the_whole_slug_group() {
        let mut api = MockContentApi::default();
        let errors = set_publication_state(
            &mut api,
            false,
            UnpublishedAction::Unpublish,
            CONTENT_TYPE,
            SLUG,
            &images(),
        );
        assert!(errors.is_empty());
        assert_eq!(api.control_log.len(), 1);
        assert_eq!(api.control_log[0].0, ControlAction::Unpublish);
        assert!(api.control_log[0].1.contains(SLUG));
        assert!(api.control_log[0].1.contains("jekyll-arch-diagram"));
    }

    fn export_with_manifest(root: &Path) -> ContentExport {
        let dir = root.join("download");
        fs::create_dir_all(dir.join("contentexport")).expect("create export");
        fs::write(
            dir.join("contentexport").join("metadata.json"),
            serde_json::to_string(&json!({
                "groups": 2,
                "group1": [
                    "ImageAsset:IMG1",
                    format!("{CONTENT_TYPE}:ARTICLE1"),
                ],
            }))
            .expect("render manifest"),
        )
        .expect("write manifest");
        ContentExport {
            dir,
            total_items: 2,
        }
    }

    #[test]
    fn archive_policy_bulk_archives_article_and_image_ids() {
        let temp = tempdir().expect("tempdir");
        let mut api = MockContentApi::default();
        api.download_responses
            .push_back(Some(export_with_manifest(temp.path())));

        let errors = set_publication_state(
            &mut api,
            false,
            UnpublishedAction::Archive,
            CONTENT_TYPE,
            SLUG,
            &images(),
        );
        assert!(errors.is_empty());
        assert_eq!(api.posts.len(), 1);
        assert_eq!(
            api.posts[0].0,
            "/content/management/api/v1.1/bulkItemsOperations/archive"
        );
        assert_eq!(
            api.posts[0].1["q"],
            "id eq \"IMG1\" or id eq \"ARTICLE1\""
        );
    }

    #[test]
    fn archive_with_nothing_remote_is_a_quiet_no_op() {
        let mut api = MockContentApi::default();
        let errors = set_publication_state(
            &mut api,
            false,
            UnpublishedAction::Archive,
            CONTENT_TYPE,
            SLUG,
            &[],
        );
        assert!(errors.is_empty());
        assert!(api.posts.is_empty());
    }
}
