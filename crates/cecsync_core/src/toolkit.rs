use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use log::debug;
use regex::Regex;
use serde_json::Value;

use crate::runtime::{ResolvedPaths, clean_temp_dir, temp_payload_path};

/// A downloaded content export: the destination directory reported by
/// the toolkit plus the number of items it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentExport {
    pub dir: PathBuf,
    pub total_items: usize,
}

impl ContentExport {
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join("contentexport").join("metadata.json")
    }

    pub fn item_type_dir(&self, type_name: &str) -> PathBuf {
        self.dir
            .join("contentexport")
            .join("ContentItems")
            .join(type_name)
    }

    pub fn item_files_dir(&self, type_name: &str, id: &str) -> PathBuf {
        self.item_type_dir(type_name).join("files").join(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedAsset {
    pub id: String,
    pub slug: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Publish,
    Unpublish,
}

impl ControlAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Unpublish => "unpublish",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Done,
    NoItems,
}

/// Capability seam over the remote CMS. Every success/failure decision
/// and every identifier extraction happens behind this trait, so the
/// text-scraping contract with the toolkit lives in exactly one
/// adapter ([`CecCliClient`]) and tests can substitute a mock.
pub trait ContentApi {
    /// Download all content matching a slug query. `None` when the
    /// query matched nothing.
    fn download_by_query(&mut self, query: &str) -> Result<Option<ContentExport>>;
    /// Upload one local image, returning the generated asset identity.
    fn create_image_asset(&mut self, file: &Path, alt: &str, slug: &str) -> Result<CreatedAsset>;
    /// Create a content item from a JSON payload (management REST).
    fn create_content_item(&mut self, payload: &Value) -> Result<()>;
    fn get_json(&mut self, endpoint: &str) -> Result<Value>;
    fn post_json(&mut self, endpoint: &str, payload: &Value) -> Result<()>;
    fn describe_taxonomy(&mut self, name: &str) -> Result<Value>;
    fn control_content(&mut self, action: ControlAction, query: &str) -> Result<ControlOutcome>;
    /// Import a zipped content bundle into the publish channel.
    fn upload_bundle(&mut self, bundle: &Path) -> Result<()>;
    fn command_count(&self) -> usize;
}

/// Render a `slug eq "..."` query term.
pub fn slug_query(slug: &str) -> String {
    format!("slug eq \"{slug}\"")
}

/// OR-join slug query terms, matching any of the given slugs.
pub fn slug_or_query<S: AsRef<str>>(slugs: &[S]) -> String {
    slugs
        .iter()
        .map(|slug| slug_query(slug.as_ref()))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// OR-join `id eq "..."` terms for bulk item operations.
pub fn id_or_query<S: AsRef<str>>(ids: &[S]) -> String {
    ids.iter()
        .map(|id| format!("id eq \"{}\"", id.as_ref()))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Adapter over the `cec` toolkit binary. Commands run inside the
/// toolkit's working directory with the configured server appended,
/// stdout is captured and logged, and outcomes are decoded from the
/// toolkit's human-readable output by the fixed patterns below.
pub struct CecCliClient {
    binary: PathBuf,
    paths: ResolvedPaths,
    server: String,
    repository: String,
    channel: String,
    command_count: usize,
}

impl CecCliClient {
    pub fn new(paths: &ResolvedPaths, server: &str, repository: &str, channel: &str) -> Self {
        Self {
            binary: PathBuf::from("cec"),
            paths: paths.clone(),
            server: server.to_string(),
            repository: repository.to_string(),
            channel: channel.to_string(),
            command_count: 0,
        }
    }

    /// Run one toolkit command and capture its output. The toolkit's
    /// exit status is not a reliable outcome signal; callers decode
    /// success from the captured text instead.
    fn run_cec(&mut self, args: &[&str], repo_scoped: bool) -> Result<String> {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command.arg("-s").arg(&self.server);
        if repo_scoped {
            command.arg("-r").arg(&self.repository);
        }
        command.current_dir(&self.paths.cec_dir);

        let mut display = format!("cec {} -s {}", args.join(" "), self.server);
        if repo_scoped {
            display.push_str(&format!(" -r {}", self.repository));
        }
        debug!("> {display}");

        let output = command
            .output()
            .with_context(|| format!("failed to execute {}", self.binary.display()))?;
        self.command_count += 1;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        debug!("{stdout}");
        if !stderr.trim().is_empty() {
            debug!("{stderr}");
        }
        Ok(format!("{stdout}{stderr}"))
    }

    fn write_temp_payload(&self, filename: &str, payload: &Value) -> Result<PathBuf> {
        let file = temp_payload_path(&self.paths, filename)?;
        let rendered =
            serde_json::to_string(payload).context("failed to serialize JSON payload")?;
        fs::write(&file, rendered)
            .with_context(|| format!("failed to write {}", file.display()))?;
        Ok(file)
    }
}

impl ContentApi for CecCliClient {
    fn download_by_query(&mut self, query: &str) -> Result<Option<ContentExport>> {
        let output = self.run_cec(&["download-content", "-q", query], true)?;
        parse_download_output(&output, &self.paths.cec_dir)
    }

    fn create_image_asset(&mut self, file: &Path, alt: &str, slug: &str) -> Result<CreatedAsset> {
        let fields = serde_json::json!({ "short_summary": alt });
        let payload = self.write_temp_payload("imageFields", &fields)?;
        let file_arg = file.to_string_lossy().to_string();
        let payload_arg = payload.to_string_lossy().to_string();
        let output = self.run_cec(
            &[
                "create-digital-asset",
                "-f",
                &file_arg,
                "-a",
                &payload_arg,
                "-t",
                "ImageAsset",
                "-g",
                "en",
                "-l",
                slug,
            ],
            true,
        );
        clean_temp_dir(&self.paths);
        let output = output?;
        parse_created_asset(&output).ok_or_else(|| {
            anyhow::anyhow!("no created-asset marker in toolkit output for {slug}")
        })
    }

    fn create_content_item(&mut self, payload: &Value) -> Result<()> {
        let file = self.write_temp_payload("uploadPayload", payload)?;
        let file_arg = file.to_string_lossy().to_string();
        let result = self.run_cec(
            &[
                "execute-post",
                "/content/management/api/v1.1/items",
                "-b",
                &file_arg,
            ],
            false,
        );
        clean_temp_dir(&self.paths);
        result.map(|_| ())
    }

    fn get_json(&mut self, endpoint: &str) -> Result<Value> {
        let file = temp_payload_path(&self.paths, "response")?;
        let file_arg = file.to_string_lossy().to_string();
        let result = self.run_cec(&["exeg", endpoint, "-f", &file_arg], false);
        let parsed = result.and_then(|_| {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("toolkit wrote no response for {endpoint}"))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON response for {endpoint}"))
        });
        clean_temp_dir(&self.paths);
        parsed
    }

    fn post_json(&mut self, endpoint: &str, payload: &Value) -> Result<()> {
        let file = self.write_temp_payload("postPayload", payload)?;
        let file_arg = file.to_string_lossy().to_string();
        let result = self.run_cec(&["execute-post", endpoint, "-b", &file_arg], false);
        clean_temp_dir(&self.paths);
        result.map(|_| ())
    }

    fn describe_taxonomy(&mut self, name: &str) -> Result<Value> {
        let file = temp_payload_path(&self.paths, "taxonomy")?;
        let file_arg = file.to_string_lossy().to_string();
        let result = self.run_cec(&["describe-taxonomy", name, "-f", &file_arg], false);
        let parsed = result.and_then(|_| {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("toolkit wrote no description for taxonomy {name}"))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid taxonomy JSON for {name}"))
        });
        clean_temp_dir(&self.paths);
        parsed
    }

    fn control_content(&mut self, action: ControlAction, query: &str) -> Result<ControlOutcome> {
        let channel = self.channel.clone();
        let output = self.run_cec(
            &[
                "control-content",
                action.as_str(),
                "-q",
                query,
                "-c",
                &channel,
            ],
            true,
        )?;
        if output.contains(NO_ITEM_MARKER) {
            Ok(ControlOutcome::NoItems)
        } else {
            Ok(ControlOutcome::Done)
        }
    }

    fn upload_bundle(&mut self, bundle: &Path) -> Result<()> {
        let bundle_arg = bundle.to_string_lossy().to_string();
        let channel = self.channel.clone();
        let output = self.run_cec(
            &["upload-content", &bundle_arg, "-f", "-u", "-c", &channel],
            true,
        )?;
        if output.contains(IMPORT_FAILED_MARKER) {
            bail!("bundle import failed for {}", bundle.display());
        }
        Ok(())
    }

    fn command_count(&self) -> usize {
        self.command_count
    }
}

const NO_ITEM_MARKER: &str = "- no item to publish";
const IMPORT_FAILED_MARKER: &str = "ERROR: import failed";

fn total_items_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"- total items to export: (\d+)").expect("valid total-items pattern")
    })
}

fn export_dir_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"- the assets are available at (\S+)").expect("valid export-dir pattern")
    })
}

fn created_asset_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"created ImageAsset asset \(([^)]*)\)").expect("valid created-asset pattern")
    })
}

fn asset_field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\w+): (\S+)").expect("valid asset-field pattern"))
}

/// Decode a `download-content` transcript into an export location.
/// Zero matched items is `None`; an unrecognizable transcript is an
/// error rather than a guess.
pub fn parse_download_output(output: &str, base_dir: &Path) -> Result<Option<ContentExport>> {
    let total = total_items_pattern()
        .captures(output)
        .and_then(|captures| captures.get(1))
        .and_then(|value| value.as_str().parse::<usize>().ok());
    let Some(total) = total else {
        bail!("no item count in download-content output");
    };
    if total == 0 {
        return Ok(None);
    }

    let dir = export_dir_pattern()
        .captures(output)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().trim())
        .ok_or_else(|| anyhow::anyhow!("no export directory in download-content output"))?;
    let dir = PathBuf::from(dir);
    let dir = if dir.is_absolute() {
        dir
    } else {
        base_dir.join(dir)
    };

    Ok(Some(ContentExport {
        dir,
        total_items: total,
    }))
}

/// Extract the generated identity from a `create-digital-asset`
/// success line, e.g.
/// `created ImageAsset asset (Id: CONT123 slug: jekyll-arch-diagram)`.
pub fn parse_created_asset(output: &str) -> Option<CreatedAsset> {
    let inner = created_asset_pattern()
        .captures(output)?
        .get(1)?
        .as_str()
        .to_string();

    let mut id = None;
    let mut slug = None;
    for captures in asset_field_pattern().captures_iter(&inner) {
        match &captures[1] {
            "Id" => id = Some(captures[2].to_string()),
            "slug" => slug = Some(captures[2].to_string()),
            _ => {}
        }
    }
    Some(CreatedAsset {
        id: id?,
        slug: slug?,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{BTreeMap, VecDeque};
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use serde_json::Value;

    use super::{ContentApi, ContentExport, ControlAction, ControlOutcome, CreatedAsset};

    /// In-memory stand-in for the toolkit adapter. Downloads are a
    /// queue consumed in call order, so tests can script the lookup,
    /// polling, and reconciliation sequence a run performs.
    #[derive(Default)]
    pub(crate) struct MockContentApi {
        pub download_responses: VecDeque<Option<ContentExport>>,
        pub download_queries: Vec<String>,
        pub asset_ids_by_slug: BTreeMap<String, String>,
        pub created_assets: Vec<String>,
        pub content_items: Vec<Value>,
        pub posts: Vec<(String, Value)>,
        pub json_endpoints: BTreeMap<String, Value>,
        pub taxonomies: BTreeMap<String, Value>,
        pub control_log: Vec<(ControlAction, String)>,
        pub control_no_items: bool,
        pub uploaded_bundles: Vec<PathBuf>,
        pub fail_upload: bool,
        pub commands: usize,
    }

    impl ContentApi for MockContentApi {
        fn download_by_query(&mut self, query: &str) -> Result<Option<ContentExport>> {
            self.commands += 1;
            self.download_queries.push(query.to_string());
            Ok(self.download_responses.pop_front().unwrap_or(None))
        }

        fn create_image_asset(
            &mut self,
            _file: &Path,
            _alt: &str,
            slug: &str,
        ) -> Result<CreatedAsset> {
            self.commands += 1;
            match self.asset_ids_by_slug.get(slug) {
                Some(id) => {
                    self.created_assets.push(slug.to_string());
                    Ok(CreatedAsset {
                        id: id.clone(),
                        slug: slug.to_string(),
                    })
                }
                None => anyhow::bail!("no created-asset marker in toolkit output for {slug}"),
            }
        }

        fn create_content_item(&mut self, payload: &Value) -> Result<()> {
            self.commands += 1;
            self.content_items.push(payload.clone());
            Ok(())
        }

        fn get_json(&mut self, endpoint: &str) -> Result<Value> {
            self.commands += 1;
            self.json_endpoints
                .get(endpoint)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unexpected endpoint: {endpoint}"))
        }

        fn post_json(&mut self, endpoint: &str, payload: &Value) -> Result<()> {
            self.commands += 1;
            self.posts.push((endpoint.to_string(), payload.clone()));
            Ok(())
        }

        fn describe_taxonomy(&mut self, name: &str) -> Result<Value> {
            self.commands += 1;
            self.taxonomies
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown taxonomy: {name}"))
        }

        fn control_content(
            &mut self,
            action: ControlAction,
            query: &str,
        ) -> Result<ControlOutcome> {
            self.commands += 1;
            self.control_log.push((action, query.to_string()));
            if self.control_no_items {
                Ok(ControlOutcome::NoItems)
            } else {
                Ok(ControlOutcome::Done)
            }
        }

        fn upload_bundle(&mut self, bundle: &Path) -> Result<()> {
            self.commands += 1;
            if self.fail_upload {
                anyhow::bail!("bundle import failed for {}", bundle.display());
            }
            self.uploaded_bundles.push(bundle.to_path_buf());
            Ok(())
        }

        fn command_count(&self) -> usize {
            self.commands
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{parse_created_asset, parse_download_output, slug_or_query, slug_query};

    const DOWNLOAD_OK: &str = "\
 - establish connection to remote server\n\
 - total items to export: 2\n\
 - the assets are available at src/content/DevO_QA\n\
 - download finished\n";

    const DOWNLOAD_EMPTY: &str = "\
 - establish connection to remote server\n\
 - total items to export: 0\n";

    #[test]
    fn download_output_yields_export_location() {
        let export = parse_download_output(DOWNLOAD_OK, Path::new("/work/_cec"))
            .expect("parse")
            .expect("export");
        assert_eq!(export.total_items, 2);
        assert_eq!(
            export.dir,
            Path::new("/work/_cec/src/content/DevO_QA")
        );
        assert_eq!(
            export.metadata_path(),
            Path::new("/work/_cec/src/content/DevO_QA/contentexport/metadata.json")
        );
    }

    #[test]
    fn download_output_with_zero_items_is_none() {
        let export =
            parse_download_output(DOWNLOAD_EMPTY, Path::new("/work/_cec")).expect("parse");
        assert!(export.is_none());
    }

    #[test]
    fn unrecognized_download_output_is_an_error() {
        let err = parse_download_output("ERROR: something broke", Path::new("/work/_cec"))
            .expect_err("must fail");
        assert!(err.to_string().contains("no item count"));
    }

    #[test]
    fn created_asset_line_yields_id_and_slug() {
        let output = " - created ImageAsset asset (Id: CONT42AB type: ImageAsset slug: jekyll-arch-diagram)\n";
        let asset = parse_created_asset(output).expect("asset");
        assert_eq!(asset.id, "CONT42AB");
        assert_eq!(asset.slug, "jekyll-arch-diagram");
    }

    #[test]
    fn missing_created_asset_marker_is_none() {
        assert!(parse_created_asset("ERROR: upload rejected").is_none());
    }

    #[test]
    fn slug_queries_render_boolean_or() {
        assert_eq!(slug_query("devo-alpha"), "slug eq \"devo-alpha\"");
        assert_eq!(
            slug_or_query(&["jekyll-one", "jekyll-two"]),
            "slug eq \"jekyll-one\" or slug eq \"jekyll-two\""
        );
    }
}
