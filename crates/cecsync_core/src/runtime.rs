use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Directory the cec toolkit is initialized in. Every remote command
/// runs with this as its working directory.
pub const CEC_DIR_NAME: &str = "_cec";

pub const TEMP_DIR_NAME: &str = "_temp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub content_dir: Option<PathBuf>,
    pub site_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    /// Root of the site source checkout.
    pub project_root: PathBuf,
    /// Markdown sources with YAML front matter.
    pub content_dir: PathBuf,
    /// Rendered HTML output of the site generator.
    pub site_dir: PathBuf,
    /// Working directory of the cec toolkit install.
    pub cec_dir: PathBuf,
    /// Scratch directory for temporary JSON payloads.
    pub temp_dir: PathBuf,
    /// Site data files (tag mapping lives here).
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub content_source: ValueSource,
    pub site_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\ncontent_dir={} ({})\nsite_dir={} ({})\ncec_dir={}\ntemp_dir={}\ndata_dir={}\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.content_dir),
            self.content_source.as_str(),
            normalize_for_display(&self.site_dir),
            self.site_source.as_str(),
            normalize_for_display(&self.cec_dir),
            normalize_for_display(&self.temp_dir),
            normalize_for_display(&self.data_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub content_dir_exists: bool,
    pub site_dir_exists: bool,
    pub cec_dir_exists: bool,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

pub(crate) fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env)?;

    let (content_dir, content_source) = resolve_dir(
        &project_root,
        overrides.content_dir.as_deref(),
        lookup_env("CECSYNC_CONTENT_DIR"),
        "tutorials",
    );
    let (site_dir, site_source) = resolve_dir(
        &project_root,
        overrides.site_dir.as_deref(),
        lookup_env("CECSYNC_SITE_DIR"),
        "_site",
    );
    let (config_path, config_source) = resolve_dir(
        &project_root,
        overrides.config.as_deref(),
        lookup_env("CECSYNC_CONFIG"),
        ".cecsync/config.toml",
    );

    Ok(ResolvedPaths {
        cec_dir: project_root.join(CEC_DIR_NAME),
        temp_dir: project_root.join(TEMP_DIR_NAME),
        data_dir: project_root.join("_data"),
        project_root,
        content_dir,
        site_dir,
        config_path,
        root_source,
        content_source,
        site_source,
        config_source,
    })
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let project_root_exists = paths.project_root.exists();
    let content_dir_exists = paths.content_dir.exists();
    let site_dir_exists = paths.site_dir.exists();
    let cec_dir_exists = paths.cec_dir.exists();
    let config_exists = paths.config_path.exists();

    let mut warnings = Vec::new();
    if !content_dir_exists {
        warnings.push(format!(
            "content dir is missing: {}",
            normalize_for_display(&paths.content_dir)
        ));
    }
    if !site_dir_exists {
        warnings.push(
            "site output dir is missing; run the site build before deploying".to_string(),
        );
    }
    if !cec_dir_exists {
        warnings.push(format!(
            "{CEC_DIR_NAME}/ is missing; initialize the cec toolkit there before deploying"
        ));
    }
    if !config_exists {
        warnings.push(format!(
            "config file is missing, using defaults: {}",
            normalize_for_display(&paths.config_path)
        ));
    }

    Ok(RuntimeStatus {
        project_root_exists,
        content_dir_exists,
        site_dir_exists,
        cec_dir_exists,
        config_exists,
        warnings,
    })
}

pub fn ensure_runtime_ready_for_deploy(
    paths: &ResolvedPaths,
    status: &RuntimeStatus,
) -> Result<()> {
    if !status.content_dir_exists || !status.site_dir_exists || !status.cec_dir_exists {
        bail!(
            "Runtime layout is not ready for deploy.\n  - content dir {} ({})\n  - site dir {} ({})\n  - cec dir {} ({})",
            normalize_for_display(&paths.content_dir),
            flag_word(status.content_dir_exists),
            normalize_for_display(&paths.site_dir),
            flag_word(status.site_dir_exists),
            normalize_for_display(&paths.cec_dir),
            flag_word(status.cec_dir_exists),
        );
    }
    Ok(())
}

/// Deploys are gated on an explicit environment opt-in so a plain site
/// build can never touch the remote repository by accident.
pub fn deploy_enabled() -> bool {
    env_truthy(env::var("CEC_DEPLOY").ok().as_deref())
}

fn env_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(str::trim),
        Some("1") | Some("true") | Some("TRUE") | Some("True")
    )
}

/// Create the scratch dir, returning the path of a payload file inside it.
pub fn temp_payload_path(paths: &ResolvedPaths, filename: &str) -> Result<PathBuf> {
    fs::create_dir_all(&paths.temp_dir)
        .with_context(|| format!("failed to create {}", paths.temp_dir.display()))?;
    let name = filename.strip_suffix(".json").unwrap_or(filename);
    Ok(paths.temp_dir.join(format!("{name}.json")))
}

pub fn clean_temp_dir(paths: &ResolvedPaths) {
    if paths.temp_dir.exists() {
        let _ = fs::remove_dir_all(&paths.temp_dir);
    }
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> Result<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return Ok((absolutize(path, &context.cwd), ValueSource::Flag));
    }
    if let Some(value) = lookup_env("CECSYNC_PROJECT_ROOT") {
        return Ok((
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        ));
    }
    Ok((
        detect_project_root_heuristic(&context.cwd),
        ValueSource::Heuristic,
    ))
}

fn detect_project_root_heuristic(cwd: &Path) -> PathBuf {
    let mut seen = HashSet::new();
    let mut cursor = Some(cwd);
    while let Some(candidate) = cursor {
        let key = normalize_for_display(candidate);
        if seen.insert(key) && candidate.join(CEC_DIR_NAME).exists() {
            return candidate.to_path_buf();
        }
        cursor = candidate.parent();
    }
    cwd.to_path_buf()
}

fn resolve_dir(
    project_root: &Path,
    flag: Option<&Path>,
    env_value: Option<String>,
    default: &str,
) -> (PathBuf, ValueSource) {
    if let Some(path) = flag {
        return (absolutize(path, project_root), ValueSource::Flag);
    }
    if let Some(value) = env_value {
        return (
            absolutize(Path::new(value.trim()), project_root),
            ValueSource::Env,
        );
    }
    (project_root.join(default), ValueSource::Default)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub(crate) fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn flag_word(value: bool) -> &'static str {
    if value { "ok" } else { "missing" }
}
