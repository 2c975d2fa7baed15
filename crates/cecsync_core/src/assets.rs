use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, warn};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::manifest::group_ids_for_type;
use crate::toolkit::{ContentApi, ContentExport, slug_or_query};

/// One local image queued for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSync {
    pub src: String,
    pub file: PathBuf,
    pub alt: String,
    pub slug: String,
}

/// An image that exists remotely after reconciliation, either reused
/// or freshly uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedImage {
    pub src: String,
    pub slug: String,
    pub id: String,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub synced: Vec<SyncedImage>,
    pub reused: usize,
    pub uploaded: usize,
    pub errors: Vec<String>,
}

/// Bring every referenced image into the remote asset store. Assets
/// that already exist under their slug are reused; the rest are
/// uploaded one at a time. Each input image ends in exactly one
/// bucket: synced or errors. An empty input returns without touching
/// the remote at all.
pub fn reconcile_images(
    api: &mut dyn ContentApi,
    images: &[ImageSync],
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    if images.is_empty() {
        return Ok(report);
    }

    let slugs: Vec<&str> = images.iter().map(|image| image.slug.as_str()).collect();
    let export = api.download_by_query(&slug_or_query(&slugs))?;

    let mut outcomes: Vec<Option<SyncedImage>> = vec![None; images.len()];
    if let Some(export) = &export {
        match_downloaded_assets(export, images, &mut outcomes)?;
    }

    for (image, outcome) in images.iter().zip(outcomes.iter_mut()) {
        if outcome.is_some() {
            report.reused += 1;
            continue;
        }
        match api.create_image_asset(&image.file, &image.alt, &image.slug) {
            Ok(asset) => {
                debug!("uploaded {} as {}", image.file.display(), asset.id);
                report.uploaded += 1;
                *outcome = Some(SyncedImage {
                    src: image.src.clone(),
                    slug: asset.slug,
                    id: asset.id,
                });
            }
            Err(error) => {
                report
                    .errors
                    .push(format!("image {} ({}): {error:#}", image.slug, image.src));
            }
        }
    }

    report.synced = outcomes.into_iter().flatten().collect();
    Ok(report)
}

/// Match downloaded assets to local images by file name and record the
/// existing ids. Downloaded bytes differing from the local file is a
/// warning, not an error: the remote copy stays authoritative.
fn match_downloaded_assets(
    export: &ContentExport,
    images: &[ImageSync],
    outcomes: &mut [Option<SyncedImage>],
) -> Result<()> {
    let metadata_path = export.metadata_path();
    let raw = fs::read_to_string(&metadata_path)
        .with_context(|| format!("failed to read {}", metadata_path.display()))?;
    let manifest: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid manifest JSON in {}", metadata_path.display()))?;

    for id in group_ids_for_type(&manifest, "ImageAsset") {
        let files_dir = export.item_files_dir("ImageAsset", &id);
        let Some(downloaded) = first_file_in(&files_dir) else {
            warn!("asset {id} has no downloaded file under {}", files_dir.display());
            continue;
        };
        let name = downloaded.file_name();

        let matched = images.iter().enumerate().find(|(index, image)| {
            outcomes[*index].is_none() && image.file.file_name() == name
        });
        let Some((index, image)) = matched else {
            continue;
        };

        if files_differ(&downloaded, &image.file)? {
            warn!(
                "remote asset {id} differs from local {}; keeping the remote copy",
                image.file.display()
            );
        }
        outcomes[index] = Some(SyncedImage {
            src: image.src.clone(),
            slug: image.slug.clone(),
            id,
        });
    }
    Ok(())
}

fn first_file_in(dir: &Path) -> Option<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files.into_iter().next()
}

fn files_differ(a: &Path, b: &Path) -> Result<bool> {
    Ok(sha256_of(a)? != sha256_of(b)?)
}

fn sha256_of(path: &Path) -> Result<[u8; 32]> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hasher.finalize().into())
}
