use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::FileOptions;

/// Zip an export directory tree into `payload.zip` beside it, entry
/// names relative to the directory so the archive root starts at
/// `contentexport/`.
pub fn zip_export_dir(export_dir: &Path) -> Result<PathBuf> {
    let Some(parent) = export_dir.parent() else {
        bail!("export dir has no parent: {}", export_dir.display());
    };
    let bundle_path = parent.join("payload.zip");
    let bundle = File::create(&bundle_path)
        .with_context(|| format!("failed to create {}", bundle_path.display()))?;
    let mut writer = zip::ZipWriter::new(bundle);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(export_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        let path = entry.path();
        let relative = path.strip_prefix(export_dir).unwrap_or(path);
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = relative.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            writer
                .add_directory(name.as_str(), options)
                .with_context(|| format!("failed to add directory {name}"))?;
        } else if entry.file_type().is_file() {
            writer
                .start_file(name.as_str(), options)
                .with_context(|| format!("failed to add {name}"))?;
            let mut source = File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            io::copy(&mut source, &mut writer)
                .with_context(|| format!("failed to compress {name}"))?;
        }
    }

    writer
        .finish()
        .with_context(|| format!("failed to finish {}", bundle_path.display()))?;
    Ok(bundle_path)
}
