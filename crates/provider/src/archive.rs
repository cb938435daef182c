//! Workspace archiving.
//!
//! The bootstrap packs the working tree's relevant entries into a zip
//! archive that every remote job fetches as its source. Compression
//! runs on the blocking pool; the async caller only awaits it.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::CompressionMethod;

/// Errors while building the workspace archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Filesystem access failed.
    #[error("Archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The zip writer rejected an entry.
    #[error("Archive write error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The blocking archiving task was cancelled or panicked.
    #[error("Archive task failed: {0}")]
    Task(String),
}

/// Pack `entries` (paths relative to `workdir`) into a uniquely named
/// zip in the system temp directory.
///
/// Directory entries are recursed; entries missing from this checkout
/// are skipped with a warning, since working trees differ across
/// branches. Returns the path of the finished archive.
pub async fn create_workspace_archive(
    workdir: &Path,
    entries: &[String],
    project_name: &str,
) -> Result<PathBuf, ArchiveError> {
    let dest = std::env::temp_dir().join(format!("{project_name}-{}.zip", uuid::Uuid::new_v4()));
    let workdir = workdir.to_path_buf();
    let entries = entries.to_vec();
    let dest_clone = dest.clone();

    tokio::task::spawn_blocking(move || write_archive(&workdir, &entries, &dest_clone))
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))??;

    tracing::info!(archive = %dest.display(), "Workspace archive created");
    Ok(dest)
}

/// Synchronous zip construction; runs on the blocking pool.
fn write_archive(workdir: &Path, entries: &[String], dest: &Path) -> Result<(), ArchiveError> {
    let file = std::fs::File::create(dest)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        let src = workdir.join(entry);
        if !src.exists() {
            tracing::warn!(entry, "Archive entry missing from working tree, skipping");
            continue;
        }

        if src.is_dir() {
            for item in WalkDir::new(&src) {
                let item = item.map_err(std::io::Error::from)?;
                let rel = item
                    .path()
                    .strip_prefix(workdir)
                    .map_err(|e| ArchiveError::Task(e.to_string()))?;
                if item.file_type().is_dir() {
                    writer.add_directory(zip_entry_name(rel), options)?;
                } else if item.file_type().is_file() {
                    writer.start_file(zip_entry_name(rel), options)?;
                    copy_into(item.path(), &mut writer)?;
                }
                // Symlinks and other special files are not archived.
            }
        } else {
            writer.start_file(entry.replace('\\', "/"), options)?;
            copy_into(&src, &mut writer)?;
        }
    }

    writer.finish()?;
    Ok(())
}

/// Zip entry names always use forward slashes.
fn zip_entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn copy_into<W: Write>(src: &Path, writer: &mut W) -> Result<(), ArchiveError> {
    let mut file = std::fs::File::open(src)?;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
    }
    Ok(())
}
