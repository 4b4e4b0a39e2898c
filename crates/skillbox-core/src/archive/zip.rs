//! Zip listing and extraction
//!
//! Zip archives are decoded in-process. Listing reads only the central
//! directory; extraction writes the validated plan into a destination that
//! is checked again right before every file is created.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use ::zip::ZipArchive;
use ::zip::result::ZipError;

use crate::error::{InstallError, Result};
use crate::fs::canonicalize_existing;

use super::{ArchiveEntry, ArchiveLimits, EntryKind, PlannedEntry};

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

/// Link targets longer than this are not read back during listing.
const MAX_LINK_TARGET_BYTES: u64 = 4096;

fn open(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(path)
        .map_err(|e| InstallError::io(format!("Failed to open archive: {}", path.display()), e))?;
    ZipArchive::new(BufReader::new(file)).map_err(zip_error)
}

fn zip_error(err: ZipError) -> InstallError {
    InstallError::Archive(format!("failed to read zip archive: {err}"))
}

/// Enumerate the entries of a zip archive without extracting anything.
pub fn list_zip(path: &Path, limits: &ArchiveLimits) -> Result<Vec<ArchiveEntry>> {
    let mut archive = open(path)?;

    if archive.len() > limits.max_entries {
        return Err(InstallError::Archive(format!(
            "zip has too many entries ({}); maximum allowed is {}",
            archive.len(),
            limits.max_entries
        )));
    }

    let mut entries = Vec::with_capacity(archive.len());
    let mut total: u64 = 0;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(zip_error)?;
        let raw_path = file.name().replace('\\', "/");

        total = total.saturating_add(file.size());
        if total > limits.max_unpacked_bytes {
            return Err(InstallError::Archive(format!(
                "zip unpacked size exceeds limit ({} bytes)",
                limits.max_unpacked_bytes
            )));
        }

        let is_link = file
            .unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK);

        let entry = if is_link {
            let mut target = String::new();
            let link_target = if file.size() <= MAX_LINK_TARGET_BYTES {
                file.read_to_string(&mut target).ok().map(|_| target)
            } else {
                None
            };
            ArchiveEntry::symlink(raw_path, link_target)
        } else if file.is_dir() || raw_path.ends_with('/') {
            ArchiveEntry::directory(raw_path)
        } else {
            ArchiveEntry::file(raw_path)
        };
        entries.push(entry);
    }

    Ok(entries)
}

/// Extract the validated `plan` from the zip at `path` into `dest`.
///
/// Returns the number of files written. File contents are copied as stored;
/// permission bits from the archive are not applied. Decompressed bytes are
/// counted against `limits.max_unpacked_bytes` as they are written, since the
/// sizes declared in the archive headers are not trusted.
pub fn extract_zip(
    path: &Path,
    plan: &[PlannedEntry],
    dest: &Path,
    limits: &ArchiveLimits,
) -> Result<usize> {
    let mut archive = open(path)?;
    std::fs::create_dir_all(dest).map_err(|e| {
        InstallError::io(format!("Failed to create directory: {}", dest.display()), e)
    })?;
    let real_dest = canonicalize_existing(dest)
        .map_err(|e| InstallError::io(format!("Failed to resolve {}", dest.display()), e))?;

    let mut written = 0;
    let mut remaining = limits.max_unpacked_bytes;
    for planned in plan {
        let outpath = real_dest.join(&planned.relative_path);

        if planned.kind == EntryKind::Directory {
            std::fs::create_dir_all(&outpath).map_err(|e| {
                InstallError::io(format!("Failed to create directory: {}", outpath.display()), e)
            })?;
            ensure_within(&outpath, &real_dest, planned.index)?;
            continue;
        }

        let parent = outpath.parent().unwrap_or(&real_dest);
        std::fs::create_dir_all(parent).map_err(|e| {
            InstallError::io(
                format!("Failed to create parent directory: {}", parent.display()),
                e,
            )
        })?;
        ensure_within(parent, &real_dest, planned.index)?;

        let mut file = archive.by_index(planned.index).map_err(zip_error)?;
        // Replace rather than write through anything already at the path.
        if std::fs::symlink_metadata(&outpath).is_ok_and(|m| m.file_type().is_symlink()) {
            std::fs::remove_file(&outpath).map_err(|e| {
                InstallError::io(format!("Failed to replace {}", outpath.display()), e)
            })?;
        }
        let mut outfile = File::create(&outpath).map_err(|e| {
            InstallError::io(format!("Failed to create file: {}", outpath.display()), e)
        })?;
        let mut bounded = file.by_ref().take(remaining.saturating_add(1));
        let copied = std::io::copy(&mut bounded, &mut outfile).map_err(|e| {
            InstallError::io(format!("Failed to write file: {}", outpath.display()), e)
        })?;
        if copied > remaining {
            tracing::warn!(index = planned.index, "Zip entry exceeds unpacked size budget");
            return Err(InstallError::Archive(format!(
                "zip unpacked size exceeds limit ({} bytes)",
                limits.max_unpacked_bytes
            )));
        }
        remaining -= copied;
        written += 1;
    }

    Ok(written)
}

fn ensure_within(dir: &Path, root: &Path, index: usize) -> Result<()> {
    let real = dir
        .canonicalize()
        .map_err(|e| InstallError::io(format!("Failed to resolve {}", dir.display()), e))?;
    if real.starts_with(root) {
        Ok(())
    } else {
        Err(InstallError::ArchiveTraversal {
            index,
            reason: crate::error::TraversalReason::EscapesRoot,
        })
    }
}
