//! Traversal guard
//!
//! Decides, for the complete entry list of one archive, where each entry
//! would land after `strip_components` is applied. A single unsafe entry
//! rejects the whole archive; nothing is extracted piecemeal.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{InstallError, Result, TraversalReason};
use crate::fs::normalize_path;

use super::{ArchiveEntry, EntryKind};

/// An entry that passed validation, with its output path relative to the
/// extraction root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedEntry {
    /// Position of the entry in the listing it came from.
    pub index: usize,
    pub relative_path: PathBuf,
    pub kind: EntryKind,
}

/// Validate every entry against `root`.
///
/// Entries whose path is consumed entirely by stripping are dropped from the
/// returned plan. Any link, `..` segment or escaping path fails the call.
pub fn validate_entries(
    entries: &[ArchiveEntry],
    strip_components: usize,
    root: &Path,
) -> Result<Vec<PlannedEntry>> {
    let root = normalize_path(root);
    let mut plan = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        if entry.kind == EntryKind::Symlink {
            tracing::warn!(index, path = ?entry.raw_path, "Archive contains a link entry");
            return Err(InstallError::SymlinkRejected { index });
        }

        match plan_entry(entry, strip_components, &root) {
            Ok(Some(relative_path)) => plan.push(PlannedEntry {
                index,
                relative_path,
                kind: entry.kind,
            }),
            Ok(None) => {
                tracing::debug!(index, path = ?entry.raw_path, "Entry consumed by strip_components");
            }
            Err(reason) => {
                tracing::warn!(index, path = ?entry.raw_path, %reason, "Archive entry rejected");
                return Err(InstallError::ArchiveTraversal { index, reason });
            }
        }
    }

    Ok(plan)
}

/// Compute the stripped relative path for one entry.
///
/// `Ok(None)` means the entry is a no-op.
fn plan_entry(
    entry: &ArchiveEntry,
    strip_components: usize,
    root: &Path,
) -> std::result::Result<Option<PathBuf>, TraversalReason> {
    let raw = entry.raw_path.as_str();
    if raw.contains('\0') {
        return Err(TraversalReason::NulByte);
    }

    let segments: Vec<&str> = raw.split('/').skip_while(|s| s.is_empty()).collect();

    if segments.first().is_some_and(|first| is_drive_prefix(first)) {
        return Err(TraversalReason::DrivePrefix);
    }

    let has_segments = segments.iter().any(|s| !s.is_empty() && *s != ".");
    if !has_segments {
        return match entry.kind {
            EntryKind::Directory => Ok(None),
            _ => Err(TraversalReason::EmptyPath),
        };
    }

    if segments.len() <= strip_components {
        return Ok(None);
    }
    let remaining = &segments[strip_components..];

    if remaining.iter().any(|s| *s == "..") {
        return Err(TraversalReason::ParentSegment);
    }

    let relative: PathBuf = remaining
        .iter()
        .filter(|s| !s.is_empty() && **s != ".")
        .collect();
    if relative.as_os_str().is_empty() {
        return Ok(None);
    }

    let resolved = normalize_path(&root.join(&relative));
    if resolved == root || !resolved.starts_with(root) {
        return Err(TraversalReason::EscapesRoot);
    }

    Ok(Some(relative))
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
