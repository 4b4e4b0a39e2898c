//! Install target resolution
//!
//! Confines a manifest's `target_dir` to the per-skill tools root. The check
//! is lexical first, then repeated after resolving symlinks in whichever
//! ancestors already exist, since a path that is lexically inside the root
//! can still leave it through a symlinked parent.

use std::path::{Component, Path, PathBuf};

use crate::error::{InstallError, Result};

/// An install directory proven to live inside its allowed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub absolute_path: PathBuf,
    pub allowed_root: PathBuf,
}

impl ResolvedTarget {
    /// Path of the target relative to its root (empty when they are equal).
    pub fn relative_path(&self) -> &Path {
        self.absolute_path
            .strip_prefix(&self.allowed_root)
            .unwrap_or_else(|_| Path::new(""))
    }
}

/// Resolve `candidate` against `allowed_root`.
///
/// Relative candidates are joined to the root. Fails with
/// [`InstallError::TargetTraversal`] when the result is neither the root nor
/// one of its descendants.
pub fn resolve_target(candidate: &Path, allowed_root: &Path) -> Result<ResolvedTarget> {
    let refuse = || InstallError::TargetTraversal {
        target: candidate.to_path_buf(),
    };

    let root = normalize_path(allowed_root);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let lexical = normalize_path(&joined);
    if !lexical.starts_with(&root) {
        return Err(refuse());
    }

    let real_root = canonicalize_existing(&root)
        .map_err(|e| InstallError::io(format!("Failed to resolve {}", root.display()), e))?;
    let real_target = canonicalize_existing(&lexical)
        .map_err(|e| InstallError::io(format!("Failed to resolve {}", lexical.display()), e))?;
    if !real_target.starts_with(&real_root) {
        return Err(refuse());
    }

    Ok(ResolvedTarget {
        absolute_path: real_target,
        allowed_root: real_root,
    })
}

/// Lexically normalize a path by resolving `.` and `..` components without filesystem access.
///
/// Unlike `canonicalize()`, this doesn't require the path to exist and doesn't follow symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                // Never pop past the root or a prefix.
                match components.last() {
                    Some(Component::Normal(_)) => {
                        components.pop();
                    }
                    Some(Component::RootDir | Component::Prefix(_)) => {}
                    _ => components.push(component),
                }
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }

    components.iter().collect()
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// components that do not exist yet.
///
/// The input must already be lexically normalized so the re-appended tail
/// contains no `..`.
pub fn canonicalize_existing(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();

    loop {
        match existing.canonicalize() {
            Ok(real) => {
                let mut resolved = real;
                for part in tail.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                    return Err(err);
                };
                tail.push(name);
                if !existing.pop() {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}
