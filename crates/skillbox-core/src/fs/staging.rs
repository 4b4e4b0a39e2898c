//! Staged extraction directories
//!
//! Archives are unpacked into a staging directory next to the install target
//! and only moved into place once they have been scanned. A failed install
//! therefore never leaves partial output in the target directory.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{InstallError, Result};
use crate::fs::resolve::canonicalize_existing;

/// Temporary directory removed on drop unless committed.
///
/// Permission bits restored by an extractor can make staged directories
/// read-only; they are reopened for the owner before the tree is scanned,
/// committed or removed.
#[derive(Debug)]
pub struct StagingDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl StagingDir {
    /// Create a staging directory inside `parent` (created if missing).
    pub fn new_in(parent: &Path) -> Result<Self> {
        fs::create_dir_all(parent).map_err(|e| {
            InstallError::io(format!("Failed to create directory: {}", parent.display()), e)
        })?;
        let dir = tempfile::Builder::new()
            .prefix(".skillbox-staging-")
            .tempdir_in(parent)
            .map_err(|e| {
                InstallError::io(
                    format!("Failed to create staging directory in {}", parent.display()),
                    e,
                )
            })?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Give the owner read, write and search access to every staged
    /// directory, and read and write access to every staged file.
    ///
    /// Links are never followed.
    pub fn make_owner_writable(&self) -> Result<()> {
        reopen_tree(&self.path)
    }

    /// Move every staged file into `target`, replacing same-named files.
    ///
    /// Returns the number of files moved. Directories are merged. Conflicts
    /// (a file where a directory is staged, or the reverse, or a directory
    /// resolving outside `target`) are detected for the whole tree before the
    /// first file is moved.
    pub fn commit(mut self, target: &Path) -> Result<usize> {
        self.make_owner_writable()?;
        fs::create_dir_all(target).map_err(|e| {
            InstallError::io(format!("Failed to create directory: {}", target.display()), e)
        })?;
        let real_target = canonicalize_existing(target)
            .map_err(|e| InstallError::io(format!("Failed to resolve {}", target.display()), e))?;

        check_dir(&self.path, &real_target, &real_target)?;

        let mut moved = 0;
        commit_dir(&self.path, &real_target, &real_target, &mut moved)?;
        tracing::debug!(files = moved, target = %real_target.display(), "Committed staged files");

        if let Some(dir) = self.dir.take() {
            close(dir);
        }
        Ok(moved)
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = reopen_tree(dir.path()) {
                tracing::warn!(path = %dir.path().display(), error = %e, "Failed to reopen staging permissions");
            }
            close(dir);
        }
    }
}

fn close(dir: TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove staging directory");
    }
}

fn read_sorted(dir: &Path) -> Result<Vec<fs::DirEntry>> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| InstallError::io(format!("Failed to read directory: {}", dir.display()), e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| InstallError::io(format!("Failed to read directory: {}", dir.display()), e))?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

#[cfg(unix)]
fn add_mode(path: &Path, bits: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let meta = fs::symlink_metadata(path)
        .map_err(|e| InstallError::io(format!("Failed to stat {}", path.display()), e))?;
    let mode = meta.permissions().mode();
    if mode & bits != bits {
        fs::set_permissions(path, fs::Permissions::from_mode(mode | bits)).map_err(|e| {
            InstallError::io(format!("Failed to set permissions on {}", path.display()), e)
        })?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn add_mode(path: &Path, _bits: u32) -> Result<()> {
    let mut perms = fs::symlink_metadata(path)
        .map_err(|e| InstallError::io(format!("Failed to stat {}", path.display()), e))?
        .permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        fs::set_permissions(path, perms).map_err(|e| {
            InstallError::io(format!("Failed to set permissions on {}", path.display()), e)
        })?;
    }
    Ok(())
}

fn reopen_tree(dir: &Path) -> Result<()> {
    add_mode(dir, 0o700)?;
    for entry in read_sorted(dir)? {
        let path = entry.path();
        let ty = entry
            .file_type()
            .map_err(|e| InstallError::io(format!("Failed to stat {}", path.display()), e))?;
        if ty.is_dir() {
            reopen_tree(&path)?;
        } else if ty.is_file() {
            add_mode(&path, 0o600)?;
        }
    }
    Ok(())
}

/// Verify the staged tree can be merged into `dst` without touching it.
fn check_dir(src: &Path, dst: &Path, root: &Path) -> Result<()> {
    for entry in read_sorted(src)? {
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let ty = entry
            .file_type()
            .map_err(|e| InstallError::io(format!("Failed to stat {}", from.display()), e))?;
        let existing = fs::symlink_metadata(&to).ok();

        if ty.is_dir() {
            match &existing {
                None => {}
                Some(meta) if meta.is_dir() => {}
                Some(meta) if meta.file_type().is_symlink() => {
                    ensure_inside(&to, root)?;
                    if !to.is_dir() {
                        return Err(conflict("Cannot replace file with directory", &to));
                    }
                }
                Some(_) => return Err(conflict("Cannot replace file with directory", &to)),
            }
            if existing.is_some() {
                check_dir(&from, &to, root)?;
            }
        } else if ty.is_file() {
            if existing.is_some_and(|meta| meta.is_dir()) {
                return Err(conflict("Cannot replace directory with file", &to));
            }
        } else {
            // Staged trees are produced by our own extractors and never hold links.
            return Err(InstallError::Archive(format!(
                "unexpected non-regular file in staging area: {}",
                from.display()
            )));
        }
    }
    Ok(())
}

fn conflict(what: &str, path: &Path) -> InstallError {
    InstallError::io(
        format!("{what}: {}", path.display()),
        std::io::Error::from(std::io::ErrorKind::AlreadyExists),
    )
}

fn commit_dir(src: &Path, dst: &Path, root: &Path, moved: &mut usize) -> Result<()> {
    for entry in read_sorted(src)? {
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let ty = entry
            .file_type()
            .map_err(|e| InstallError::io(format!("Failed to stat {}", from.display()), e))?;

        if ty.is_dir() {
            fs::create_dir_all(&to).map_err(|e| {
                InstallError::io(format!("Failed to create directory: {}", to.display()), e)
            })?;
            ensure_inside(&to, root)?;
            commit_dir(&from, &to, root, moved)?;
        } else if ty.is_file() {
            move_file(&from, &to)?;
            *moved += 1;
        }
    }

    Ok(())
}

fn ensure_inside(dir: &Path, root: &Path) -> Result<()> {
    let real = dir
        .canonicalize()
        .map_err(|e| InstallError::io(format!("Failed to resolve {}", dir.display()), e))?;
    if !real.starts_with(root) {
        return Err(InstallError::TargetTraversal {
            target: dir.to_path_buf(),
        });
    }
    Ok(())
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    // Cross-device staging falls back to copy + remove.
    let tmp: PathBuf = to.with_extension("skillbox-partial");
    fs::copy(from, &tmp)
        .map_err(|e| InstallError::io(format!("Failed to copy file: {}", to.display()), e))?;
    fs::rename(&tmp, to)
        .map_err(|e| InstallError::io(format!("Failed to move file: {}", to.display()), e))?;
    if let Err(e) = fs::remove_file(from) {
        tracing::warn!(path = %from.display(), error = %e, "Failed to remove staged file after copy");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_moves_nested_files_and_overwrites() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("hello.txt"), "old").unwrap();
        std::fs::write(target.join("keep.txt"), "kept").unwrap();

        let staging = StagingDir::new_in(temp.path()).unwrap();
        std::fs::create_dir_all(staging.path().join("bin")).unwrap();
        std::fs::write(staging.path().join("hello.txt"), "new").unwrap();
        std::fs::write(staging.path().join("bin").join("tool"), "#!").unwrap();
        let staging_path = staging.path().to_path_buf();

        let moved = staging.commit(&target).unwrap();

        assert_eq!(moved, 2);
        assert_eq!(std::fs::read_to_string(target.join("hello.txt")).unwrap(), "new");
        assert_eq!(std::fs::read_to_string(target.join("keep.txt")).unwrap(), "kept");
        assert!(target.join("bin").join("tool").exists());
        assert!(!staging_path.exists(), "staging dir should be removed");
    }

    #[test]
    fn dropped_staging_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let staging = StagingDir::new_in(temp.path()).unwrap();
        std::fs::write(staging.path().join("file"), "x").unwrap();
        let path = staging.path().to_path_buf();

        drop(staging);

        assert!(!path.exists());
    }

    #[test]
    fn conflicting_entry_aborts_before_any_file_moves() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("a.txt"), "old").unwrap();
        std::fs::write(target.join("b"), "plain file").unwrap();

        let staging = StagingDir::new_in(temp.path()).unwrap();
        std::fs::write(staging.path().join("a.txt"), "new").unwrap();
        std::fs::create_dir_all(staging.path().join("b")).unwrap();
        std::fs::write(staging.path().join("b").join("c.txt"), "c").unwrap();
        let staging_path = staging.path().to_path_buf();

        let err = staging.commit(&target).unwrap_err();

        assert!(err.to_string().contains("Cannot replace file with directory"));
        assert_eq!(std::fs::read_to_string(target.join("a.txt")).unwrap(), "old");
        assert_eq!(std::fs::read_to_string(target.join("b")).unwrap(), "plain file");
        assert!(!staging_path.exists());
    }

    #[test]
    fn nested_conflict_is_found_before_top_level_moves() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        std::fs::create_dir_all(target.join("lib").join("x")).unwrap();
        std::fs::write(target.join("a.txt"), "old").unwrap();

        let staging = StagingDir::new_in(temp.path()).unwrap();
        std::fs::write(staging.path().join("a.txt"), "new").unwrap();
        std::fs::create_dir_all(staging.path().join("lib")).unwrap();
        std::fs::write(staging.path().join("lib").join("x"), "file over dir").unwrap();

        assert!(staging.commit(&target).is_err());
        assert_eq!(std::fs::read_to_string(target.join("a.txt")).unwrap(), "old");
    }

    #[cfg(unix)]
    #[test]
    fn read_only_staged_directory_is_removed_on_drop() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let staging = StagingDir::new_in(temp.path()).unwrap();
        let lib = staging.path().join("lib");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::write(lib.join("a.sh"), "echo a").unwrap();
        std::fs::set_permissions(lib.join("a.sh"), std::fs::Permissions::from_mode(0o000)).unwrap();
        std::fs::set_permissions(&lib, std::fs::Permissions::from_mode(0o555)).unwrap();
        let path = staging.path().to_path_buf();

        drop(staging);

        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn read_only_staged_directory_commits_and_leaves_no_staging() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let staging = StagingDir::new_in(temp.path()).unwrap();
        let lib = staging.path().join("lib");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::write(lib.join("a.sh"), "echo a").unwrap();
        std::fs::set_permissions(&lib, std::fs::Permissions::from_mode(0o555)).unwrap();
        std::fs::set_permissions(staging.path(), std::fs::Permissions::from_mode(0o555))
            .unwrap();

        let moved = staging.commit(&target).unwrap();

        assert_eq!(moved, 1);
        assert!(target.join("lib").join("a.sh").is_file());
        let left: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(left, vec!["target"]);
    }

    #[cfg(unix)]
    #[test]
    fn make_owner_writable_reopens_files_for_reading() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let staging = StagingDir::new_in(temp.path()).unwrap();
        let file = staging.path().join("secret");
        std::fs::write(&file, "x").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o000)).unwrap();

        staging.make_owner_writable().unwrap();

        let mode = std::fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o600, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn commit_refuses_symlinked_directory_in_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, target.join("bin")).unwrap();

        let staging = StagingDir::new_in(temp.path()).unwrap();
        std::fs::create_dir_all(staging.path().join("bin")).unwrap();
        std::fs::write(staging.path().join("bin").join("tool"), "x").unwrap();

        let err = staging.commit(&target).unwrap_err();
        assert!(matches!(err, InstallError::TargetTraversal { .. }));
        assert!(!outside.join("tool").exists());
    }
}
