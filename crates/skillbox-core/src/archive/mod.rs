//! Archive preflight and extraction
//!
//! Every archive goes through the same three steps: list the entries into
//! [`ArchiveEntry`] values without writing anything, run the whole list
//! through the traversal [`guard`], and only then extract the validated plan.

pub mod guard;
pub mod tar;
pub mod zip;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use guard::{PlannedEntry, validate_entries};

/// Archive container formats accepted in install manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveKind {
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "tar.gz", alias = "tgz")]
    TarGz,
    #[serde(rename = "tar.bz2", alias = "tbz2", alias = "tbz")]
    TarBz2,
    /// The download is installed as-is.
    #[serde(rename = "none")]
    None,
}

impl ArchiveKind {
    /// Infer the format from the file name at the end of a URL.
    ///
    /// Query strings and fragments are ignored. Unknown extensions mean
    /// [`ArchiveKind::None`].
    pub fn from_url(url: &str) -> Self {
        let file_name = url_file_name(url).to_ascii_lowercase();

        if file_name.ends_with(".zip") {
            Self::Zip
        } else if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
            Self::TarGz
        } else if file_name.ends_with(".tar.bz2")
            || file_name.ends_with(".tbz2")
            || file_name.ends_with(".tbz")
        {
            Self::TarBz2
        } else {
            Self::None
        }
    }

    /// Whether the format is handled by the external `tar` tool.
    pub fn is_tar(self) -> bool {
        matches!(self, Self::TarGz | Self::TarBz2)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
            Self::TarBz2 => "tar.bz2",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "tar.gz" | "tgz" => Ok(Self::TarGz),
            "tar.bz2" | "tbz2" | "tbz" => Ok(Self::TarBz2),
            "none" => Ok(Self::None),
            other => Err(format!(
                "unknown archive kind '{other}' (expected zip, tar.gz, tar.bz2 or none)"
            )),
        }
    }
}

/// Last path segment of a URL, without query string or fragment.
pub fn url_file_name(url: &str) -> &str {
    let path = url
        .split('?')
        .next()
        .and_then(|s| s.split('#').next())
        .unwrap_or(url);

    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    /// Symbolic or hard link. Never extracted.
    Symlink,
}

/// One archive member, independent of the container format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    /// Name as stored in the archive, with `\` normalized to `/`.
    pub raw_path: String,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

impl ArchiveEntry {
    pub fn file(raw_path: impl Into<String>) -> Self {
        Self {
            raw_path: raw_path.into(),
            kind: EntryKind::File,
            link_target: None,
        }
    }

    pub fn directory(raw_path: impl Into<String>) -> Self {
        Self {
            raw_path: raw_path.into(),
            kind: EntryKind::Directory,
            link_target: None,
        }
    }

    pub fn symlink(raw_path: impl Into<String>, link_target: Option<String>) -> Self {
        Self {
            raw_path: raw_path.into(),
            kind: EntryKind::Symlink,
            link_target,
        }
    }
}

/// Upper bounds applied while listing an archive.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_entries: usize,
    pub max_unpacked_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_unpacked_bytes: 1024 * 1024 * 1024,
        }
    }
}
