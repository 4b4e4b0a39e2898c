//! Install pipeline errors
//!
//! Every variant is terminal for the install attempt that produced it.
//! Messages name the failure category and, for archive entries, the entry
//! index; they never echo attacker-controlled entry paths.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::fetch::FetchError;
use crate::scan::Severity;

/// Why an archive entry was refused by the traversal guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalReason {
    /// A `..` segment survived component stripping.
    ParentSegment,
    /// The joined path leaves the extraction root.
    EscapesRoot,
    /// A file entry with no path segments at all.
    EmptyPath,
    /// The entry name contains a NUL byte.
    NulByte,
    /// A Windows drive prefix such as `C:`.
    DrivePrefix,
}

impl fmt::Display for TraversalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ParentSegment => "parent directory segment",
            Self::EscapesRoot => "path escapes the target directory",
            Self::EmptyPath => "empty entry path",
            Self::NulByte => "NUL byte in entry name",
            Self::DrivePrefix => "drive-qualified entry path",
        };
        f.write_str(text)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("refusing to install outside the skill tools directory: {target}")]
    TargetTraversal { target: PathBuf },

    #[error("invalid skill name '{name}': must be a single path segment")]
    InvalidSkillName { name: String },

    #[error("archive entry #{index} rejected ({reason})")]
    ArchiveTraversal { index: usize, reason: TraversalReason },

    #[error("archive entry #{index} rejected (links are not allowed in skill archives)")]
    SymlinkRejected { index: usize },

    #[error("download failed: {0}")]
    Download(#[from] FetchError),

    #[error("downloaded archive digest mismatch (expected {expected}, got {actual})")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("`{command}` failed: {reason}")]
    ExtractionTool { command: String, reason: String },

    #[error("invalid archive: {0}")]
    Archive(String),

    #[error(
        "security scan blocked install ({critical} critical, {warn} warning findings; blocking at {threshold})"
    )]
    ScanRejected {
        critical: usize,
        warn: usize,
        threshold: Severity,
    },

    #[error("skill manifest error: {0}")]
    Manifest(String),

    #[error("skill '{skill}' declares no install source '{id}'")]
    InstallNotFound { skill: String, id: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl InstallError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Short category tag used in structured log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::TargetTraversal { .. } | Self::InvalidSkillName { .. } => "target",
            Self::ArchiveTraversal { .. } => "traversal",
            Self::SymlinkRejected { .. } => "symlink",
            Self::Download(_) => "download",
            Self::IntegrityMismatch { .. } => "integrity",
            Self::ExtractionTool { .. } => "extraction",
            Self::Archive(_) => "archive",
            Self::ScanRejected { .. } => "scan",
            Self::Manifest(_) | Self::InstallNotFound { .. } => "manifest",
            Self::Io { .. } => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;
