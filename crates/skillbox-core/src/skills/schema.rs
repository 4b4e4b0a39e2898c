//! SKILL.toml schema

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::archive::ArchiveKind;
use crate::error::{InstallError, Result};

/// Parsed `SKILL.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillManifest {
    pub skill: SkillInfo,

    /// Downloadable install sources, selected by `id`.
    #[serde(default)]
    pub install: Vec<InstallSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillInfo {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub version: Option<String>,
}

/// One install source. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallSpec {
    pub id: String,

    pub url: String,

    /// Container format; inferred from the URL when omitted.
    #[serde(default)]
    pub archive: Option<ArchiveKind>,

    /// Leading path segments removed from every archive entry.
    #[serde(default)]
    pub strip_components: u32,

    /// Relative to the skill's tools directory, or absolute inside it.
    /// Defaults to the tools directory itself.
    #[serde(default)]
    pub target_dir: Option<PathBuf>,

    /// Expected BLAKE3 digest of the download, hex encoded.
    #[serde(default)]
    pub blake3: Option<String>,
}

impl InstallSpec {
    pub fn archive_kind(&self) -> ArchiveKind {
        self.archive
            .unwrap_or_else(|| ArchiveKind::from_url(&self.url))
    }

    pub fn target_dir(&self) -> PathBuf {
        self.target_dir.clone().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(InstallError::Manifest(
                "install entry has an empty id".to_string(),
            ));
        }
        url::Url::parse(&self.url).map_err(|e| {
            InstallError::Manifest(format!("install '{}' has an invalid url: {e}", self.id))
        })?;
        if let Some(digest) = &self.blake3 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(InstallError::Manifest(format!(
                    "install '{}' has a malformed blake3 digest",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

impl SkillManifest {
    pub fn validate(&self) -> Result<()> {
        if self.skill.name.trim().is_empty() {
            return Err(InstallError::Manifest("[skill] name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for spec in &self.install {
            spec.validate()?;
            if !seen.insert(spec.id.as_str()) {
                return Err(InstallError::Manifest(format!(
                    "duplicate install id '{}'",
                    spec.id
                )));
            }
        }
        Ok(())
    }

    pub fn find_install(&self, id: &str) -> Option<&InstallSpec> {
        self.install.iter().find(|spec| spec.id == id)
    }
}
