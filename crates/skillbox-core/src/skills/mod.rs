//! Skill manifests
//!
//! A skill lives at `<workspace>/skills/<name>/SKILL.toml` and declares the
//! archives that can be installed for it.

pub mod schema;

use std::path::{Component, Path, PathBuf};

use crate::config::parser::enhance_toml_error;
use crate::error::{InstallError, Result};

pub use schema::{InstallSpec, SkillInfo, SkillManifest};

pub const SKILL_MANIFEST: &str = "SKILL.toml";

/// Reject names that are not exactly one normal path segment.
pub fn validate_skill_name(name: &str) -> Result<()> {
    let invalid = || InstallError::InvalidSkillName {
        name: name.to_string(),
    };

    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

/// Directory holding the skill's manifest.
pub fn skill_dir(workspace_dir: &Path, name: &str) -> Result<PathBuf> {
    validate_skill_name(name)?;
    Ok(workspace_dir.join("skills").join(name))
}

/// Parse a manifest from TOML text.
pub fn parse_manifest_str(content: &str) -> Result<SkillManifest> {
    let manifest: SkillManifest = toml::from_str(content)
        .map_err(|e| InstallError::Manifest(enhance_toml_error(e, content).to_string()))?;
    manifest.validate()?;
    Ok(manifest)
}

/// Load `<workspace>/skills/<name>/SKILL.toml`.
pub fn load_manifest(workspace_dir: &Path, name: &str) -> Result<SkillManifest> {
    let path = skill_dir(workspace_dir, name)?.join(SKILL_MANIFEST);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        InstallError::io(format!("Failed to read skill manifest: {}", path.display()), e)
    })?;

    let manifest = parse_manifest_str(&content)?;
    if manifest.skill.name != name {
        tracing::warn!(
            dir = name,
            declared = %manifest.skill.name,
            "Skill directory name differs from manifest name"
        );
    }
    Ok(manifest)
}
