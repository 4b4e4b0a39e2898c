//! skillbox.toml loading
//!
//! The config file is optional. Lookup order: an explicit path, then
//! `<config_dir>/skillbox/skillbox.toml`, then built-in defaults.

pub mod parser;
pub mod schema;

use std::path::{Path, PathBuf};

pub use parser::{parse_skillbox_toml, parse_skillbox_toml_str, to_toml};
pub use schema::{FetchSettings, InstallSettings, ScanSettings, SkillboxConfig};

pub const CONFIG_FILE_NAME: &str = "skillbox.toml";

/// Location of the user-level config file, if a config dir exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("skillbox").join(CONFIG_FILE_NAME))
}

/// Load configuration.
///
/// An explicit path must exist. The default location is only read when
/// present.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<SkillboxConfig> {
    if let Some(path) = explicit {
        return parse_skillbox_toml(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            tracing::debug!(path = %path.display(), "Loading config");
            parse_skillbox_toml(&path)
        }
        _ => Ok(SkillboxConfig::new()),
    }
}
