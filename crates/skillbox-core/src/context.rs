//! Application context for unified dependency injection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{SkillboxConfig, load_config};
use crate::error::Result;
use crate::fetch::HttpFetcher;
use crate::install::InstallOrchestrator;
use crate::process::TokioCommandRunner;
use crate::scan::SkillScanner;
use crate::skills::validate_skill_name;

/// Paths and configuration shared by every command.
///
/// Frontends create this once and derive services from it.
#[derive(Debug, Clone)]
pub struct AppContext {
    workspace_dir: PathBuf,
    state_dir: PathBuf,
    config: SkillboxConfig,
}

impl AppContext {
    /// Create a new context with explicit paths.
    pub fn new(workspace_dir: PathBuf, state_dir: PathBuf, config: SkillboxConfig) -> Self {
        Self {
            workspace_dir,
            state_dir,
            config,
        }
    }

    /// Create a context from the current directory, the platform state
    /// directory and the user config file. Each part can be overridden.
    pub fn with_defaults(
        workspace_dir: Option<PathBuf>,
        state_dir: Option<PathBuf>,
        config_path: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let workspace_dir = match workspace_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let state_dir = match state_dir {
            Some(dir) => dir,
            None => default_state_dir()?,
        };
        let config = load_config(config_path)?;

        Ok(Self::new(workspace_dir, state_dir, config))
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn config(&self) -> &SkillboxConfig {
        &self.config
    }

    /// `<state>/tools`
    pub fn tools_dir(&self) -> PathBuf {
        self.state_dir.join("tools")
    }

    /// `<state>/tools/<skill>`, the only place an install may write to.
    pub fn tools_root(&self, skill_name: &str) -> Result<PathBuf> {
        validate_skill_name(skill_name)?;
        Ok(self.tools_dir().join(skill_name))
    }

    /// Orchestrator wired to the production collaborators.
    pub fn orchestrator(&self) -> InstallOrchestrator {
        InstallOrchestrator::new(
            self.clone(),
            Arc::new(HttpFetcher::new(self.config.fetch.policy())),
            Arc::new(TokioCommandRunner),
            Arc::new(SkillScanner::new()),
        )
    }
}

/// `dirs::state_dir()` (or the local data dir) joined with `skillbox`.
pub fn default_state_dir() -> anyhow::Result<PathBuf> {
    Ok(dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .ok_or_else(|| anyhow::anyhow!("Could not determine state directory"))?
        .join("skillbox"))
}
