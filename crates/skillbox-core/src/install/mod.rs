//! Skill archive installation
//!
//! One install runs the stages of [`InstallStage`] in order. Any failure ends
//! the attempt with an [`InstallOutcome`] whose `ok` is false; nothing is
//! moved into the target directory unless every stage passed.

pub mod orchestrator;

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::InstallError;
use crate::scan::Finding;

pub use orchestrator::{InspectReport, InstallOrchestrator, InstallReport};

/// Which skill and which of its declared sources to install.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub workspace_dir: PathBuf,
    pub skill_name: String,
    pub install_id: String,
}

impl InstallRequest {
    pub fn new(
        workspace_dir: impl Into<PathBuf>,
        skill_name: impl Into<String>,
        install_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            skill_name: skill_name.into(),
            install_id: install_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStage {
    Idle,
    TargetValidated,
    Downloaded,
    Listed,
    Validated,
    Extracted,
    Scanned,
    Done,
}

impl InstallStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::TargetValidated => "target_validated",
            Self::Downloaded => "downloaded",
            Self::Listed => "listed",
            Self::Validated => "validated",
            Self::Extracted => "extracted",
            Self::Scanned => "scanned",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one install call.
#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub ok: bool,
    /// Reason for the failure; empty on success.
    pub stderr: String,
    pub message: String,
    /// Scan findings below the blocking threshold.
    pub warnings: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,
    /// Last stage reached.
    pub stage: InstallStage,
}

impl InstallOutcome {
    pub fn success(report: InstallReport) -> Self {
        Self {
            ok: true,
            stderr: String::new(),
            message: format!(
                "Installed {} file(s) into {}",
                report.files,
                report.install_dir.display()
            ),
            warnings: report.warnings,
            install_dir: Some(report.install_dir),
            stage: InstallStage::Done,
        }
    }

    pub fn failure(err: &InstallError, stage: InstallStage) -> Self {
        Self {
            ok: false,
            stderr: err.to_string(),
            message: format!("Install failed after stage '{stage}' ({})", err.category()),
            warnings: Vec::new(),
            install_dir: None,
            stage,
        }
    }
}
