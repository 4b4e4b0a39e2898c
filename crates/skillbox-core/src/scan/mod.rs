//! Post-extraction content scanning
//!
//! A [`Scanner`] inspects an extracted tree and buckets its findings by
//! [`Severity`]. Whether a finding blocks the install is decided by the
//! caller through [`BlockSeverity`], not by the scanner.

pub mod rules;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use rules::SkillScanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Lowest severity that fails an install, or `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockSeverity {
    Info,
    Warn,
    #[default]
    Critical,
    Off,
}

impl BlockSeverity {
    pub fn threshold(self) -> Option<Severity> {
        match self {
            Self::Info => Some(Severity::Info),
            Self::Warn => Some(Severity::Warn),
            Self::Critical => Some(Severity::Critical),
            Self::Off => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    /// Path relative to the scanned directory.
    pub file: PathBuf,
    /// 1-based line number, when the finding is tied to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.file.display())?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
        }
        write!(f, ": {} ({})", self.message, self.rule_id)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub scanned_files: usize,
    pub critical: usize,
    pub warn: usize,
    pub info: usize,
    pub findings: Vec<Finding>,
}

impl ScanSummary {
    pub fn from_findings(scanned_files: usize, findings: Vec<Finding>) -> Self {
        let count = |s: Severity| findings.iter().filter(|f| f.severity == s).count();
        Self {
            scanned_files,
            critical: count(Severity::Critical),
            warn: count(Severity::Warn),
            info: count(Severity::Info),
            findings,
        }
    }

    /// Whether any finding is at or above `block`.
    pub fn is_blocked(&self, block: BlockSeverity) -> bool {
        block
            .threshold()
            .is_some_and(|t| self.findings.iter().any(|f| f.severity >= t))
    }

    /// Findings that did not reach the blocking threshold.
    pub fn non_blocking(&self, block: BlockSeverity) -> impl Iterator<Item = &Finding> {
        let threshold = block.threshold();
        self.findings
            .iter()
            .filter(move |f| threshold.is_none_or(|t| f.severity < t))
    }
}

/// Inspects an extracted tree.
pub trait Scanner: Send + Sync {
    fn scan(&self, dir: &Path) -> Result<ScanSummary>;
}
