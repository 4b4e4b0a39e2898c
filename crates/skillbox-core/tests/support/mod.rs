//! Shared fixtures for install pipeline tests.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use skillbox_core::config::SkillboxConfig;
use skillbox_core::context::AppContext;
use skillbox_core::error::Result;
use skillbox_core::fetch::{FetchError, FetchResponse, Fetcher};
use skillbox_core::install::InstallOrchestrator;
use skillbox_core::process::{CommandOutput, CommandRunner, CommandSpec};
use skillbox_core::scan::{ScanSummary, Scanner, SkillScanner};
use tempfile::TempDir;

// =========================================================================
// Fetcher
// =========================================================================

/// Serves one fixed response and counts calls.
pub struct FakeFetcher {
    status: u16,
    body: Vec<u8>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn ok(body: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            status: 200,
            body,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn status(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status,
            body: Vec::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, _url: &str) -> std::result::Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FetchResponse {
            status: self.status,
            content_type: None,
            body: self.body.clone(),
        })
    }
}

// =========================================================================
// Command runner
// =========================================================================

/// Answers tar invocations from canned listings and records every call.
///
/// On `xf` it writes `extracted` files into the `-C` directory.
#[derive(Default)]
pub struct RecordingRunner {
    pub plain: String,
    pub verbose: String,
    pub extracted: Vec<(String, String)>,
    /// Directories made read-only after extraction, as tar does when the
    /// archive records such modes.
    pub readonly_dirs: Vec<String>,
    pub fail_op: Option<String>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl RecordingRunner {
    pub fn new(plain: &str, verbose: &str) -> Self {
        Self {
            plain: plain.to_string(),
            verbose: verbose.to_string(),
            ..Self::default()
        }
    }

    pub fn with_extracted(mut self, files: &[(&str, &str)]) -> Self {
        self.extracted = files
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect();
        self
    }

    pub fn with_readonly_dirs(mut self, dirs: &[&str]) -> Self {
        self.readonly_dirs = dirs.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Tar operations in call order (`tf`, `tvf`, `xf`).
    pub fn ops(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.subcommand().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let op = spec.subcommand().unwrap_or_default().to_string();

        if self.fail_op.as_deref() == Some(op.as_str()) {
            return Ok(CommandOutput {
                code: Some(2),
                stdout: String::new(),
                stderr: "tar: Error is not recoverable: exiting now\n".to_string(),
            });
        }

        let stdout = match op.as_str() {
            "tf" => self.plain.clone(),
            "tvf" => self.verbose.clone(),
            "xf" => {
                let dest = spec
                    .args
                    .iter()
                    .position(|a| a == "-C")
                    .and_then(|i| spec.args.get(i + 1))
                    .map(PathBuf::from)
                    .expect("xf without -C");
                for (path, content) in &self.extracted {
                    let out = dest.join(path);
                    std::fs::create_dir_all(out.parent().unwrap()).unwrap();
                    std::fs::write(out, content).unwrap();
                }
                #[cfg(unix)]
                for dir in &self.readonly_dirs {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(
                        dest.join(dir),
                        std::fs::Permissions::from_mode(0o555),
                    )
                    .unwrap();
                }
                String::new()
            }
            _ => String::new(),
        };

        Ok(CommandOutput {
            code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

// =========================================================================
// Scanner
// =========================================================================

/// Returns a fixed summary and counts calls.
pub struct FixedScanner {
    summary: ScanSummary,
    calls: AtomicUsize,
}

impl FixedScanner {
    pub fn new(summary: ScanSummary) -> Arc<Self> {
        Arc::new(Self {
            summary,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Scanner for FixedScanner {
    fn scan(&self, _dir: &Path) -> Result<ScanSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.summary.clone())
    }
}

// =========================================================================
// Workspace
// =========================================================================

pub struct Fixture {
    pub temp: TempDir,
    pub config: SkillboxConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir_all(temp.path().join("workspace")).unwrap();
        std::fs::create_dir_all(temp.path().join("state")).unwrap();
        Self {
            temp,
            config: SkillboxConfig::default(),
        }
    }

    pub fn workspace(&self) -> PathBuf {
        self.temp.path().join("workspace")
    }

    pub fn state(&self) -> PathBuf {
        self.temp.path().join("state")
    }

    pub fn tools_root(&self, skill: &str) -> PathBuf {
        self.state().join("tools").join(skill)
    }

    pub fn ctx(&self) -> AppContext {
        AppContext::new(self.workspace(), self.state(), self.config.clone())
    }

    /// Write `skills/<skill>/SKILL.toml` with a single `[[install]]` entry.
    pub fn write_manifest(&self, skill: &str, install: &str) {
        let dir = self.workspace().join("skills").join(skill);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.toml"),
            format!("[skill]\nname = \"{skill}\"\n\n[[install]]\n{install}\n"),
        )
        .unwrap();
    }

    pub fn orchestrator(
        &self,
        fetcher: Arc<dyn Fetcher>,
        runner: Arc<dyn CommandRunner>,
    ) -> InstallOrchestrator {
        InstallOrchestrator::new(self.ctx(), fetcher, runner, Arc::new(SkillScanner::new()))
    }

    /// Every file below the temp root, relative to it, sorted.
    pub fn all_files(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        collect_files(self.temp.path(), self.temp.path(), &mut out);
        out.sort();
        out
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else {
            out.push(path.strip_prefix(root).unwrap().to_path_buf());
        }
    }
}

// =========================================================================
// Archives
// =========================================================================

/// Build an in-memory zip. Names ending in `/` become directories.
pub fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
    }
    zip.finish().unwrap().into_inner()
}

/// Overwrite the uncompressed size in every local and central zip header,
/// so the archive declares less data than it holds.
pub fn understate_zip_sizes(bytes: &mut [u8], declared: u32) {
    let declared = declared.to_le_bytes();
    let mut i = 0;
    while i + 4 <= bytes.len() {
        let offset = match &bytes[i..i + 4] {
            [0x50, 0x4b, 0x03, 0x04] => Some(22),
            [0x50, 0x4b, 0x01, 0x02] => Some(24),
            _ => None,
        };
        if let Some(offset) = offset {
            bytes[i + offset..i + offset + 4].copy_from_slice(&declared);
        }
        i += 1;
    }
}

/// Names directly inside `dir`, sorted.
pub fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}
