//! Install pipeline: target check, download, preflight, extract, scan, commit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use crate::archive::tar::TarTool;
use crate::archive::zip::{extract_zip, list_zip};
use crate::archive::{ArchiveEntry, ArchiveKind, PlannedEntry, url_file_name, validate_entries};
use crate::context::AppContext;
use crate::error::{InstallError, Result};
use crate::fetch::{FetchError, Fetcher};
use crate::fs::{StagingDir, resolve_target};
use crate::process::CommandRunner;
use crate::scan::{Finding, Scanner};
use crate::skills::{InstallSpec, load_manifest, validate_skill_name};

use super::{InstallOutcome, InstallRequest, InstallStage};

/// What a successful install produced.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub install_dir: PathBuf,
    pub files: usize,
    pub warnings: Vec<Finding>,
}

/// Preflight result for a local archive.
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub kind: ArchiveKind,
    pub entries: Vec<ArchiveEntry>,
    /// Output paths after stripping, in extraction order.
    pub plan: Vec<PlannedEntry>,
}

/// Runs installs with injected collaborators.
pub struct InstallOrchestrator {
    ctx: AppContext,
    fetcher: Arc<dyn Fetcher>,
    runner: Arc<dyn CommandRunner>,
    scanner: Arc<dyn Scanner>,
}

impl InstallOrchestrator {
    pub fn new(
        ctx: AppContext,
        fetcher: Arc<dyn Fetcher>,
        runner: Arc<dyn CommandRunner>,
        scanner: Arc<dyn Scanner>,
    ) -> Self {
        Self {
            ctx,
            fetcher,
            runner,
            scanner,
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    fn tar_tool(&self) -> TarTool<'_> {
        let settings = &self.ctx.config().install;
        TarTool::new(
            self.runner.as_ref(),
            settings.tar_program.clone(),
            settings.tar_timeout(),
        )
    }

    /// Install one declared source of a workspace skill.
    ///
    /// Never fails; every error is folded into the returned outcome.
    pub async fn install_skill(&self, request: &InstallRequest) -> InstallOutcome {
        let span = tracing::info_span!(
            "install",
            skill = %request.skill_name,
            id = %request.install_id
        );

        async {
            let spec = load_manifest(&request.workspace_dir, &request.skill_name).and_then(
                |manifest| {
                    manifest
                        .find_install(&request.install_id)
                        .cloned()
                        .ok_or_else(|| InstallError::InstallNotFound {
                            skill: request.skill_name.clone(),
                            id: request.install_id.clone(),
                        })
                },
            );

            match spec {
                Ok(spec) => self.install_spec(&request.skill_name, &spec).await,
                Err(e) => {
                    tracing::warn!(category = e.category(), error = %e, "Install failed");
                    InstallOutcome::failure(&e, InstallStage::Idle)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Install `spec` for `skill_name`.
    pub async fn install_spec(&self, skill_name: &str, spec: &InstallSpec) -> InstallOutcome {
        let mut stage = InstallStage::Idle;
        match self.run(skill_name, spec, &mut stage).await {
            Ok(report) => {
                tracing::info!(files = report.files, dir = %report.install_dir.display(), "Install complete");
                InstallOutcome::success(report)
            }
            Err(e) => {
                tracing::warn!(%stage, category = e.category(), error = %e, "Install failed");
                InstallOutcome::failure(&e, stage)
            }
        }
    }

    async fn run(
        &self,
        skill_name: &str,
        spec: &InstallSpec,
        stage: &mut InstallStage,
    ) -> Result<InstallReport> {
        let tools_root = self.tools_root(skill_name)?;
        let created_root = !tools_root.exists();

        let result = self.run_in_root(&tools_root, spec, stage).await;
        if result.is_err() && created_root {
            // Only succeeds while the directory is still empty.
            let _ = std::fs::remove_dir(&tools_root);
        }
        result
    }

    async fn run_in_root(
        &self,
        tools_root: &Path,
        spec: &InstallSpec,
        stage: &mut InstallStage,
    ) -> Result<InstallReport> {
        let target = resolve_target(&spec.target_dir(), tools_root)?;
        advance(stage, InstallStage::TargetValidated);

        let response = self.fetcher.fetch(&spec.url).await?;
        if !response.is_success() {
            return Err(InstallError::Download(FetchError::Status {
                url: spec.url.clone(),
                status: response.status,
            }));
        }
        if let Some(expected) = &spec.blake3 {
            let actual = blake3::hash(&response.body).to_hex().to_string();
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(InstallError::IntegrityMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let kind = spec.archive_kind();
        let download_dir = tempfile::Builder::new()
            .prefix("skillbox-download-")
            .tempdir()
            .map_err(|e| InstallError::io("Failed to create download directory", e))?;
        let file_name = download_file_name(kind, &spec.url)?;
        let archive_path = download_dir.path().join(&file_name);
        std::fs::write(&archive_path, &response.body).map_err(|e| {
            InstallError::io(format!("Failed to write {}", archive_path.display()), e)
        })?;
        drop(response);
        advance(stage, InstallStage::Downloaded);

        let strip = spec.strip_components as usize;
        let plan = match kind {
            ArchiveKind::None => Vec::new(),
            _ => {
                let entries = self.list(kind, &archive_path).await?;
                advance(stage, InstallStage::Listed);
                validate_entries(&entries, strip, &target.absolute_path)?
            }
        };
        advance(stage, InstallStage::Validated);

        let staging = StagingDir::new_in(tools_root)?;
        match kind {
            ArchiveKind::Zip => {
                let limits = self.ctx.config().install.limits();
                extract_zip(&archive_path, &plan, staging.path(), &limits)?;
            }
            ArchiveKind::TarGz | ArchiveKind::TarBz2 => {
                self.tar_tool()
                    .extract(&archive_path, strip, staging.path())
                    .await?;
            }
            ArchiveKind::None => {
                let dest = staging.path().join(&file_name);
                std::fs::copy(&archive_path, &dest).map_err(|e| {
                    InstallError::io(format!("Failed to stage {}", dest.display()), e)
                })?;
            }
        }
        staging.make_owner_writable()?;
        advance(stage, InstallStage::Extracted);

        let summary = self.scanner.scan(staging.path())?;
        let block = self.ctx.config().scan.block_severity;
        if summary.is_blocked(block) {
            for finding in &summary.findings {
                tracing::warn!(%finding, "Scan finding");
            }
            return Err(InstallError::ScanRejected {
                critical: summary.critical,
                warn: summary.warn,
                threshold: block
                    .threshold()
                    .unwrap_or(crate::scan::Severity::Critical),
            });
        }
        let warnings: Vec<Finding> = summary.non_blocking(block).cloned().collect();
        advance(stage, InstallStage::Scanned);

        let files = staging.commit(&target.absolute_path)?;
        advance(stage, InstallStage::Done);

        Ok(InstallReport {
            install_dir: target.absolute_path,
            files,
            warnings,
        })
    }

    async fn list(&self, kind: ArchiveKind, archive: &Path) -> Result<Vec<ArchiveEntry>> {
        let limits = self.ctx.config().install.limits();
        match kind {
            ArchiveKind::Zip => list_zip(archive, &limits),
            ArchiveKind::TarGz | ArchiveKind::TarBz2 => self.tar_tool().list(archive, &limits).await,
            ArchiveKind::None => Ok(Vec::new()),
        }
    }

    /// Absolute `<state>/tools/<skill>`.
    fn tools_root(&self, skill_name: &str) -> Result<PathBuf> {
        let root = self.ctx.tools_root(skill_name)?;
        std::path::absolute(&root)
            .map_err(|e| InstallError::io(format!("Failed to resolve {}", root.display()), e))
    }

    /// List and validate a local archive without extracting it.
    pub async fn inspect_archive(
        &self,
        archive: &Path,
        kind: Option<ArchiveKind>,
        strip_components: usize,
    ) -> Result<InspectReport> {
        let kind = kind.unwrap_or_else(|| ArchiveKind::from_url(&archive.to_string_lossy()));
        if kind == ArchiveKind::None {
            return Err(InstallError::Archive(format!(
                "cannot determine archive kind of {}",
                archive.display()
            )));
        }

        let entries = self.list(kind, archive).await?;
        let plan = validate_entries(&entries, strip_components, Path::new("/inspect"))?;
        Ok(InspectReport {
            kind,
            entries,
            plan,
        })
    }
}

fn advance(stage: &mut InstallStage, next: InstallStage) {
    tracing::info!(from = %stage, to = %next, "Install stage");
    *stage = next;
}

/// Name the downloaded file is stored under.
///
/// Archives get a fixed name; a plain download keeps the last URL segment,
/// which must be a single safe file name.
fn download_file_name(kind: ArchiveKind, url: &str) -> Result<String> {
    match kind {
        ArchiveKind::None => {
            let name = url_file_name(url);
            validate_skill_name(name).map_err(|_| {
                InstallError::Archive(format!("cannot derive a file name from url '{url}'"))
            })?;
            Ok(name.to_string())
        }
        other => Ok(format!("download.{}", other.as_str())),
    }
}
