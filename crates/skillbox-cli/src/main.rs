//! skillbox - secure skill archive installer
//!
//! Usage:
//!   skillbox install weather --id cli     # Download, check and install
//!   skillbox installs weather             # List declared install sources
//!   skillbox inspect ./weather.tar.gz     # Preflight a local archive

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skillbox_core::archive::{ArchiveKind, EntryKind};
use skillbox_core::context::AppContext;
use skillbox_core::install::{InspectReport, InstallOutcome, InstallRequest};
use skillbox_core::skills::load_manifest;

#[derive(Parser)]
#[command(name = "skillbox")]
#[command(about = "Secure skill archive installer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install one declared source of a skill
    Install(InstallArgs),

    /// List the install sources a skill declares
    Installs {
        /// Skill name (directory under <workspace>/skills)
        skill: String,

        /// Workspace root (defaults to the current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Output format
        #[arg(short = 'o', long, default_value = "table")]
        format: OutputFormat,
    },

    /// List and validate a local archive without extracting it
    Inspect {
        /// Path to the archive
        archive: PathBuf,

        /// Archive format (zip, tar.gz, tar.bz2); inferred from the name if omitted
        #[arg(long)]
        kind: Option<ArchiveKind>,

        /// Leading path segments to strip from every entry
        #[arg(long, default_value_t = 0)]
        strip: usize,

        /// Config file (defaults to the user config)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(short = 'o', long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct InstallArgs {
    /// Skill name (directory under <workspace>/skills)
    skill: String,

    /// Install source id from the skill's SKILL.toml
    #[arg(long)]
    id: String,

    /// Workspace root (defaults to the current directory)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// State directory holding installed tools
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Config file (defaults to the user config)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, default_value = "table")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
    /// No output; the exit code reports the result
    Quiet,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skillbox=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Install(args) => run_install(args),
        Commands::Installs {
            skill,
            workspace,
            format,
        } => run_installs(&skill, workspace, format),
        Commands::Inspect {
            archive,
            kind,
            strip,
            config,
            format,
        } => run_inspect(&archive, kind, strip, config.as_deref(), format),
    }
}

fn run_install(args: InstallArgs) -> Result<()> {
    let ctx = AppContext::with_defaults(args.workspace.clone(), args.state_dir.clone(), args.config.as_deref())?;
    let request = InstallRequest::new(ctx.workspace_dir(), &args.skill, &args.id);
    let orchestrator = ctx.orchestrator();

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(orchestrator.install_skill(&request));

    print_install_outcome(&args, &outcome)?;
    if !outcome.ok {
        std::process::exit(1);
    }
    Ok(())
}

fn print_install_outcome(args: &InstallArgs, outcome: &InstallOutcome) -> Result<()> {
    match args.format {
        OutputFormat::Table => {
            if outcome.ok {
                println!(
                    "{} Installed {} ({})",
                    style("✓").green(),
                    style(&args.skill).bold(),
                    args.id
                );
                if let Some(dir) = &outcome.install_dir {
                    println!("  Path: {}", dir.display());
                }
            } else {
                println!(
                    "{} Failed to install {} ({})",
                    style("✗").red(),
                    style(&args.skill).bold(),
                    args.id
                );
                println!("  {}", outcome.message);
                println!("  {}", style(&outcome.stderr).red());
            }

            for warning in &outcome.warnings {
                println!("  {} {}", style("⚠").yellow(), warning);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "skill": args.skill,
                "id": args.id,
                "outcome": outcome,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Quiet => {}
    }

    Ok(())
}

fn run_installs(skill: &str, workspace: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let workspace = match workspace {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let manifest = load_manifest(&workspace, skill)?;

    match format {
        OutputFormat::Table => {
            println!("{}", style(&manifest.skill.name).bold());
            if let Some(description) = &manifest.skill.description {
                println!("  {description}");
            }
            println!();
            println!(
                "  {:<12} {:<8} {:<6} {:<12} URL",
                "Id", "Archive", "Strip", "Target"
            );
            println!("  {}", "-".repeat(70));

            for spec in &manifest.install {
                let target = spec
                    .target_dir
                    .as_deref()
                    .map_or_else(|| ".".to_string(), |p| p.display().to_string());
                println!(
                    "  {:<12} {:<8} {:<6} {:<12} {}",
                    truncate(&spec.id, 12),
                    spec.archive_kind().as_str(),
                    spec.strip_components,
                    truncate(&target, 12),
                    spec.url
                );
            }

            if manifest.install.is_empty() {
                println!("  (no install sources)");
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "skill": manifest.skill,
                "install": manifest.install,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Quiet => {}
    }

    Ok(())
}

fn run_inspect(
    archive: &Path,
    kind: Option<ArchiveKind>,
    strip: usize,
    config: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let ctx = AppContext::with_defaults(None, None, config)?;
    let orchestrator = ctx.orchestrator();

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(orchestrator.inspect_archive(archive, kind, strip));

    match (&result, format) {
        (Ok(report), OutputFormat::Table) => print_inspect_table(archive, report),
        (Ok(report), OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        (Err(e), OutputFormat::Table) => {
            println!(
                "{} {} rejected: {}",
                style("✗").red(),
                archive.display(),
                style(e).red()
            );
        }
        (Err(e), OutputFormat::Json) => {
            let output = serde_json::json!({
                "ok": false,
                "category": e.category(),
                "error": e.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        (_, OutputFormat::Quiet) => {}
    }

    if result.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_inspect_table(archive: &Path, report: &InspectReport) {
    println!(
        "{} {} ({}, {} entries)",
        style("✓").green(),
        archive.display(),
        report.kind,
        report.entries.len()
    );
    println!("  {:<5} {:<5} Output path", "#", "Kind");
    println!("  {}", "-".repeat(50));

    for planned in &report.plan {
        println!(
            "  {:<5} {:<5} {}",
            planned.index,
            kind_label(planned.kind),
            planned.relative_path.display()
        );
    }

    let skipped = report.entries.len() - report.plan.len();
    if skipped > 0 {
        println!("  ({skipped} entries consumed by --strip)");
    }
}

fn kind_label(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::File => "file",
        EntryKind::Directory => "dir",
        EntryKind::Symlink => "link",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
