//! skillbox core library
//!
//! Installs third-party skill archives into a per-skill tools directory.
//! Every archive is listed and validated as a whole before anything is
//! extracted, and extracted files are scanned before they are moved into
//! place.

pub mod archive;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod fs;
pub mod install;
pub mod process;
pub mod scan;
pub mod skills;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{SkillboxConfig, load_config};
    pub use crate::context::AppContext;

    // Errors
    pub use crate::error::{InstallError, TraversalReason};

    // Archives
    pub use crate::archive::{ArchiveEntry, ArchiveKind, EntryKind, PlannedEntry};

    // Collaborators
    pub use crate::fetch::{FetchError, FetchResponse, Fetcher, HttpFetcher};
    pub use crate::process::{CommandOutput, CommandRunner, CommandSpec, TokioCommandRunner};
    pub use crate::scan::{BlockSeverity, Finding, ScanSummary, Scanner, Severity, SkillScanner};

    // Install
    pub use crate::install::{
        InspectReport, InstallOrchestrator, InstallOutcome, InstallRequest, InstallStage,
    };
    pub use crate::skills::{InstallSpec, SkillManifest};
}
