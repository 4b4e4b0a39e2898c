//! Filesystem helpers: install target confinement and staged commits.

pub mod resolve;
pub mod staging;

pub use resolve::{ResolvedTarget, canonicalize_existing, normalize_path, resolve_target};
pub use staging::StagingDir;
