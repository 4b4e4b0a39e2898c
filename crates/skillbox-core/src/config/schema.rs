//! Configuration schema for skillbox.toml
//!
//! Every section is optional; missing keys fall back to the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::archive::ArchiveLimits;
use crate::fetch::FetchPolicy;
use crate::scan::BlockSeverity;

/// Root configuration structure for skillbox.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillboxConfig {
    #[serde(default)]
    pub install: InstallSettings,

    #[serde(default)]
    pub fetch: FetchSettings,

    #[serde(default)]
    pub scan: ScanSettings,
}

/// Archive handling limits and the external `tar` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallSettings {
    /// Program used for tar-family archives, looked up on `PATH`.
    pub tar_program: String,
    pub tar_timeout_secs: u64,
    pub max_entries: usize,
    pub max_unpacked_bytes: u64,
}

impl Default for InstallSettings {
    fn default() -> Self {
        let limits = ArchiveLimits::default();
        Self {
            tar_program: "tar".to_string(),
            tar_timeout_secs: 120,
            max_entries: limits.max_entries,
            max_unpacked_bytes: limits.max_unpacked_bytes,
        }
    }
}

impl InstallSettings {
    pub fn tar_timeout(&self) -> Duration {
        Duration::from_secs(self.tar_timeout_secs)
    }

    pub fn limits(&self) -> ArchiveLimits {
        ArchiveLimits {
            max_entries: self.max_entries,
            max_unpacked_bytes: self.max_unpacked_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub max_bytes: u64,
    /// Allow downloads from loopback, private and link-local addresses.
    pub allow_private_network: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        let policy = FetchPolicy::default();
        Self {
            timeout_secs: policy.timeout.as_secs(),
            max_bytes: policy.max_bytes,
            allow_private_network: policy.allow_private_network,
        }
    }
}

impl FetchSettings {
    pub fn policy(&self) -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            max_bytes: self.max_bytes,
            allow_private_network: self.allow_private_network,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanSettings {
    /// Lowest finding severity that fails an install.
    pub block_severity: BlockSeverity,
}

impl SkillboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate values that deserialize fine but cannot work.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.install.tar_program.trim().is_empty() {
            anyhow::bail!("install.tar_program must not be empty");
        }
        if self.install.tar_timeout_secs == 0 {
            anyhow::bail!("install.tar_timeout_secs must be greater than zero");
        }
        if self.install.max_entries == 0 {
            anyhow::bail!("install.max_entries must be greater than zero");
        }
        if self.fetch.timeout_secs == 0 {
            anyhow::bail!("fetch.timeout_secs must be greater than zero");
        }
        if self.fetch.max_bytes == 0 {
            anyhow::bail!("fetch.max_bytes must be greater than zero");
        }
        Ok(())
    }
}
