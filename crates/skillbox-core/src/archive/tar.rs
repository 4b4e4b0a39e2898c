//! Tar-family listing and extraction through the external `tar` tool
//!
//! Listing runs two read-only passes. `tar tf` gives the exact entry names,
//! `tar tvf` gives the type character for each of them. The passes are
//! joined line by line and every entry whose verbose line does not agree
//! with its plain name is treated as a link, which the guard then rejects.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use crate::error::{InstallError, Result};
use crate::process::{CommandOutput, CommandRunner, CommandSpec};

use super::{ArchiveEntry, ArchiveLimits};

/// Drives one `tar` executable through a [`CommandRunner`].
pub struct TarTool<'a> {
    runner: &'a dyn CommandRunner,
    program: OsString,
    timeout: Duration,
}

impl<'a> TarTool<'a> {
    pub fn new(runner: &'a dyn CommandRunner, program: impl Into<OsString>, timeout: Duration) -> Self {
        Self {
            runner,
            program: program.into(),
            timeout,
        }
    }

    fn command(&self, op: &str, archive: &Path) -> CommandSpec {
        CommandSpec::new(self.program.clone(), self.timeout)
            .arg(op)
            .arg(archive.as_os_str())
    }

    async fn run_checked(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let output = self.runner.run(&spec).await?;
        if output.success() {
            return Ok(output);
        }

        let code = output
            .code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let detail = output.stderr.lines().next().unwrap_or("").trim();
        Err(InstallError::ExtractionTool {
            command: spec.to_string(),
            reason: if detail.is_empty() {
                format!("exited with status {code}")
            } else {
                format!("exited with status {code}: {detail}")
            },
        })
    }

    /// Enumerate the archive without writing anything.
    pub async fn list(&self, archive: &Path, limits: &ArchiveLimits) -> Result<Vec<ArchiveEntry>> {
        let plain = self.run_checked(self.command("tf", archive)).await?;
        let names = parse_plain_listing(&plain.stdout);

        if names.len() > limits.max_entries {
            return Err(InstallError::Archive(format!(
                "tar has too many entries ({}); maximum allowed is {}",
                names.len(),
                limits.max_entries
            )));
        }

        let verbose = self.run_checked(self.command("tvf", archive)).await?;
        let lines = parse_plain_listing(&verbose.stdout);

        Ok(join_listings(&names, &lines))
    }

    /// Extract the whole archive into `dest`, removing `strip_components`
    /// leading segments from every name.
    pub async fn extract(&self, archive: &Path, strip_components: usize, dest: &Path) -> Result<()> {
        std::fs::create_dir_all(dest).map_err(|e| {
            InstallError::io(format!("Failed to create directory: {}", dest.display()), e)
        })?;

        let spec = self
            .command("xf", archive)
            .arg(format!("--strip-components={strip_components}"))
            .arg("-C")
            .arg(dest.as_os_str());
        self.run_checked(spec).await?;
        Ok(())
    }
}

/// Split listing output into lines, dropping blank lines and `\r`.
pub fn parse_plain_listing(stdout: &str) -> Vec<&str> {
    stdout
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Join the plain and verbose passes into typed entries.
///
/// Both passes must list the same number of entries, and verbose line `i`
/// must name plain entry `i`. Anything else marks the entry as a link.
pub fn join_listings(names: &[&str], verbose: &[&str]) -> Vec<ArchiveEntry> {
    if names.len() != verbose.len() {
        tracing::warn!(
            plain = names.len(),
            verbose = verbose.len(),
            "tar listing passes disagree on entry count"
        );
        return names
            .iter()
            .map(|name| ArchiveEntry::symlink(name.replace('\\', "/"), None))
            .collect();
    }

    names
        .iter()
        .zip(verbose)
        .enumerate()
        .map(|(index, (name, line))| {
            let entry = classify(name, line);
            if entry.is_none() {
                tracing::warn!(index, "tar verbose line does not match plain listing");
            }
            entry.unwrap_or_else(|| ArchiveEntry::symlink(name.replace('\\', "/"), None))
        })
        .collect()
}

/// Classify one entry from its verbose line. `None` on disagreement.
fn classify(name: &str, line: &str) -> Option<ArchiveEntry> {
    let raw_path = name.replace('\\', "/");
    let type_char = line.chars().next()?;

    match type_char {
        'l' => {
            let marker = format!(" {name} -> ");
            let pos = line.find(&marker)?;
            let target = line[pos + marker.len()..].to_string();
            Some(ArchiveEntry::symlink(raw_path, Some(target)))
        }
        'h' => {
            let marker = format!(" {name} link to ");
            let pos = line.find(&marker)?;
            let target = line[pos + marker.len()..].to_string();
            Some(ArchiveEntry::symlink(raw_path, Some(target)))
        }
        _ => {
            if !line.ends_with(&format!(" {name}")) {
                return None;
            }
            if type_char == 'd' {
                Some(ArchiveEntry::directory(raw_path))
            } else {
                Some(ArchiveEntry::file(raw_path))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::EntryKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    // =========================================================================
    // Listing parser
    // =========================================================================

    #[test]
    fn join_classifies_gnu_verbose_lines() {
        let names = ["package/", "package/hello.txt"];
        let verbose = [
            "drwxr-xr-x user/user     0 2024-01-01 00:00 package/",
            "-rw-r--r-- user/user     2 2024-01-01 00:00 package/hello.txt",
        ];

        let entries = join_listings(&names, &verbose);

        assert_eq!(
            entries,
            vec![
                ArchiveEntry::directory("package/"),
                ArchiveEntry::file("package/hello.txt"),
            ]
        );
    }

    #[test]
    fn join_reports_symlink_with_target() {
        let names = ["link"];
        let verbose = ["lrwxrwxrwx user/user 0 2024-01-01 00:00 link -> /etc/passwd"];

        let entries = join_listings(&names, &verbose);

        assert_eq!(entries[0].kind, EntryKind::Symlink);
        assert_eq!(entries[0].link_target.as_deref(), Some("/etc/passwd"));
    }

    #[test]
    fn join_treats_hard_link_as_link() {
        let names = ["a", "b"];
        let verbose = [
            "-rw-r--r-- u/g 1 2024-01-01 00:00 a",
            "hrw-r--r-- u/g 0 2024-01-01 00:00 b link to a",
        ];

        let entries = join_listings(&names, &verbose);

        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[1].kind, EntryKind::Symlink);
        assert_eq!(entries[1].link_target.as_deref(), Some("a"));
    }

    #[test]
    fn join_fails_closed_on_name_mismatch() {
        let names = ["package/hello.txt"];
        let verbose = ["-rw-r--r-- u/g 2 2024-01-01 00:00 package/other.txt"];

        let entries = join_listings(&names, &verbose);

        assert_eq!(entries[0].kind, EntryKind::Symlink);
        assert_eq!(entries[0].raw_path, "package/hello.txt");
    }

    #[test]
    fn join_fails_closed_on_missing_verbose_lines() {
        let names = ["a", "b"];
        let verbose = ["-rw-r--r-- u/g 1 2024-01-01 00:00 a"];

        let entries = join_listings(&names, &verbose);

        assert!(entries.iter().all(|e| e.kind == EntryKind::Symlink));
    }

    #[test]
    fn plain_listing_skips_blank_lines_and_carriage_returns() {
        assert_eq!(parse_plain_listing("a\r\n\nb/\n"), vec!["a", "b/"]);
    }

    // =========================================================================
    // Tool invocation
    // =========================================================================

    struct ScriptedRunner {
        plain: String,
        verbose: String,
        fail_op: Option<&'static str>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        fn new(plain: &str, verbose: &str) -> Self {
            Self {
                plain: plain.to_string(),
                verbose: verbose.to_string(),
                fail_op: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn ops(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| c.subcommand().map(str::to_string))
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(spec.clone());
            let op = spec.subcommand().unwrap_or_default();
            if self.fail_op == Some(op) {
                return Ok(CommandOutput {
                    code: Some(2),
                    stdout: String::new(),
                    stderr: "tar: This does not look like a tar archive\n".to_string(),
                });
            }
            let stdout = match op {
                "tf" => self.plain.clone(),
                "tvf" => self.verbose.clone(),
                _ => String::new(),
            };
            Ok(CommandOutput {
                code: Some(0),
                stdout,
                stderr: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn list_runs_both_passes() {
        let runner = ScriptedRunner::new(
            "pkg/a.txt\n",
            "-rw-r--r-- u/g 1 2024-01-01 00:00 pkg/a.txt\n",
        );
        let tool = TarTool::new(&runner, "tar", Duration::from_secs(5));

        let entries = tool
            .list(Path::new("/tmp/x.tar.gz"), &ArchiveLimits::default())
            .await
            .unwrap();

        assert_eq!(entries, vec![ArchiveEntry::file("pkg/a.txt")]);
        assert_eq!(runner.ops(), vec!["tf", "tvf"]);
    }

    #[tokio::test]
    async fn list_fails_when_a_pass_fails() {
        let mut runner = ScriptedRunner::new("a\n", "");
        runner.fail_op = Some("tvf");
        let tool = TarTool::new(&runner, "tar", Duration::from_secs(5));

        let err = tool
            .list(Path::new("/tmp/x.tar.gz"), &ArchiveLimits::default())
            .await
            .unwrap_err();

        assert!(matches!(err, InstallError::ExtractionTool { .. }));
        assert!(err.to_string().contains("status 2"));
    }

    #[tokio::test]
    async fn list_enforces_entry_limit_before_verbose_pass() {
        let runner = ScriptedRunner::new("a\nb\nc\n", "");
        let tool = TarTool::new(&runner, "tar", Duration::from_secs(5));
        let limits = ArchiveLimits {
            max_entries: 2,
            ..ArchiveLimits::default()
        };

        let err = tool.list(Path::new("/tmp/x.tar"), &limits).await.unwrap_err();

        assert!(matches!(err, InstallError::Archive(_)));
        assert_eq!(runner.ops(), vec!["tf"]);
    }

    #[tokio::test]
    async fn extract_passes_strip_and_destination() {
        let temp = tempfile::TempDir::new().unwrap();
        let runner = ScriptedRunner::new("", "");
        let tool = TarTool::new(&runner, "gtar", Duration::from_secs(5));
        let dest = temp.path().join("out");

        tool.extract(Path::new("/tmp/x.tar.gz"), 1, &dest)
            .await
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(
            calls[0].to_string(),
            format!("gtar xf /tmp/x.tar.gz --strip-components=1 -C {}", dest.display())
        );
        assert!(dest.is_dir());
    }
}
