//! Check framework for gatecheck
//!
//! Defines the severity/problem/result model shared by every check, the
//! closed set of check variants for the three scopes (commit list, commit,
//! changed file) and the per-invocation context that carries the caches.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::checkers::{builtin_checkers, CheckerSpec};
use crate::config::GatecheckConfig;
use crate::git::commit::{ChangedFile, Commit, CommitList};
use crate::git::GitQuery;

pub mod command;
pub mod commit;
pub mod commit_list;
pub mod file;

/// Problem severity, numbered to match the syslog levels. A smaller number
/// is more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
}

/// Only problems at this severity or worse block a push.
pub const FAIL_THRESHOLD: Severity = Severity::Error;

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
        }
    }

    /// Whether a problem at this severity fails its result.
    pub fn blocks(self) -> bool {
        (self as u8) <= (FAIL_THRESHOLD as u8)
    }

    /// Split a leading severity keyword off a checker output line.
    ///
    /// Falls back to `Info` when no keyword matches, so unparseable lines
    /// degrade into raw-text problems instead of being dropped.
    pub fn split(line: &str) -> (Severity, &str) {
        const KEYWORDS: [(&str, Severity); 5] = [
            ("ERROR", Severity::Error),
            ("WARNING", Severity::Warning),
            ("NOTICE", Severity::Notice),
            ("NOTE", Severity::Notice),
            ("INFO", Severity::Info),
        ];
        let upper = line.to_uppercase();
        for (keyword, severity) in KEYWORDS {
            if upper.starts_with(keyword) && line.is_char_boundary(keyword.len()) {
                let rest = line[keyword.len()..].trim_start_matches([' ', ':', '-'].as_slice());
                return (severity, rest);
            }
        }
        (Severity::Info, line)
    }
}

/// One complaint produced by a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub severity: Severity,
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl Problem {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            line: None,
            column: None,
        }
    }
}

/// The outcome of running one check against one target.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub check_name: String,
    pub target: String,
    pub problems: Vec<Problem>,
    /// Whether the owning commit carries a recognized waiver tag.
    pub waivable: bool,
    /// A checker signalled failure through its exit code; the parsed
    /// complaints may all sit below the severity threshold.
    pub exit_failed: bool,
}

impl CheckResult {
    pub fn new(check_name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            check_name: check_name.into(),
            target: target.into(),
            problems: Vec::new(),
            waivable: false,
            exit_failed: false,
        }
    }

    pub fn with_problems(mut self, problems: Vec<Problem>) -> Self {
        self.problems = problems;
        self
    }

    pub fn waivable(mut self, waivable: bool) -> Self {
        self.waivable = waivable;
        self
    }

    pub fn failed(&self) -> bool {
        self.exit_failed || self.problems.iter().any(|p| p.severity.blocks())
    }

    pub fn can_soft_fail(&self) -> bool {
        self.waivable
    }

    /// A failed result that is not covered by a waiver tag rejects the push.
    pub fn blocks_push(&self) -> bool {
        self.failed() && !self.can_soft_fail()
    }
}

/// Per-invocation context handed to every check.
///
/// Owns the caches whose lifecycle is bound to one push evaluation; there
/// are no process-wide singletons so the executor stays testable with a
/// fabricated git backend.
pub struct Context<'a> {
    pub git: &'a dyn GitQuery,
    pub config: &'a GatecheckConfig,
    /// Evaluation timestamp, for timestamp plausibility checks.
    pub now: i64,
    commands: RefCell<HashMap<String, Option<PathBuf>>>,
}

impl<'a> Context<'a> {
    pub fn new(git: &'a dyn GitQuery, config: &'a GatecheckConfig) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self::with_now(git, config, now)
    }

    pub fn with_now(git: &'a dyn GitQuery, config: &'a GatecheckConfig, now: i64) -> Self {
        Self {
            git,
            config,
            now,
            commands: RefCell::new(HashMap::new()),
        }
    }

    /// Resolve a command on PATH, memoized per invocation. `None` means the
    /// tool is not installed on the server.
    pub fn command_path(&self, name: &str) -> Option<PathBuf> {
        if let Some(cached) = self.commands.borrow().get(name) {
            return cached.clone();
        }
        let resolved = which::which(name).ok();
        self.commands
            .borrow_mut()
            .insert(name.to_string(), resolved.clone());
        resolved
    }
}

/// Checks that run once against a whole commit list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListCheck {
    DuplicateSummaries,
    Timestamps,
}

impl ListCheck {
    pub fn name(self) -> &'static str {
        match self {
            ListCheck::DuplicateSummaries => "CheckDuplicateCommitSummaries",
            ListCheck::Timestamps => "CheckTimestamps",
        }
    }

    pub fn applies_to(self, list: &CommitList) -> bool {
        match self {
            // Nothing can be duplicated on a single commit.
            ListCheck::DuplicateSummaries => list.commits.len() > 1,
            ListCheck::Timestamps => !list.commits.is_empty(),
        }
    }

    pub fn run(self, ctx: &Context, list: &CommitList) -> Vec<Problem> {
        match self {
            ListCheck::DuplicateSummaries => commit_list::duplicate_summaries(list),
            ListCheck::Timestamps => commit_list::timestamps(ctx, list),
        }
    }
}

/// Checks that run once per commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitCheck {
    MessageFormat,
    SummaryFormat,
    ChangedPaths,
    MisleadingMerge,
    Contribution,
}

impl CommitCheck {
    pub fn name(self) -> &'static str {
        match self {
            CommitCheck::MessageFormat => "CheckCommitMessage",
            CommitCheck::SummaryFormat => "CheckCommitSummary",
            CommitCheck::ChangedPaths => "CheckChangedFilePaths",
            CommitCheck::MisleadingMerge => "CheckMisleadingMerge",
            CommitCheck::Contribution => "CheckContribution",
        }
    }

    pub fn applies_to(self, commit: &Commit) -> bool {
        match self {
            CommitCheck::MisleadingMerge => commit.is_merge(),
            _ => true,
        }
    }

    pub fn run(self, ctx: &Context, commit: &Commit) -> Vec<Problem> {
        match self {
            CommitCheck::MessageFormat => commit::message_format(ctx, commit),
            CommitCheck::SummaryFormat => commit::summary_format(ctx, commit),
            CommitCheck::ChangedPaths => commit::changed_paths(ctx, commit),
            CommitCheck::MisleadingMerge => commit::misleading_merge(ctx, commit),
            CommitCheck::Contribution => commit::contribution(ctx, commit),
        }
    }
}

/// Structured file formats validated in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Yaml,
    Toml,
}

impl FileFormat {
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            FileFormat::Json => &["json"],
            FileFormat::Yaml => &["yaml", "yml"],
            FileFormat::Toml => &["toml"],
        }
    }
}

/// Checks that run once per (commit, changed file) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCheck {
    Executable,
    Symlink,
    Format(FileFormat),
    Command(&'static CheckerSpec),
}

impl FileCheck {
    pub fn name(self) -> String {
        match self {
            FileCheck::Executable => "CheckExecutable".to_string(),
            FileCheck::Symlink => "CheckSymlink".to_string(),
            FileCheck::Format(FileFormat::Json) => "CheckJson".to_string(),
            FileCheck::Format(FileFormat::Yaml) => "CheckYaml".to_string(),
            FileCheck::Format(FileFormat::Toml) => "CheckToml".to_string(),
            FileCheck::Command(spec) => format!("CheckCommand \"{}\"", spec.name),
        }
    }

    /// Whether this check runs in-process. `Command` checks are dispatched
    /// to the worker pool instead.
    pub fn inline(self) -> bool {
        !matches!(self, FileCheck::Command(_))
    }

    pub fn applies_to(self, file: &ChangedFile, content: &[u8]) -> bool {
        if !file.checkable() {
            return false;
        }
        match self {
            FileCheck::Executable => !file.is_symlink(),
            FileCheck::Symlink => file.is_symlink(),
            FileCheck::Format(format) => {
                !file.is_symlink()
                    && !file.in_templates()
                    && file
                        .extension()
                        .is_some_and(|ext| format.extensions().contains(&ext))
            }
            FileCheck::Command(spec) => spec.applies_to(file, content),
        }
    }

    /// Run an in-process file check. `Command` variants never reach this;
    /// the executor turns them into pool jobs.
    pub fn run(
        self,
        ctx: &Context,
        commit: &Commit,
        changed_file: &ChangedFile,
        content: &[u8],
    ) -> Vec<Problem> {
        match self {
            FileCheck::Executable => file::executable(ctx, changed_file, content),
            FileCheck::Symlink => file::symlink(ctx, commit, changed_file, content),
            FileCheck::Format(format) => file::format(format, content),
            FileCheck::Command(_) => Vec::new(),
        }
    }
}

/// Enumerate the list-level checks enabled by the configuration.
pub fn list_checks(config: &GatecheckConfig) -> Vec<ListCheck> {
    [ListCheck::DuplicateSummaries, ListCheck::Timestamps]
        .into_iter()
        .filter(|check| !config.is_ignored(check.name()))
        .collect()
}

/// Enumerate the commit-level checks enabled by the configuration.
pub fn commit_checks(config: &GatecheckConfig) -> Vec<CommitCheck> {
    [
        CommitCheck::MessageFormat,
        CommitCheck::SummaryFormat,
        CommitCheck::ChangedPaths,
        CommitCheck::MisleadingMerge,
        CommitCheck::Contribution,
    ]
    .into_iter()
    .filter(|check| !config.is_ignored(check.name()))
    .collect()
}

/// Enumerate the file-level checks enabled by the configuration, external
/// checkers included.
pub fn file_checks(config: &GatecheckConfig) -> Vec<FileCheck> {
    let mut checks = vec![
        FileCheck::Executable,
        FileCheck::Symlink,
        FileCheck::Format(FileFormat::Json),
        FileCheck::Format(FileFormat::Yaml),
        FileCheck::Format(FileFormat::Toml),
    ];
    checks.extend(builtin_checkers().iter().map(FileCheck::Command));
    checks
        .into_iter()
        .filter(|check| !config.is_ignored(&check.name()))
        .collect()
}
