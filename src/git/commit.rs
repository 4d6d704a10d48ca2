//! Commit domain model
//!
//! Plain-data commit, contribution and changed-file types resolved from the
//! object store by the query layer. Checks only ever see these types, never
//! raw git2 handles, so they can be fabricated in tests.

use git2::Oid;
use std::sync::Arc;

/// Author or committer identity on a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    pub name: String,
    pub email: String,
    /// Seconds since the UNIX epoch.
    pub timestamp: i64,
}

impl Contribution {
    pub fn email_domain(&self) -> &str {
        self.email.rsplit('@').next().unwrap_or(&self.email)
    }
}

/// One commit, fetched at most once per push evaluation and shared from the
/// oid-keyed cache.
#[derive(Debug, Clone)]
pub struct Commit {
    pub oid: Oid,
    pub parents: Vec<Oid>,
    pub tree: Oid,
    pub author: Contribution,
    pub committer: Contribution,
    pub message: String,
}

impl Commit {
    /// Abbreviated id used in report targets.
    pub fn short_id(&self) -> String {
        self.oid.to_string()[..8].to_string()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() >= 2
    }

    /// First line of the commit message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    pub fn message_lines(&self) -> impl Iterator<Item = &str> {
        self.message.lines()
    }

    /// Split leading `[TAG]` tokens off the summary, returning the tags and
    /// the remainder. The remainder keeps its separator character, matching
    /// the tag grammar: `[WIP] Fix the bug` yields `(["WIP"], " Fix the bug")`.
    pub fn parse_tags(&self) -> (Vec<&str>, &str) {
        let mut tags = Vec::new();
        let mut rest = self.summary();
        while rest.starts_with('[') {
            match rest.find(']') {
                Some(end) => {
                    tags.push(&rest[1..end]);
                    rest = &rest[end + 1..];
                }
                None => break,
            }
        }
        (tags, rest)
    }

    /// Whether the commit carries one of the recognized waiver tags, making
    /// failing results on it soft.
    pub fn has_waiver_tag(&self, waiver_tags: &[String]) -> bool {
        let (tags, _) = self.parse_tags();
        tags.iter()
            .any(|tag| waiver_tags.iter().any(|waiver| waiver == tag))
    }
}

/// The ordered set of commits one ref update introduces, oldest first.
#[derive(Debug, Clone)]
pub struct CommitList {
    pub ref_name: String,
    pub commits: Vec<Arc<Commit>>,
    pub is_tag: bool,
}

impl CommitList {
    /// Target description used in report headers, e.g.
    /// `1a2b3c4d..9f8e7d6c (refs/heads/main)`.
    pub fn description(&self) -> String {
        match (self.commits.first(), self.commits.last()) {
            (Some(first), Some(last)) if self.commits.len() > 1 => {
                format!("{}..{} ({})", first.short_id(), last.short_id(), self.ref_name)
            }
            (Some(first), _) => format!("{} ({})", first.short_id(), self.ref_name),
            _ => format!("({})", self.ref_name),
        }
    }
}

/// How a file changed relative to the commit's first parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One entry of a commit's first-parent diff.
#[derive(Debug, Clone)]
pub struct ChangedFile {
    pub path: String,
    pub old_mode: u32,
    pub new_mode: u32,
    pub old_blob: Oid,
    pub new_blob: Oid,
    pub change_type: ChangeType,
}

const MODE_KIND_MASK: u32 = 0o170000;
const MODE_SYMLINK: u32 = 0o120000;

impl ChangedFile {
    /// Only additions and modifications carry content worth checking.
    pub fn checkable(&self) -> bool {
        matches!(self.change_type, ChangeType::Added | ChangeType::Modified)
    }

    pub fn is_symlink(&self) -> bool {
        self.new_mode & MODE_KIND_MASK == MODE_SYMLINK
    }

    pub fn is_executable(&self) -> bool {
        self.new_mode & MODE_KIND_MASK != MODE_SYMLINK && self.new_mode & 0o100 != 0
    }

    pub fn filename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn extension(&self) -> Option<&str> {
        let name = self.filename();
        match name.rfind('.') {
            Some(idx) if idx > 0 && idx + 1 < name.len() => Some(&name[idx + 1..]),
            _ => None,
        }
    }

    /// File stem without the extension.
    pub fn stem(&self) -> &str {
        let name = self.filename();
        match self.extension() {
            Some(ext) => &name[..name.len() - ext.len() - 1],
            None => name,
        }
    }

    /// Files under a templates directory carry placeholder syntax no checker
    /// understands.
    pub fn in_templates(&self) -> bool {
        self.path.split('/').any(|segment| segment == "templates")
    }

    /// Report target description, e.g. `src/main.py at 1a2b3c4d`.
    pub fn describe(&self, commit: &Commit) -> String {
        format!("{} at {}", self.path, commit.short_id())
    }
}
