//! Pushed-ref model
//!
//! Parses the `<old> <new> <ref>` lines the pre-receive hook receives on
//! stdin and materializes the list of newly introduced commits per ref.

use std::collections::HashSet;
use std::io::BufRead;

use git2::Oid;
use tracing::{debug, warn};

use super::commit::CommitList;
use super::{GitError, GitQuery};

/// One ref update from the push input. The zero oid marks ref creation
/// (`old`) or deletion (`new`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub old: Oid,
    pub new: Oid,
    pub ref_name: String,
}

impl RefUpdate {
    /// Parse one input line; `None` for anything malformed.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let old = Oid::from_str(fields.next()?).ok()?;
        let new = Oid::from_str(fields.next()?).ok()?;
        let ref_name = fields.next()?.to_string();
        if fields.next().is_some() {
            return None;
        }
        Some(Self { old, new, ref_name })
    }

    /// Only `refs/<kind>/<name>` updates are understood; anything else is
    /// passed through unchecked.
    pub fn relevant(&self) -> bool {
        let mut segments = self.ref_name.splitn(3, '/');
        segments.next() == Some("refs")
            && segments.next().is_some_and(|s| !s.is_empty())
            && segments.next().is_some_and(|s| !s.is_empty())
    }

    pub fn is_tag(&self) -> bool {
        self.ref_name.starts_with("refs/tags/")
    }

    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }

    pub fn is_create(&self) -> bool {
        self.old.is_zero()
    }
}

/// Read every ref-update line from the hook's stdin. Malformed lines are
/// logged and skipped rather than failing the push.
pub fn read_updates(reader: impl BufRead) -> std::io::Result<Vec<RefUpdate>> {
    let mut updates = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match RefUpdate::parse(&line) {
            Some(update) => updates.push(update),
            None => warn!(line, "ignoring malformed ref-update line"),
        }
    }
    Ok(updates)
}

/// Materialize the commit list for one ref update.
///
/// Commits already claimed by an earlier list in the same push are skipped,
/// so every commit is checked at most once per invocation. Tag refs carry
/// only the tagged commit and are marked so the driver restricts them to
/// list-level checks.
pub fn build_commit_list(
    git: &dyn GitQuery,
    update: &RefUpdate,
    seen: &mut HashSet<Oid>,
) -> Result<CommitList, GitError> {
    let mut list = CommitList {
        ref_name: update.ref_name.clone(),
        commits: Vec::new(),
        is_tag: update.is_tag(),
    };

    if update.is_tag() {
        list.commits.push(git.commit(update.new)?);
        return Ok(list);
    }

    if !update.is_create() && !git.is_ancestor(update.old, update.new).unwrap_or(true) {
        debug!(ref_name = %update.ref_name, "non-fast-forward update");
    }

    for oid in git.new_commits(update)? {
        if !seen.insert(oid) {
            continue;
        }
        list.commits.push(git.commit(oid)?);
    }
    debug!(
        ref_name = %update.ref_name,
        commits = list.commits.len(),
        "materialized commit list"
    );
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::fake::{oid, FakeGit};

    const ZERO: &str = "0000000000000000000000000000000000000000";

    #[test]
    fn parse_valid_line() {
        let line = format!("{ZERO} {} refs/heads/main", oid(7));
        let update = RefUpdate::parse(&line).unwrap();
        assert!(update.is_create());
        assert!(!update.is_delete());
        assert!(update.relevant());
        assert!(!update.is_tag());
        assert_eq!(update.new, oid(7));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(RefUpdate::parse("not a ref line"), None);
        assert_eq!(RefUpdate::parse(""), None);
        assert_eq!(
            RefUpdate::parse(&format!("{ZERO} {ZERO} refs/heads/main extra")),
            None
        );
    }

    #[test]
    fn non_ref_paths_are_irrelevant() {
        let update = RefUpdate::parse(&format!("{ZERO} {:040x} HEAD", 1)).unwrap();
        assert!(!update.relevant());
        let update = RefUpdate::parse(&format!("{ZERO} {:040x} refs/stash", 1)).unwrap();
        assert!(!update.relevant());
    }

    #[test]
    fn identical_updates_build_identical_lists() {
        let mut git = FakeGit::new();
        git.add_commit(1, &[], "Add base\n");
        git.add_commit(2, &[1], "Add feature\n");
        let update = RefUpdate {
            old: oid(1),
            new: oid(2),
            ref_name: "refs/heads/main".to_string(),
        };

        let first = build_commit_list(&git, &update, &mut HashSet::new()).unwrap();
        let second = build_commit_list(&git, &update, &mut HashSet::new()).unwrap();
        let ids = |list: &CommitList| list.commits.iter().map(|c| c.oid).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(ids(&first), vec![oid(2)]);
    }

    #[test]
    fn commits_are_claimed_once_across_refs() {
        let mut git = FakeGit::new();
        git.add_commit(1, &[], "Add base\n");
        git.add_commit(2, &[1], "Add feature\n");
        let mut seen = HashSet::new();

        let first = build_commit_list(
            &git,
            &RefUpdate {
                old: oid(1),
                new: oid(2),
                ref_name: "refs/heads/main".to_string(),
            },
            &mut seen,
        )
        .unwrap();
        assert_eq!(first.commits.len(), 1);

        let second = build_commit_list(
            &git,
            &RefUpdate {
                old: oid(1),
                new: oid(2),
                ref_name: "refs/heads/backup".to_string(),
            },
            &mut seen,
        )
        .unwrap();
        assert!(second.commits.is_empty());
    }

    #[test]
    fn new_ref_walk_stops_at_existing_refs() {
        let mut git = FakeGit::new();
        git.add_commit(1, &[], "Add base\n");
        git.add_commit(2, &[1], "Add feature\n");
        git.ref_tips.insert(oid(1));

        let update = RefUpdate {
            old: Oid::zero(),
            new: oid(2),
            ref_name: "refs/heads/feature".to_string(),
        };
        let list = build_commit_list(&git, &update, &mut HashSet::new()).unwrap();
        let ids: Vec<_> = list.commits.iter().map(|c| c.oid).collect();
        assert_eq!(ids, vec![oid(2)]);
    }

    #[test]
    fn tag_updates_carry_only_the_tagged_commit() {
        let mut git = FakeGit::new();
        git.add_commit(1, &[], "Add base\n");
        git.add_commit(2, &[1], "Add feature\n");
        let update = RefUpdate {
            old: Oid::zero(),
            new: oid(2),
            ref_name: "refs/tags/v1.0".to_string(),
        };
        let list = build_commit_list(&git, &update, &mut HashSet::new()).unwrap();
        assert!(list.is_tag);
        assert_eq!(list.commits.len(), 1);
        assert_eq!(list.commits[0].oid, oid(2));
    }
}
