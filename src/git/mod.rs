//! Git query layer
//!
//! Read-only access to the object store behind the `GitQuery` trait. The
//! production backend wraps `git2::Repository`; tests fabricate a backend
//! instead of preparing on-disk repositories. Commits and blobs are
//! memoized per invocation so an object is fetched at most once even when
//! several pushed refs reach it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use git2::{Oid, Repository, Sort};
use thiserror::Error;
use tracing::debug;

pub mod commit;
pub mod refs;

use commit::{ChangeType, ChangedFile, Commit, Contribution};
use refs::RefUpdate;

/// Cap on the revision walk when a ref is pushed for the first time, so the
/// initial link of a large repository does not replay its full history.
pub const NEW_REF_COMMIT_CAP: usize = 512;

#[derive(Debug, Error)]
pub enum GitError {
    /// Fatal for the current ref update only; other updates continue.
    #[error("object {0} not found in repository")]
    ObjectNotFound(Oid),
    #[error(transparent)]
    Backend(#[from] git2::Error),
}

/// Read-only queries the ref/commit model and the checks need.
pub trait GitQuery {
    /// Resolve a commit (peeling annotated tags), memoized by oid.
    fn commit(&self, oid: Oid) -> Result<Arc<Commit>, GitError>;

    /// Oids introduced by a ref update, oldest first.
    fn new_commits(&self, update: &RefUpdate) -> Result<Vec<Oid>, GitError>;

    /// First-parent diff of a commit (root commits diff against the empty
    /// tree). Rewrites and renames surface as additions.
    fn changed_files(&self, commit: &Commit) -> Result<Vec<ChangedFile>, GitError>;

    /// Paths changed between one specific parent and the commit, for the
    /// misleading-merge check.
    fn changed_paths_against(&self, commit: &Commit, parent: Oid) -> Result<Vec<String>, GitError>;

    /// Blob content, memoized by oid.
    fn blob(&self, oid: Oid) -> Result<Arc<[u8]>, GitError>;

    /// Whether any entry exists at `path` in the commit's tree.
    fn tree_has_path(&self, commit: &Commit, path: &str) -> Result<bool, GitError>;

    /// Blob content at `path` in the commit's tree, if the entry is a blob.
    fn tree_blob(&self, commit: &Commit, path: &str) -> Result<Option<Arc<[u8]>>, GitError>;

    /// Whether `ancestor` is reachable from `descendant`.
    fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool, GitError>;
}

/// Production backend over a (possibly bare) repository.
pub struct Repo {
    inner: Repository,
    commits: RefCell<HashMap<Oid, Arc<Commit>>>,
    blobs: RefCell<HashMap<Oid, Arc<[u8]>>>,
}

impl Repo {
    /// Open the repository the hook was invoked for: `$GIT_DIR` when git
    /// exported it, discovery from the working directory otherwise.
    pub fn open() -> Result<Self, GitError> {
        let inner = Repository::open_from_env().or_else(|_| Repository::discover("."))?;
        Ok(Self {
            inner,
            commits: RefCell::new(HashMap::new()),
            blobs: RefCell::new(HashMap::new()),
        })
    }

    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let inner = Repository::discover(path.as_ref())?;
        Ok(Self {
            inner,
            commits: RefCell::new(HashMap::new()),
            blobs: RefCell::new(HashMap::new()),
        })
    }

    fn not_found(oid: Oid) -> impl FnOnce(git2::Error) -> GitError {
        move |err| {
            if err.code() == git2::ErrorCode::NotFound {
                GitError::ObjectNotFound(oid)
            } else {
                GitError::Backend(err)
            }
        }
    }

    fn contribution(signature: &git2::Signature<'_>) -> Contribution {
        Contribution {
            name: String::from_utf8_lossy(signature.name_bytes()).into_owned(),
            email: String::from_utf8_lossy(signature.email_bytes()).into_owned(),
            timestamp: signature.when().seconds(),
        }
    }

    fn diff_trees(
        &self,
        old_tree: Option<&git2::Tree<'_>>,
        new_tree: &git2::Tree<'_>,
    ) -> Result<git2::Diff<'_>, GitError> {
        let mut options = git2::DiffOptions::new();
        options.include_typechange(true);
        let diff = self
            .inner
            .diff_tree_to_tree(old_tree, Some(new_tree), Some(&mut options))?;
        Ok(diff)
    }
}

fn mode_bits(mode: git2::FileMode) -> u32 {
    match mode {
        git2::FileMode::Unreadable => 0,
        git2::FileMode::Tree => 0o040000,
        git2::FileMode::Blob => 0o100644,
        git2::FileMode::BlobGroupWritable => 0o100664,
        git2::FileMode::BlobExecutable => 0o100755,
        git2::FileMode::Link => 0o120000,
        git2::FileMode::Commit => 0o160000,
    }
}

fn change_type(status: git2::Delta) -> Option<ChangeType> {
    match status {
        git2::Delta::Added | git2::Delta::Copied => Some(ChangeType::Added),
        git2::Delta::Modified | git2::Delta::Typechange => Some(ChangeType::Modified),
        git2::Delta::Deleted => Some(ChangeType::Deleted),
        git2::Delta::Renamed => Some(ChangeType::Renamed),
        _ => None,
    }
}

impl GitQuery for Repo {
    fn commit(&self, oid: Oid) -> Result<Arc<Commit>, GitError> {
        if let Some(cached) = self.commits.borrow().get(&oid) {
            return Ok(cached.clone());
        }
        let object = self
            .inner
            .find_object(oid, None)
            .map_err(Self::not_found(oid))?;
        let raw = object.peel_to_commit().map_err(Self::not_found(oid))?;
        let commit = Arc::new(Commit {
            oid: raw.id(),
            parents: raw.parent_ids().collect(),
            tree: raw.tree_id(),
            author: Self::contribution(&raw.author()),
            committer: Self::contribution(&raw.committer()),
            message: String::from_utf8_lossy(raw.message_bytes()).into_owned(),
        });
        self.commits.borrow_mut().insert(oid, commit.clone());
        Ok(commit)
    }

    fn new_commits(&self, update: &RefUpdate) -> Result<Vec<Oid>, GitError> {
        let mut walk = self.inner.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
        walk.push(update.new).map_err(Self::not_found(update.new))?;
        if update.old.is_zero() {
            // First push of this ref: everything not already reachable from
            // an existing ref is new.
            walk.hide_glob("refs/*")?;
        } else {
            walk.hide(update.old).map_err(Self::not_found(update.old))?;
        }
        let mut oids = walk.collect::<Result<Vec<_>, _>>()?;
        if update.old.is_zero() && oids.len() > NEW_REF_COMMIT_CAP {
            debug!(
                ref_name = %update.ref_name,
                total = oids.len(),
                cap = NEW_REF_COMMIT_CAP,
                "truncating first-push walk to the newest commits"
            );
            oids = oids.split_off(oids.len() - NEW_REF_COMMIT_CAP);
        }
        Ok(oids)
    }

    fn changed_files(&self, commit: &Commit) -> Result<Vec<ChangedFile>, GitError> {
        let new_tree = self
            .inner
            .find_tree(commit.tree)
            .map_err(Self::not_found(commit.tree))?;
        let old_tree = match commit.parents.first() {
            Some(&parent_oid) => {
                let parent = self.commit(parent_oid)?;
                Some(
                    self.inner
                        .find_tree(parent.tree)
                        .map_err(Self::not_found(parent.tree))?,
                )
            }
            None => None,
        };
        let diff = self.diff_trees(old_tree.as_ref(), &new_tree)?;

        let mut changed = Vec::new();
        for delta in diff.deltas() {
            let Some(change_type) = change_type(delta.status()) else {
                continue;
            };
            let new_mode = mode_bits(delta.new_file().mode());
            // Submodule pointers have no blob content to check.
            if new_mode & 0o170000 == 0o160000 {
                continue;
            }
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            changed.push(ChangedFile {
                path,
                old_mode: mode_bits(delta.old_file().mode()),
                new_mode,
                old_blob: delta.old_file().id(),
                new_blob: delta.new_file().id(),
                change_type,
            });
        }
        Ok(changed)
    }

    fn changed_paths_against(&self, commit: &Commit, parent: Oid) -> Result<Vec<String>, GitError> {
        let parent_commit = self.commit(parent)?;
        let old_tree = self
            .inner
            .find_tree(parent_commit.tree)
            .map_err(Self::not_found(parent_commit.tree))?;
        let new_tree = self
            .inner
            .find_tree(commit.tree)
            .map_err(Self::not_found(commit.tree))?;
        let diff = self.diff_trees(Some(&old_tree), &new_tree)?;
        let paths = diff
            .deltas()
            .filter_map(|delta| delta.new_file().path().or_else(|| delta.old_file().path()))
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        Ok(paths)
    }

    fn blob(&self, oid: Oid) -> Result<Arc<[u8]>, GitError> {
        if let Some(cached) = self.blobs.borrow().get(&oid) {
            return Ok(cached.clone());
        }
        let blob = self.inner.find_blob(oid).map_err(Self::not_found(oid))?;
        let content: Arc<[u8]> = Arc::from(blob.content());
        self.blobs.borrow_mut().insert(oid, content.clone());
        Ok(content)
    }

    fn tree_has_path(&self, commit: &Commit, path: &str) -> Result<bool, GitError> {
        let tree = self
            .inner
            .find_tree(commit.tree)
            .map_err(Self::not_found(commit.tree))?;
        Ok(tree.get_path(Path::new(path)).is_ok())
    }

    fn tree_blob(&self, commit: &Commit, path: &str) -> Result<Option<Arc<[u8]>>, GitError> {
        let tree = self
            .inner
            .find_tree(commit.tree)
            .map_err(Self::not_found(commit.tree))?;
        let Ok(entry) = tree.get_path(Path::new(path)) else {
            return Ok(None);
        };
        if entry.kind() != Some(git2::ObjectType::Blob) {
            return Ok(None);
        }
        Ok(Some(self.blob(entry.id())?))
    }

    fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool, GitError> {
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self.inner.graph_descendant_of(descendant, ancestor)?)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Fabricated backend for unit tests: commits, blobs and diffs are
    //! declared up front, no repository on disk.

    use super::*;
    use std::collections::HashSet;

    pub fn oid(n: u64) -> Oid {
        // The counter lands in the leading bytes so short ids stay distinct.
        Oid::from_str(&format!("{n:08x}{:032x}", 0)).unwrap()
    }

    #[derive(Default)]
    pub struct FakeGit {
        pub commits: HashMap<Oid, Arc<Commit>>,
        pub blobs: HashMap<Oid, Arc<[u8]>>,
        pub changed: HashMap<Oid, Vec<ChangedFile>>,
        pub parent_paths: HashMap<(Oid, Oid), Vec<String>>,
        pub tree_paths: HashMap<Oid, HashSet<String>>,
        pub ref_tips: HashSet<Oid>,
    }

    impl FakeGit {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_commit(&mut self, n: u64, parents: &[u64], message: &str) -> Oid {
            let commit_oid = oid(n);
            let contribution = Contribution {
                name: "Alex Doe".to_string(),
                email: "alex@example.com".to_string(),
                timestamp: 1_700_000_000 + n as i64,
            };
            self.commits.insert(
                commit_oid,
                Arc::new(Commit {
                    oid: commit_oid,
                    parents: parents.iter().map(|&p| oid(p)).collect(),
                    tree: Oid::zero(),
                    author: contribution.clone(),
                    committer: contribution,
                    message: message.to_string(),
                }),
            );
            commit_oid
        }

        pub fn add_blob(&mut self, n: u64, content: &[u8]) -> Oid {
            let blob_oid = oid(n);
            self.blobs.insert(blob_oid, Arc::from(content));
            blob_oid
        }

        pub fn add_file(&mut self, commit: u64, path: &str, blob: u64, mode: u32) {
            let file = ChangedFile {
                path: path.to_string(),
                old_mode: 0,
                new_mode: mode,
                old_blob: Oid::zero(),
                new_blob: oid(blob),
                change_type: ChangeType::Added,
            };
            self.changed.entry(oid(commit)).or_default().push(file);
            self.tree_paths
                .entry(oid(commit))
                .or_default()
                .insert(path.to_string());
        }
    }

    impl GitQuery for FakeGit {
        fn commit(&self, commit_oid: Oid) -> Result<Arc<Commit>, GitError> {
            self.commits
                .get(&commit_oid)
                .cloned()
                .ok_or(GitError::ObjectNotFound(commit_oid))
        }

        fn new_commits(&self, update: &RefUpdate) -> Result<Vec<Oid>, GitError> {
            let mut found = Vec::new();
            let mut pending = vec![update.new];
            let mut visited = HashSet::new();
            while let Some(current) = pending.pop() {
                if current == update.old
                    || self.ref_tips.contains(&current)
                    || !visited.insert(current)
                {
                    continue;
                }
                let commit = self.commit(current)?;
                found.push(current);
                pending.extend(commit.parents.iter().copied());
            }
            found.sort_by_key(|commit_oid| {
                self.commits
                    .get(commit_oid)
                    .map(|c| c.committer.timestamp)
                    .unwrap_or(0)
            });
            Ok(found)
        }

        fn changed_files(&self, commit: &Commit) -> Result<Vec<ChangedFile>, GitError> {
            Ok(self.changed.get(&commit.oid).cloned().unwrap_or_default())
        }

        fn changed_paths_against(
            &self,
            commit: &Commit,
            parent: Oid,
        ) -> Result<Vec<String>, GitError> {
            Ok(self
                .parent_paths
                .get(&(commit.oid, parent))
                .cloned()
                .unwrap_or_default())
        }

        fn blob(&self, blob_oid: Oid) -> Result<Arc<[u8]>, GitError> {
            self.blobs
                .get(&blob_oid)
                .cloned()
                .ok_or(GitError::ObjectNotFound(blob_oid))
        }

        fn tree_has_path(&self, commit: &Commit, path: &str) -> Result<bool, GitError> {
            Ok(self
                .tree_paths
                .get(&commit.oid)
                .is_some_and(|paths| paths.contains(path)))
        }

        fn tree_blob(&self, commit: &Commit, path: &str) -> Result<Option<Arc<[u8]>>, GitError> {
            if !self.tree_has_path(commit, path)? {
                return Ok(None);
            }
            // Tests register tree blobs under the same oid space as blobs;
            // look the path up indirectly through the changed-file table.
            let blob = self
                .changed
                .get(&commit.oid)
                .and_then(|files| files.iter().find(|f| f.path == path))
                .and_then(|f| self.blobs.get(&f.new_blob).cloned());
            Ok(blob)
        }

        fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool, GitError> {
            let mut pending = vec![descendant];
            let mut visited = HashSet::new();
            while let Some(current) = pending.pop() {
                if current == ancestor {
                    return Ok(true);
                }
                if !visited.insert(current) {
                    continue;
                }
                if let Some(commit) = self.commits.get(&current) {
                    pending.extend(commit.parents.iter().copied());
                }
            }
            Ok(false)
        }
    }
}
