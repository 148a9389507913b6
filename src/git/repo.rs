use std::collections::VecDeque;

use gix_hash::ObjectId;

use crate::git::object::{Commit, Tree};
use crate::git::store::{ObjectStore, WriterError};
use crate::svn;
use crate::FHashMap;

pub(crate) type BranchId = usize;

/// A named target in the output repository, optionally derived from a path
/// prefix of the source tree.
pub(crate) struct Branch {
    pub(crate) name: String,
    pub(crate) prefix: Option<Vec<u8>>,
    pub(crate) is_tag: bool,
    /// Last written commit of the branch.
    pub(crate) commit: Option<BranchTip>,
    /// Commit under construction for the current revision, if any.
    pub(crate) next_commit: Option<Commit>,
}

impl Branch {
    pub(crate) fn new(name: String, prefix: Option<Vec<u8>>, is_tag: bool) -> Self {
        Self {
            name,
            prefix,
            is_tag,
            commit: None,
            next_commit: None,
        }
    }
}

/// The written tip of a branch: the commit identity plus its (shared) tree,
/// kept so the next commit can be cloned from it.
pub(crate) struct BranchTip {
    pub(crate) oid: ObjectId,
    pub(crate) tree: Tree,
}

/// Author and message applied to the commits of the revision being flushed.
#[derive(Clone)]
pub(crate) struct CommitMeta {
    pub(crate) signature: gix_actor::Signature,
    pub(crate) message: Vec<u8>,
}

impl Default for CommitMeta {
    fn default() -> Self {
        Self {
            signature: gix_actor::Signature {
                name: "unknown".into(),
                email: "unknown@unknown.org".into(),
                time: gix_date::Time {
                    seconds: 0,
                    offset: 0,
                    sign: gix_date::time::Sign::Plus,
                },
            },
            message: Vec::new(),
        }
    }
}

/// One output git repository: the branch arena with its two indices, the
/// queue of branches holding an in-flight commit, and the object store.
///
/// The primary repository has an empty `repo_name`; submodule repositories
/// carry their module path there for log messages.
pub(crate) struct Repository {
    pub(crate) repo_name: String,
    pub(crate) store: ObjectStore,
    branches: Vec<Branch>,
    by_name: FHashMap<String, BranchId>,
    by_path: FHashMap<Vec<u8>, BranchId>,
    queue: VecDeque<BranchId>,
}

impl Repository {
    pub(crate) fn open(path: &std::path::Path, repo_name: String) -> Result<Self, WriterError> {
        Ok(Self {
            repo_name,
            store: ObjectStore::open(path)?,
            branches: Vec::new(),
            by_name: FHashMap::default(),
            by_path: FHashMap::default(),
            queue: VecDeque::new(),
        })
    }

    #[inline]
    pub(crate) fn branch(&self, id: BranchId) -> &Branch {
        &self.branches[id]
    }

    /// Whether any path-prefixed branches are registered. When none are, the
    /// whole source tree maps to an implicit `master`.
    #[inline]
    pub(crate) fn has_path_branches(&self) -> bool {
        !self.by_path.is_empty()
    }

    /// Registers a branch. The caller is responsible for rejecting duplicate
    /// names and prefixes beforehand.
    pub(crate) fn add_branch(&mut self, branch: Branch) -> BranchId {
        let id = self.branches.len();
        let prev = self.by_name.insert(branch.name.clone(), id);
        debug_assert!(prev.is_none(), "duplicate branch name {:?}", branch.name);
        if let Some(prefix) = &branch.prefix {
            let prev = self.by_path.insert(prefix.clone(), id);
            debug_assert!(
                prev.is_none(),
                "duplicate branch prefix \"{}\"",
                prefix.escape_ascii(),
            );
        }
        self.branches.push(branch);
        id
    }

    pub(crate) fn branch_by_name(&self, name: &str) -> Option<BranchId> {
        self.by_name.get(name).copied()
    }

    /// Existing branch of that name, or a fresh unprefixed one.
    pub(crate) fn branch_by_name_or_insert(&mut self, name: &str) -> BranchId {
        match self.by_name.get(name) {
            Some(&id) => id,
            None => self.add_branch(Branch::new(name.to_string(), None, false)),
        }
    }

    /// Branch holding `path`: the deepest registered prefix on the ancestor
    /// chain. Falls back to an implicit `master` when no prefixed branches
    /// are configured at all.
    pub(crate) fn branch_by_path(&mut self, path: &[u8]) -> Option<BranchId> {
        if self.by_path.is_empty() {
            return Some(self.branch_by_name_or_insert("master"));
        }
        svn::path::self_and_ancestors(path)
            .find_map(|ancestor| self.by_path.get(ancestor))
            .copied()
    }

    /// The in-flight commit of a branch, creating (and queueing) it if the
    /// branch does not have one yet.
    ///
    /// A branch with a prior commit continues from it: the new commit gets
    /// the prior commit as parent and a shallow copy of its tree. A branch
    /// without one is new; when `from_branch` is given and has a commit, the
    /// new commit is cloned from there instead and marked `new_branch`,
    /// which is what turns a directory copy into a branch fork in the
    /// output history. Otherwise the commit starts parentless.
    pub(crate) fn get_commit(
        &mut self,
        branch_id: BranchId,
        from_branch: Option<BranchId>,
    ) -> &mut Commit {
        if self.branches[branch_id].next_commit.is_none() {
            let next_commit = if let Some(tip) = &self.branches[branch_id].commit {
                let mut commit = Commit::new(Some(tip.oid));
                commit.tree = Some(tip.tree.clone());
                commit
            } else if let Some(from_tip) =
                from_branch.and_then(|from| self.branches[from].commit.as_ref())
            {
                let mut commit = Commit::new(Some(from_tip.oid));
                commit.tree = Some(from_tip.tree.clone());
                commit.new_branch = true;
                commit
            } else {
                Commit::new(None)
            };
            self.branches[branch_id].next_commit = Some(next_commit);
            self.queue.push_back(branch_id);
        }
        self.branches[branch_id].next_commit.as_mut().unwrap()
    }

    /// Flushes the commit queue at a revision boundary. Commits that still
    /// hold a tree are finalized with `meta` and written; a branch whose
    /// pending commit was emptied has been deleted in this revision, which
    /// is preserved as a `<branch>__deleted_r<rev>` tag on its last commit.
    ///
    /// Returns whether any branch received a commit.
    pub(crate) fn write_queue(
        &mut self,
        rev: u32,
        meta: &CommitMeta,
    ) -> Result<bool, WriterError> {
        let mut branches_modified = 0_usize;
        while let Some(branch_id) = self.queue.pop_front() {
            let Some(mut commit) = self.branches[branch_id].next_commit.take() else {
                continue;
            };

            if commit.has_tree() {
                commit.author = Some(meta.signature.clone());
                commit.message = meta.message.clone();
                let oid = commit.write(&self.store)?;
                self.branches[branch_id].commit = Some(BranchTip {
                    oid,
                    tree: commit.tree.take().unwrap(),
                });
                branches_modified += 1;
            } else if let Some(tip) = self.branches[branch_id].commit.take() {
                let branch_name = self.branches[branch_id].name.clone();
                let tag_name = format!("{branch_name}__deleted_r{rev}");
                self.create_tag(tip.oid, &tag_name, meta)?;
                let is_tag = self.branches[branch_id].is_tag;
                self.store.delete_ref(&branch_name, is_tag)?;
                tracing::info!("r{rev}: branch {branch_name} deleted, tagged {tag_name}");
            }
        }
        Ok(branches_modified > 0)
    }

    /// Writes the ref of every branch that has a commit.
    pub(crate) fn write_branches(&mut self) -> Result<(), WriterError> {
        for branch in &self.branches {
            if let Some(tip) = &branch.commit {
                self.store.create_ref(&branch.name, tip.oid, branch.is_tag)?;
            }
        }
        Ok(())
    }

    /// Writes an annotated tag object pointing at a commit, plus its ref.
    pub(crate) fn create_tag(
        &self,
        commit_oid: ObjectId,
        name: &str,
        meta: &CommitMeta,
    ) -> Result<(), WriterError> {
        let tag = gix_object::Tag {
            target: commit_oid,
            target_kind: gix_object::Kind::Commit,
            name: name.into(),
            tagger: Some(meta.signature.clone()),
            message: format!("{name}\n").into(),
            pgp_signature: None,
        };
        let tag_oid = self.store.put(&tag)?;
        self.store.create_ref(name, tag_oid, true)
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{Branch, CommitMeta, Repository};
    use crate::git::object::Object;

    fn scratch_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path(), String::new()).unwrap();
        (dir, repo)
    }

    fn meta() -> CommitMeta {
        CommitMeta::default()
    }

    #[test]
    fn implicit_master_without_configured_branches() {
        let (_dir, mut repo) = scratch_repo();
        let id = repo.branch_by_path(b"any/path/at/all").unwrap();
        assert_eq!(repo.branch(id).name, "master");
        // repeat lookups hit the same branch
        assert_eq!(repo.branch_by_path(b"other"), Some(id));
    }

    #[test]
    fn deepest_prefix_wins() {
        let (_dir, mut repo) = scratch_repo();
        let trunk = repo.add_branch(Branch::new("master".into(), Some(b"trunk".to_vec()), false));
        let nested = repo.add_branch(Branch::new(
            "vendor".into(),
            Some(b"trunk/vendor".to_vec()),
            false,
        ));

        assert_eq!(repo.branch_by_path(b"trunk/a.c"), Some(trunk));
        assert_eq!(repo.branch_by_path(b"trunk/vendor/lib.c"), Some(nested));
        assert_eq!(repo.branch_by_path(b"trunk"), Some(trunk));
        assert_eq!(repo.branch_by_path(b"branches/x"), None);
    }

    #[test]
    fn get_commit_queues_once() {
        let (_dir, mut repo) = scratch_repo();
        let id = repo.add_branch(Branch::new("master".into(), None, false));

        let blob = repo
            .store
            .create_blob(b"a.c".to_vec(), b"x\n", false)
            .unwrap();
        repo.get_commit(id, None).update(b"a.c", Object::Blob(blob));
        assert_eq!(repo.queue_len(), 1);

        // a second acquisition returns the same pending commit
        let blob = repo
            .store
            .create_blob(b"b.c".to_vec(), b"y\n", false)
            .unwrap();
        repo.get_commit(id, None).update(b"b.c", Object::Blob(blob));
        assert_eq!(repo.queue_len(), 1);

        let modified = repo.write_queue(1, &meta()).unwrap();
        assert!(modified);
        assert_eq!(repo.queue_len(), 0);
        assert!(repo.branch(id).next_commit.is_none());
        assert!(repo.branch(id).commit.is_some());
    }

    #[test]
    fn second_commit_has_first_as_parent() {
        let (_dir, mut repo) = scratch_repo();
        let id = repo.add_branch(Branch::new("master".into(), None, false));

        let blob = repo
            .store
            .create_blob(b"a.c".to_vec(), b"x\n", false)
            .unwrap();
        repo.get_commit(id, None).update(b"a.c", Object::Blob(blob));
        repo.write_queue(1, &meta()).unwrap();
        let first_oid = repo.branch(id).commit.as_ref().unwrap().oid;

        let blob = repo
            .store
            .create_blob(b"b.c".to_vec(), b"y\n", false)
            .unwrap();
        let commit = repo.get_commit(id, None);
        assert_eq!(commit.parent, Some(first_oid));
        assert!(!commit.new_branch);
        commit.update(b"b.c", Object::Blob(blob));
        repo.write_queue(2, &meta()).unwrap();
        assert_ne!(repo.branch(id).commit.as_ref().unwrap().oid, first_oid);
    }

    #[test]
    fn branch_fork_clones_from_branch() {
        let (_dir, mut repo) = scratch_repo();
        let master = repo.add_branch(Branch::new("master".into(), Some(b"trunk".to_vec()), false));
        let feature = repo.add_branch(Branch::new(
            "feature".into(),
            Some(b"branches/feature".to_vec()),
            false,
        ));

        let blob = repo
            .store
            .create_blob(b"a.c".to_vec(), b"x\n", false)
            .unwrap();
        repo.get_commit(master, None)
            .update(b"a.c", Object::Blob(blob));
        repo.write_queue(1, &meta()).unwrap();
        let master_oid = repo.branch(master).commit.as_ref().unwrap().oid;

        let commit = repo.get_commit(feature, Some(master));
        assert_eq!(commit.parent, Some(master_oid));
        assert!(commit.new_branch);
        assert!(commit.lookup(b"a.c").is_some());
    }

    #[test]
    fn emptied_branch_becomes_deletion_tag() {
        let (dir, mut repo) = scratch_repo();
        let id = repo.add_branch(Branch::new("feature".into(), None, false));

        let blob = repo
            .store
            .create_blob(b"a.c".to_vec(), b"x\n", false)
            .unwrap();
        repo.get_commit(id, None).update(b"a.c", Object::Blob(blob));
        repo.write_queue(2, &meta()).unwrap();
        repo.write_branches().unwrap();
        let tip_oid = repo.branch(id).commit.as_ref().unwrap().oid;

        repo.get_commit(id, None).remove(b"a.c");
        let modified = repo.write_queue(3, &meta()).unwrap();
        assert!(!modified);
        assert!(repo.branch(id).commit.is_none());
        assert!(repo.branch(id).next_commit.is_none());

        let tag_ref = dir.path().join(".git/refs/tags/feature__deleted_r3");
        assert!(tag_ref.is_file());
        assert!(!dir.path().join(".git/refs/heads/feature").exists());
        let _ = tip_oid;
    }
}
