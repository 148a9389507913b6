use crate::authors::Authors;
use crate::convert::router::Router;
use crate::convert::window::RevTreeWindow;
use crate::convert::ConvertError;
use crate::git::{Branch, BranchId, CommitMeta, Object, Repository, Tree};
use crate::svn;
use crate::svn::dump::{NodeAction, NodeKind, RevNode};

/// An auxiliary output repository mirroring a subset of the primary one.
pub(crate) struct Submodule {
    pub(crate) path: String,
    pub(crate) repository: Repository,
}

#[derive(Copy, Clone)]
enum Target {
    Primary,
    Module(usize),
}

/// Replays dump nodes revision by revision.
///
/// Keeps the historical mirror tree (as the `flat-history` branch), the
/// per-branch in-flight commits, and the window of past revision trees that
/// pending copy-from references still need. Commits are only written when a
/// node of a newer revision arrives (or at end of stream); until then the
/// whole working state lives in memory.
pub(crate) struct Converter<'a> {
    authors: &'a Authors,
    collect: Option<u32>,
    pub(crate) repository: Repository,
    history_branch: BranchId,
    pub(crate) submodules: Vec<Submodule>,
    router: Router,
    window: RevTreeWindow,
    last_rev: Option<u32>,
    meta: CommitMeta,
}

impl<'a> Converter<'a> {
    pub(crate) fn new(
        mut repository: Repository,
        authors: &'a Authors,
        collect: Option<u32>,
    ) -> Self {
        let history_branch =
            repository.add_branch(Branch::new("flat-history".into(), None, true));
        Self {
            authors,
            collect,
            repository,
            history_branch,
            submodules: Vec::new(),
            router: Router::new(),
            window: RevTreeWindow::new(),
            last_rev: None,
            meta: CommitMeta::default(),
        }
    }

    pub(crate) fn set_submodules(&mut self, submodules: Vec<Submodule>, router: Router) {
        self.submodules = submodules;
        self.router = router;
    }

    #[inline]
    pub(crate) fn last_rev(&self) -> Option<u32> {
        self.last_rev
    }

    #[inline]
    pub(crate) fn window_mut(&mut self) -> &mut RevTreeWindow {
        &mut self.window
    }

    /// Validation pass over a node; returns the number of problems found.
    /// Does not touch the output repository.
    pub(crate) fn prescan(&mut self, node: &RevNode) -> usize {
        let mut errors = 0;

        if !self.authors.is_empty() && self.authors.get(&node.meta.author).is_none() {
            tracing::warn!(
                "r{}: unrecognized author id: {}",
                node.rev,
                node.meta.author.escape_ascii(),
            );
            errors += 1;
        }

        if let Some(copy_from) = &node.copy_from {
            tracing::debug!("r{}: copy from r{}", node.rev, copy_from.rev);
            self.window.reserve(node.rev, copy_from.rev);
        }

        if self.repository.has_path_branches()
            && (node.action == NodeAction::Delete
                || node.kind == Some(NodeKind::File)
                || node.has_copy_from())
        {
            if self.repository.branch_by_path(&node.path).is_none() {
                tracing::warn!(
                    "r{}: could not find branch for \"{}\"",
                    node.rev,
                    node.path.escape_ascii(),
                );
                errors += 1;
            }
            if let Some(copy_from) = &node.copy_from {
                if self.repository.branch_by_path(&copy_from.path).is_none() {
                    tracing::warn!(
                        "r{}: could not find branch for \"{}\"",
                        node.rev,
                        copy_from.path.escape_ascii(),
                    );
                    errors += 1;
                }
            }
        }

        errors += verify_text(node);
        errors
    }

    /// Replays one node of the conversion pass.
    pub(crate) fn apply(&mut self, node: &RevNode) -> Result<(), ConvertError> {
        if node.path.is_empty() {
            return Ok(());
        }

        if self.last_rev != Some(node.rev) {
            self.advance_revision(node)?;
        }

        self.process_change(Target::Primary, &node.path, None, node)
    }

    /// Revision boundary: flush the queued commits, retain the historical
    /// tree if anything became visible in git, retire unneeded past trees,
    /// and pick up the new revision's author and log message.
    fn advance_revision(&mut self, node: &RevNode) -> Result<(), ConvertError> {
        let flushed_rev = self.last_rev.unwrap_or(0);

        let modified = self
            .repository
            .write_queue(flushed_rev, &self.meta)
            .map_err(|e| writer_err(flushed_rev, e))?;
        if modified {
            // The snapshot is what future copy-from references resolve
            // against, so it is taken before anything of the new revision
            // is applied.
            if let Some(tip) = self.repository.branch(self.history_branch).commit.as_ref() {
                self.window.insert(flushed_rev, tip.tree.clone());
            }
            if self.gc_due(node.rev) {
                self.repository
                    .write_branches()
                    .map_err(|e| writer_err(flushed_rev, e))?;
                self.repository
                    .store
                    .garbage_collect()
                    .map_err(|e| writer_err(flushed_rev, e))?;
            }
        }

        for module in &mut self.submodules {
            let modified = module
                .repository
                .write_queue(flushed_rev, &self.meta)
                .map_err(|e| writer_err(flushed_rev, e))?;
            if modified && self.collect.is_some_and(|n| n != 0 && node.rev % n == 0) {
                module
                    .repository
                    .write_branches()
                    .map_err(|e| writer_err(flushed_rev, e))?;
                module
                    .repository
                    .store
                    .garbage_collect()
                    .map_err(|e| writer_err(flushed_rev, e))?;
            }
        }

        self.window.free_past_trees(flushed_rev);

        self.establish_commit_info(node);
        self.last_rev = Some(node.rev);
        Ok(())
    }

    fn gc_due(&self, rev: u32) -> bool {
        self.collect.is_some_and(|n| n != 0 && rev % n == 0)
    }

    /// Author signature and commit message for the new revision. A revision
    /// without an author keeps the previous signature and message.
    fn establish_commit_info(&mut self, node: &RevNode) {
        let author_id = &node.meta.author;
        if author_id.is_empty() {
            return;
        }

        let (name, email) = match self.authors.get(author_id) {
            Some(author) => (author.name.clone(), author.email.clone()),
            None => {
                tracing::warn!(
                    "r{}: unrecognized author id: {}",
                    node.rev,
                    author_id.escape_ascii(),
                );
                (
                    String::from_utf8_lossy(author_id).into_owned(),
                    "unknown@unknown.org".into(),
                )
            }
        };

        let mut message = Vec::new();
        if let Some(log) = &node.meta.log {
            let trimmed = log.trim_ascii();
            if !trimmed.is_empty() {
                message.extend(trimmed);
                message.extend(b"\n\n");
            }
        }
        message.extend(format!("SVN-Revision: {}", node.rev).into_bytes());

        self.meta = CommitMeta {
            signature: gix_actor::Signature {
                name: name.into(),
                email: email.into(),
                time: gix_date::Time {
                    seconds: node.meta.date,
                    offset: 0,
                    sign: gix_date::time::Sign::Plus,
                },
            },
            message,
        };
    }

    fn repo_mut(&mut self, target: Target) -> &mut Repository {
        match target {
            Target::Primary => &mut self.repository,
            Target::Module(module) => &mut self.submodules[module].repository,
        }
    }

    fn process_change(
        &mut self,
        target: Target,
        path: &[u8],
        related_branch: Option<&str>,
        node: &RevNode,
    ) -> Result<(), ConvertError> {
        let changed = match (node.kind, node.action) {
            (Some(NodeKind::File), NodeAction::Add | NodeAction::Change) => {
                self.add_file(target, path, related_branch, node)?
            }
            (_, NodeAction::Delete) => self.delete_item(target, path, related_branch, node)?,
            (Some(NodeKind::Dir), NodeAction::Add) if node.has_copy_from() => {
                self.add_directory(target, path, related_branch, node)?
            }
            // Directory adds without copy-from are implicit in git; plain
            // directory changes and replaces carry nothing to replay.
            _ => false,
        };

        if !changed {
            tracing::debug!("r{}: change ignored: {}", node.rev, node.describe());
        }
        Ok(())
    }

    fn add_file(
        &mut self,
        target: Target,
        path: &[u8],
        related_branch: Option<&str>,
        node: &RevNode,
    ) -> Result<bool, ConvertError> {
        let debug_tag = if node.action == NodeAction::Add {
            "FA"
        } else {
            "FC"
        };

        if let Some(copy_from) = &node.copy_from {
            let obj = {
                let past_tree = self
                    .window
                    .past_tree(copy_from.rev, &copy_from.path)
                    .map_err(|e| {
                        tracing::error!("r{}: {e}", node.rev);
                        ConvertError
                    })?;
                let Some(found) = past_tree.lookup(&copy_from.path) else {
                    tracing::error!(
                        "r{}: could not find \"{}\" in tree r{}",
                        node.rev,
                        copy_from.path.escape_ascii(),
                        copy_from.rev,
                    );
                    return Err(ConvertError);
                };
                assert!(
                    found.is_blob(),
                    "directory found where file expected at \"{}\"",
                    copy_from.path.escape_ascii(),
                );
                found.copy_to_name(svn::path::file_name(path))
            };

            let from_branch = self.find_branch(target, &copy_from.path, related_branch);
            self.update_object(
                target,
                path,
                Some(obj),
                from_branch,
                related_branch,
                debug_tag,
                node,
            )?;
            Ok(true)
        } else if !(node.action == NodeAction::Change && node.text.is_none()) {
            let name = svn::path::file_name(path).to_vec();
            let text = node.text.as_deref().unwrap_or(b"");
            let executable = node.executable;
            let blob = self
                .repo_mut(target)
                .store
                .create_blob(name, text, executable)
                .map_err(|e| writer_err(node.rev, e))?;
            self.update_object(
                target,
                path,
                Some(Object::Blob(blob)),
                None,
                related_branch,
                debug_tag,
                node,
            )?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn add_directory(
        &mut self,
        target: Target,
        path: &[u8],
        related_branch: Option<&str>,
        node: &RevNode,
    ) -> Result<bool, ConvertError> {
        let copy_from = node.copy_from.as_ref().expect("checked by process_change");

        let obj = {
            let past_tree = self
                .window
                .past_tree(copy_from.rev, &copy_from.path)
                .map_err(|e| {
                    tracing::error!("r{}: {e}", node.rev);
                    ConvertError
                })?;
            // The source directory may have held no files at all, in which
            // case there is nothing to copy.
            let Some(found) = past_tree.lookup(&copy_from.path) else {
                return Ok(false);
            };
            assert!(
                found.is_tree(),
                "file found where directory expected at \"{}\"",
                copy_from.path.escape_ascii(),
            );
            found.copy_to_name(svn::path::file_name(path))
        };

        let from_branch = self.find_branch(target, &copy_from.path, related_branch);
        self.update_object(
            target,
            path,
            Some(obj),
            from_branch,
            related_branch,
            "DA",
            node,
        )?;
        Ok(true)
    }

    fn delete_item(
        &mut self,
        target: Target,
        path: &[u8],
        related_branch: Option<&str>,
        node: &RevNode,
    ) -> Result<bool, ConvertError> {
        self.update_object(target, path, None, None, related_branch, "?D", node)?;
        Ok(true)
    }

    /// Branch responsible for a path: the related branch by name when this
    /// change is mirrored into a submodule, the deepest path prefix
    /// otherwise.
    fn find_branch(
        &mut self,
        target: Target,
        path: &[u8],
        related_branch: Option<&str>,
    ) -> Option<BranchId> {
        let repo = self.repo_mut(target);
        match related_branch {
            Some(name) => Some(repo.branch_by_name_or_insert(name)),
            None => repo.branch_by_path(path),
        }
    }

    /// Applies one object change: to the historical mirror first, then to
    /// the branch the path routes to, then (for primary changes) to any
    /// submodule whose source prefix matches.
    fn update_object(
        &mut self,
        target: Target,
        path: &[u8],
        obj: Option<Object>,
        from_branch: Option<BranchId>,
        related_branch: Option<&str>,
        debug_tag: &str,
        node: &RevNode,
    ) -> Result<(), ConvertError> {
        let is_primary_route = matches!(target, Target::Primary) && related_branch.is_none();

        // The historical tree sees the change before the branch tree does,
        // so the snapshot taken at the end of the revision reflects every
        // change made during it. from_branch does not apply here; the
        // object was already copied from its source location.
        if is_primary_route {
            let history_branch = self.history_branch;
            let history_commit = self.repository.get_commit(history_branch, None);
            match &obj {
                Some(obj) => history_commit.update(path, obj.clone()),
                None => history_commit.remove(path),
            }
        }

        let branch_id = match self.find_branch(target, path, related_branch) {
            Some(id) => id,
            None => {
                tracing::error!(
                    "r{}: could not find branch for \"{}\"",
                    node.rev,
                    path.escape_ascii(),
                );
                return Err(ConvertError);
            }
        };

        let repo = match target {
            Target::Primary => &mut self.repository,
            Target::Module(module) => &mut self.submodules[module].repository,
        };
        let branch_name = repo.branch(branch_id).name.clone();

        tracing::info!(
            "r{}: {debug_tag}: \"{}\" <{branch_name}>{}",
            node.rev,
            path.escape_ascii(),
            if repo.repo_name.is_empty() {
                String::new()
            } else {
                format!(" {{{}}}", repo.repo_name)
            },
        );

        // Inside the branch the path loses the branch prefix, leaving the
        // empty path when the node addresses the branch root itself. A
        // change mirrored under a related branch was already rewritten.
        let branch_path: &[u8] = if related_branch.is_some() {
            path
        } else {
            match repo.branch(branch_id).prefix.as_deref() {
                Some(prefix) => svn::path::strip_prefix(prefix, path).unwrap_or(path),
                None => path,
            }
        };

        let branch_commit = repo.get_commit(branch_id, from_branch);
        match &obj {
            Some(obj) => {
                if branch_path.is_empty() {
                    // the branch root was copied wholesale; the copied
                    // subtree becomes the commit's tree
                    let Object::Tree(subtree) = obj else {
                        panic!(
                            "file copied onto branch root \"{}\"",
                            path.escape_ascii(),
                        );
                    };
                    let mut root = Tree::clone(subtree);
                    root.name = Vec::new();
                    branch_commit.tree = Some(root);
                } else {
                    branch_commit.update(branch_path, obj.clone());
                }
            }
            None => {
                if branch_path.is_empty() {
                    // the branch root was deleted; the emptied tree is what
                    // the queue flush recognizes as a branch deletion
                    branch_commit.tree = Some(Tree::new(Vec::new()));
                } else {
                    branch_commit.remove(branch_path);
                }
            }
        }

        if is_primary_route {
            if let Some((module, rewritten)) = self.router.route(path) {
                tracing::debug!(
                    "r{}: \"{}\" matched submodule {} -> \"{}\"",
                    node.rev,
                    path.escape_ascii(),
                    self.submodules[module].path,
                    rewritten.escape_ascii(),
                );
                self.process_change(
                    Target::Module(module),
                    &rewritten,
                    Some(&branch_name),
                    node,
                )?;
            }
        }

        Ok(())
    }

    /// Final flush at end of stream, refs, a last GC when configured, and
    /// the flat-history tag.
    pub(crate) fn finish(&mut self) -> Result<(), ConvertError> {
        let flushed_rev = self.last_rev.unwrap_or(0);

        self.repository
            .write_queue(flushed_rev, &self.meta)
            .map_err(|e| writer_err(flushed_rev, e))?;
        self.repository
            .write_branches()
            .map_err(|e| writer_err(flushed_rev, e))?;

        for module in &mut self.submodules {
            module
                .repository
                .write_queue(flushed_rev, &self.meta)
                .map_err(|e| writer_err(flushed_rev, e))?;
            module
                .repository
                .write_branches()
                .map_err(|e| writer_err(flushed_rev, e))?;
        }

        if self.collect.is_some() {
            self.repository
                .store
                .garbage_collect()
                .map_err(|e| writer_err(flushed_rev, e))?;
            for module in &self.submodules {
                module
                    .repository
                    .store
                    .garbage_collect()
                    .map_err(|e| writer_err(flushed_rev, e))?;
            }
        }

        if let Some(tip) = self.repository.branch(self.history_branch).commit.as_ref() {
            let tip_oid = tip.oid;
            self.repository
                .create_tag(tip_oid, "flat-history", &self.meta)
                .map_err(|e| writer_err(flushed_rev, e))?;
            tracing::info!("wrote tag flat-history");
        }

        Ok(())
    }
}

fn writer_err(rev: u32, e: crate::git::WriterError) -> ConvertError {
    tracing::error!("r{rev}: {e}");
    ConvertError
}

/// Compares a node's text against the checksums declared in the dump;
/// returns the number of mismatches.
pub(crate) fn verify_text(node: &RevNode) -> usize {
    let Some(text) = &node.text else { return 0 };
    let mut errors = 0;

    if let Some(declared) = &node.text_md5 {
        let computed = format!("{:x}", md5::compute(text));
        if computed.as_bytes() != declared.as_slice() {
            tracing::warn!(
                "r{}: MD5 mismatch for \"{}\": expected {}, got {computed}",
                node.rev,
                node.path.escape_ascii(),
                declared.escape_ascii(),
            );
            errors += 1;
        }
    }
    if let Some(declared) = &node.text_sha1 {
        use sha1::Digest as _;
        let computed = hex::encode(sha1::Sha1::digest(text));
        if computed.as_bytes() != declared.as_slice() {
            tracing::warn!(
                "r{}: SHA1 mismatch for \"{}\": expected {}, got {computed}",
                node.rev,
                node.path.escape_ascii(),
                declared.escape_ascii(),
            );
            errors += 1;
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::{Converter, Submodule};
    use crate::authors::Authors;
    use crate::convert::router::Router;
    use crate::git::{Branch, Object, Repository};
    use crate::svn::dump::{NodeAction, NodeCopyFrom, NodeKind, RevMeta, RevNode};

    fn meta(rev: u32) -> Rc<RevMeta> {
        Rc::new(RevMeta {
            author: b"johnw".to_vec(),
            date: 1_300_000_000 + i64::from(rev),
            log: Some(format!("r{rev} log").into_bytes()),
        })
    }

    fn file_add(rev: u32, path: &str, text: &str) -> RevNode {
        RevNode {
            rev,
            meta: meta(rev),
            path: path.as_bytes().to_vec(),
            kind: Some(NodeKind::File),
            action: NodeAction::Add,
            copy_from: None,
            executable: false,
            text: Some(text.as_bytes().to_vec()),
            text_md5: None,
            text_sha1: None,
        }
    }

    fn copy(rev: u32, kind: NodeKind, path: &str, from: &str, from_rev: u32) -> RevNode {
        RevNode {
            rev,
            meta: meta(rev),
            path: path.as_bytes().to_vec(),
            kind: Some(kind),
            action: NodeAction::Add,
            copy_from: Some(NodeCopyFrom {
                rev: from_rev,
                path: from.as_bytes().to_vec(),
            }),
            executable: false,
            text: None,
            text_md5: None,
            text_sha1: None,
        }
    }

    fn delete(rev: u32, path: &str) -> RevNode {
        RevNode {
            rev,
            meta: meta(rev),
            path: path.as_bytes().to_vec(),
            kind: None,
            action: NodeAction::Delete,
            copy_from: None,
            executable: false,
            text: None,
            text_md5: None,
            text_sha1: None,
        }
    }

    fn converter(authors: &Authors) -> (tempfile::TempDir, Converter<'_>) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path(), String::new()).unwrap();
        (dir, Converter::new(repo, authors, None))
    }

    fn with_trunk_branches(conv: &mut Converter<'_>) {
        conv.repository
            .add_branch(Branch::new("master".into(), Some(b"trunk".to_vec()), false));
        conv.repository.add_branch(Branch::new(
            "feature".into(),
            Some(b"branches/feature".to_vec()),
            false,
        ));
    }

    #[test]
    fn single_file_add_commits_on_master() {
        let authors = Authors::new();
        let (_dir, mut conv) = converter(&authors);
        with_trunk_branches(&mut conv);

        conv.apply(&file_add(1, "trunk/a.c", "x\n")).unwrap();
        conv.finish().unwrap();

        let master = conv.repository.branch_by_name("master").unwrap();
        let tip = conv.repository.branch(master).commit.as_ref().unwrap();
        let found = tip.tree.lookup(b"a.c").unwrap();
        assert!(found.is_blob());
        // parentless first commit
        assert_eq!(conv.last_rev(), Some(1));
    }

    #[test]
    fn copy_from_file_shares_blob_identity() {
        let authors = Authors::new();
        let (_dir, mut conv) = converter(&authors);
        with_trunk_branches(&mut conv);

        conv.apply(&file_add(1, "trunk/a.c", "x\n")).unwrap();
        conv.window_mut().reserve(2, 1);
        conv.apply(&copy(2, NodeKind::File, "trunk/b.c", "trunk/a.c", 1))
            .unwrap();
        conv.finish().unwrap();

        let master = conv.repository.branch_by_name("master").unwrap();
        let tip = conv.repository.branch(master).commit.as_ref().unwrap();
        let (Some(Object::Blob(a)), Some(Object::Blob(b))) =
            (tip.tree.lookup(b"a.c"), tip.tree.lookup(b"b.c"))
        else {
            panic!("expected both blobs in the r2 tree");
        };
        assert_eq!(a.oid, b.oid);
        assert_eq!(b.name, b"b.c");
    }

    #[test]
    fn directory_copy_forks_branch_with_parent() {
        let authors = Authors::new();
        let (_dir, mut conv) = converter(&authors);
        with_trunk_branches(&mut conv);

        conv.apply(&file_add(1, "trunk/x/a.c", "x\n")).unwrap();
        conv.window_mut().reserve(2, 1);
        conv.apply(&copy(2, NodeKind::Dir, "branches/feature", "trunk", 1))
            .unwrap();

        // the fork's pending commit has master's r1 commit as parent
        let master = conv.repository.branch_by_name("master").unwrap();
        let master_oid = conv.repository.branch(master).commit.as_ref().unwrap().oid;
        let feature = conv.repository.branch_by_name("feature").unwrap();
        let pending = conv.repository.branch(feature).next_commit.as_ref().unwrap();
        assert_eq!(pending.parent, Some(master_oid));
        assert!(pending.new_branch);

        conv.finish().unwrap();
        let tip = conv.repository.branch(feature).commit.as_ref().unwrap();
        assert!(tip.tree.lookup(b"x/a.c").is_some());
    }

    #[test]
    fn deleting_a_branch_tags_its_last_commit() {
        let authors = Authors::new();
        let (dir, mut conv) = converter(&authors);
        with_trunk_branches(&mut conv);

        conv.apply(&file_add(1, "trunk/x/a.c", "x\n")).unwrap();
        conv.window_mut().reserve(2, 1);
        conv.apply(&copy(2, NodeKind::Dir, "branches/feature", "trunk", 1))
            .unwrap();
        conv.apply(&delete(3, "branches/feature")).unwrap();
        conv.finish().unwrap();

        let feature = conv.repository.branch_by_name("feature").unwrap();
        assert!(conv.repository.branch(feature).commit.is_none());
        assert!(dir
            .path()
            .join(".git/refs/tags/feature__deleted_r3")
            .is_file());
        // master is untouched
        let master = conv.repository.branch_by_name("master").unwrap();
        assert!(conv.repository.branch(master).commit.is_some());
    }

    #[test]
    fn empty_copy_source_produces_no_commit() {
        let authors = Authors::new();
        let (_dir, mut conv) = converter(&authors);
        with_trunk_branches(&mut conv);

        conv.apply(&file_add(1, "trunk/a.c", "x\n")).unwrap();
        conv.window_mut().reserve(2, 1);
        // "trunk/empty" never had git-visible content
        conv.apply(&copy(
            2,
            NodeKind::Dir,
            "branches/feature",
            "trunk/empty",
            1,
        ))
        .unwrap();

        let feature = conv.repository.branch_by_name("feature").unwrap();
        assert!(conv.repository.branch(feature).next_commit.is_none());
        conv.finish().unwrap();
        assert!(conv.repository.branch(feature).commit.is_none());
    }

    #[test]
    fn change_without_text_is_ignored() {
        let authors = Authors::new();
        let (_dir, mut conv) = converter(&authors);
        with_trunk_branches(&mut conv);

        conv.apply(&file_add(1, "trunk/a.c", "x\n")).unwrap();

        let mut change = file_add(2, "trunk/a.c", "");
        change.action = NodeAction::Change;
        change.text = None;
        conv.apply(&change).unwrap();

        // r2 queued nothing; only the r1 commit exists after finishing
        let master = conv.repository.branch_by_name("master").unwrap();
        assert!(conv.repository.branch(master).next_commit.is_none());
        conv.finish().unwrap();
        let tip = conv.repository.branch(master).commit.as_ref().unwrap();
        assert!(tip.tree.lookup(b"a.c").is_some());
    }

    #[test]
    fn submodule_mirrors_matching_paths() {
        let authors = Authors::new();
        let (_dir, mut conv) = converter(&authors);
        with_trunk_branches(&mut conv);

        let module_dir = tempfile::tempdir().unwrap();
        let module_repo = Repository::open(module_dir.path(), "lib".into()).unwrap();
        let mut router = Router::new();
        router.add_source(b"trunk/lib".to_vec(), 0, Some(b"".to_vec()));
        conv.set_submodules(
            vec![Submodule {
                path: "lib".into(),
                repository: module_repo,
            }],
            router,
        );

        conv.apply(&file_add(1, "trunk/lib/util.c", "u\n")).unwrap();
        conv.apply(&file_add(1, "trunk/main.c", "m\n")).unwrap();
        conv.finish().unwrap();

        // the submodule received util.c at its root, under the same branch
        let module = &conv.submodules[0].repository;
        let master = module.branch_by_name("master").unwrap();
        let tip = module.branch(master).commit.as_ref().unwrap();
        assert!(tip.tree.lookup(b"util.c").is_some());
        assert!(tip.tree.lookup(b"main.c").is_none());

        // the primary repository has both
        let master = conv.repository.branch_by_name("master").unwrap();
        let tip = conv.repository.branch(master).commit.as_ref().unwrap();
        assert!(tip.tree.lookup(b"lib/util.c").is_some());
        assert!(tip.tree.lookup(b"main.c").is_some());
    }

    #[test]
    fn flat_history_tag_mirrors_everything() {
        let authors = Authors::new();
        let (dir, mut conv) = converter(&authors);
        with_trunk_branches(&mut conv);

        conv.apply(&file_add(1, "trunk/a.c", "x\n")).unwrap();
        conv.apply(&file_add(2, "branches/feature/b.c", "y\n"))
            .unwrap();
        conv.finish().unwrap();

        assert!(dir.path().join(".git/refs/tags/flat-history").is_file());
        let history = conv.repository.branch_by_name("flat-history").unwrap();
        let tip = conv.repository.branch(history).commit.as_ref().unwrap();
        assert!(tip.tree.lookup(b"trunk/a.c").is_some());
        assert!(tip.tree.lookup(b"branches/feature/b.c").is_some());
    }

    #[test]
    fn prescan_counts_unknown_authors_and_unmapped_paths() {
        let mut authors = Authors::new();
        authors.insert(b"johnw".to_vec(), "John Wiegley", "johnw@example.com");
        let (_dir, mut conv) = converter(&authors);
        with_trunk_branches(&mut conv);

        // known author, mapped path
        assert_eq!(conv.prescan(&file_add(1, "trunk/a.c", "x\n")), 0);

        // unknown author
        let mut node = file_add(2, "trunk/b.c", "y\n");
        node.meta = Rc::new(RevMeta {
            author: b"ghost".to_vec(),
            date: 0,
            log: None,
        });
        assert_eq!(conv.prescan(&node), 1);

        // unmapped path and unmapped copy-from source
        let node = copy(3, NodeKind::Dir, "elsewhere/dir", "nowhere", 1);
        assert_eq!(conv.prescan(&node), 2);

        // reservations recorded and deduplicated
        assert_eq!(
            conv.window_mut().reservations().copied().collect::<Vec<_>>(),
            [(3, 1)],
        );
    }

    #[test]
    fn replay_is_deterministic() {
        let authors = Authors::new();

        let run = || {
            let (dir, mut conv) = converter(&authors);
            conv.repository
                .add_branch(Branch::new("master".into(), Some(b"trunk".to_vec()), false));
            conv.apply(&file_add(1, "trunk/a.c", "x\n")).unwrap();
            conv.apply(&file_add(2, "trunk/sub/b.c", "y\n")).unwrap();
            conv.apply(&delete(3, "trunk/a.c")).unwrap();
            conv.finish().unwrap();
            let master = conv.repository.branch_by_name("master").unwrap();
            let oid = conv.repository.branch(master).commit.as_ref().unwrap().oid;
            drop(dir);
            oid
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn prescan_checksum_verification() {
        let authors = Authors::new();
        let (_dir, mut conv) = converter(&authors);

        let mut node = file_add(1, "trunk/a.c", "x\n");
        node.text_md5 = Some(format!("{:x}", md5::compute(b"x\n")).into_bytes());
        assert_eq!(conv.prescan(&node), 0);

        node.text_md5 = Some(b"00000000000000000000000000000000".to_vec());
        assert_eq!(conv.prescan(&node), 1);
    }
}
