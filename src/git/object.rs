use std::collections::BTreeMap;
use std::rc::Rc;

use gix_hash::ObjectId;
use gix_object::tree::EntryKind;

use crate::git::store::{ObjectStore, WriterError};
use crate::svn;

/// An entry of a tree: either a blob or a nested tree.
///
/// Subtrees are shared through `Rc`; any tree that is reachable from a
/// written commit or from a retained revision snapshot may be aliased, so
/// mutation always goes through [`Tree::update`] / [`Tree::remove`], which
/// clone shared nodes along the mutation path before touching them.
#[derive(Clone, Debug)]
pub(crate) enum Object {
    Blob(Blob),
    Tree(Rc<Tree>),
}

impl Object {
    pub(crate) fn name(&self) -> &[u8] {
        match self {
            Self::Blob(blob) => &blob.name,
            Self::Tree(tree) => &tree.name,
        }
    }

    #[inline]
    pub(crate) fn is_blob(&self) -> bool {
        matches!(self, Self::Blob(_))
    }

    #[inline]
    pub(crate) fn is_tree(&self) -> bool {
        matches!(self, Self::Tree(_))
    }

    /// Shallow copy under a different name. Content identity is unchanged;
    /// a blob keeps its oid, a tree keeps its entry map (children shared).
    pub(crate) fn copy_to_name(&self, to_name: &[u8]) -> Object {
        match self {
            Self::Blob(blob) => {
                let mut blob = blob.clone();
                blob.name = to_name.to_vec();
                Object::Blob(blob)
            }
            Self::Tree(tree) => {
                let mut copy = Tree::clone(tree);
                copy.name = to_name.to_vec();
                Object::Tree(Rc::new(copy))
            }
        }
    }
}

/// A file. The content is written to the object store eagerly on creation,
/// so a blob's identity is always known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Blob {
    pub(crate) name: Vec<u8>,
    pub(crate) executable: bool,
    pub(crate) oid: ObjectId,
}

impl Blob {
    fn entry_mode(&self) -> EntryKind {
        if self.executable {
            EntryKind::BlobExecutable
        } else {
            EntryKind::Blob
        }
    }
}

/// A directory, with copy-on-write update/remove/lookup by path.
///
/// `written` means the cached oid matches the current entry set; `modified`
/// means the entry set changed since the last write. Both are maintained so
/// that flushing a commit only re-serializes trees on mutated paths.
#[derive(Clone, Debug)]
pub(crate) struct Tree {
    pub(crate) name: Vec<u8>,
    entries: BTreeMap<Vec<u8>, Object>,
    written: bool,
    modified: bool,
    oid: Option<ObjectId>,
}

impl Tree {
    pub(crate) fn new(name: Vec<u8>) -> Self {
        Self {
            name,
            entries: BTreeMap::new(),
            written: false,
            modified: false,
            oid: None,
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub(crate) fn is_modified(&self) -> bool {
        self.modified
    }

    /// The cached identity, when it still matches the entry set.
    fn written_oid(&self) -> Option<ObjectId> {
        if self.written && !self.modified {
            self.oid
        } else {
            None
        }
    }

    /// Walks `path` down from this tree. Returns `None` if any segment is
    /// absent or descends through a blob. The empty path addresses the tree
    /// itself.
    pub(crate) fn lookup(&self, path: &[u8]) -> Option<Object> {
        let segments = svn::path::segments(path).collect::<Vec<_>>();
        let Some((&last, parents)) = segments.split_last() else {
            return Some(Object::Tree(Rc::new(self.clone())));
        };

        let mut current = self;
        for &segment in parents {
            match current.entries.get(segment)? {
                Object::Tree(subtree) => current = subtree,
                Object::Blob(_) => return None,
            }
        }
        let entry = current.entries.get(last)?;
        debug_assert_eq!(entry.name(), last);
        Some(entry.clone())
    }

    /// Places `obj` at `path`, creating intermediate trees as needed. The
    /// terminal segment must equal `obj`'s name; callers placing an object
    /// under a different filename use [`Object::copy_to_name`] first.
    pub(crate) fn update(&mut self, path: &[u8], obj: Object) {
        let segments = svn::path::segments(path).collect::<Vec<_>>();
        assert!(!segments.is_empty(), "attempted to update the tree root");
        self.do_update(&segments, obj);
    }

    fn do_update(&mut self, segments: &[&[u8]], obj: Object) {
        let segment = segments[0];
        if segments.len() == 1 {
            assert_eq!(
                segment,
                obj.name(),
                "entry name does not match the target path",
            );
            self.entries.insert(segment.to_vec(), obj);
        } else {
            let entry = self
                .entries
                .entry(segment.to_vec())
                .or_insert_with(|| Object::Tree(Rc::new(Tree::new(segment.to_vec()))));
            let Object::Tree(subtree) = entry else {
                panic!(
                    "blob found where tree expected at \"{}\"",
                    segment.escape_ascii(),
                );
            };
            Rc::make_mut(subtree).do_update(&segments[1..], obj);
        }
        self.written = false;
        self.modified = true;
    }

    /// Deletes the entry at `path`. Removing a missing path is a silent
    /// no-op (Subversion may remove empty directories that never existed as
    /// Git entries) and does not mark the tree modified. A subtree emptied
    /// by the removal is deleted as well, propagating upward.
    pub(crate) fn remove(&mut self, path: &[u8]) {
        let segments = svn::path::segments(path).collect::<Vec<_>>();
        if !segments.is_empty() {
            self.do_remove(&segments);
        }
    }

    fn do_remove(&mut self, segments: &[&[u8]]) -> bool {
        let segment = segments[0];
        let removed = if segments.len() == 1 {
            self.entries.remove(segment).is_some()
        } else {
            match self.entries.get_mut(segment) {
                Some(Object::Tree(subtree)) => {
                    let subtree = Rc::make_mut(subtree);
                    if subtree.do_remove(&segments[1..]) {
                        if subtree.is_empty() {
                            self.entries.remove(segment);
                        }
                        true
                    } else {
                        false
                    }
                }
                Some(Object::Blob(_)) | None => false,
            }
        };
        if removed {
            self.written = false;
            self.modified = true;
        }
        removed
    }

    /// Writes the tree (and any unwritten subtree) to the object store and
    /// returns its identity. An empty tree produces no object.
    pub(crate) fn write(&mut self, store: &ObjectStore) -> Result<Option<ObjectId>, WriterError> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        if let Some(oid) = self.written_oid() {
            return Ok(Some(oid));
        }

        let mut entries = Vec::with_capacity(self.entries.len());
        for (key, obj) in self.entries.iter_mut() {
            match obj {
                Object::Blob(blob) => {
                    debug_assert_eq!(*key, blob.name);
                    entries.push(gix_object::tree::Entry {
                        mode: blob.entry_mode().into(),
                        filename: blob.name.as_slice().into(),
                        oid: blob.oid,
                    });
                }
                Object::Tree(subtree) => {
                    debug_assert_eq!(*key, subtree.name);
                    // subtrees untouched since their last write keep their
                    // identity; cloning them out of shared state would copy
                    // the whole mirror tree on every flush
                    let sub_oid = match subtree.written_oid() {
                        Some(oid) => Some(oid),
                        None => Rc::make_mut(subtree).write(store)?,
                    };
                    let Some(sub_oid) = sub_oid else {
                        continue;
                    };
                    entries.push(gix_object::tree::Entry {
                        mode: EntryKind::Tree.into(),
                        filename: subtree.name.as_slice().into(),
                        oid: sub_oid,
                    });
                }
            }
        }

        // gix implements the git tree entry order (directories compare as if
        // their name ended with '/').
        entries.sort();
        let tree = gix_object::Tree { entries };
        let oid = store.put(&tree)?;
        self.oid = Some(oid);
        self.written = true;
        self.modified = false;
        Ok(Some(oid))
    }
}

/// A commit under construction or already written.
///
/// The parent link is the parent's identity; a commit is only cloned from a
/// written tip, so the parent oid is always known. The owning branch is
/// tracked by the repository (branch arena index), not by the commit.
#[derive(Clone, Debug)]
pub(crate) struct Commit {
    pub(crate) tree: Option<Tree>,
    pub(crate) parent: Option<ObjectId>,
    pub(crate) author: Option<gix_actor::Signature>,
    pub(crate) message: Vec<u8>,
    pub(crate) new_branch: bool,
    pub(crate) oid: Option<ObjectId>,
}

impl Commit {
    pub(crate) fn new(parent: Option<ObjectId>) -> Self {
        Self {
            tree: None,
            parent,
            author: None,
            message: Vec::new(),
            new_branch: false,
            oid: None,
        }
    }

    /// Whether the commit's tree contains at least one entry. A branch whose
    /// pending commit has no tree left has been emptied at this revision.
    pub(crate) fn has_tree(&self) -> bool {
        self.tree.as_ref().is_some_and(|tree| !tree.is_empty())
    }

    pub(crate) fn update(&mut self, path: &[u8], obj: Object) {
        self.tree
            .get_or_insert_with(|| Tree::new(Vec::new()))
            .update(path, obj);
    }

    pub(crate) fn remove(&mut self, path: &[u8]) {
        if let Some(tree) = &mut self.tree {
            tree.remove(path);
        }
    }

    pub(crate) fn lookup(&self, path: &[u8]) -> Option<Object> {
        self.tree.as_ref().and_then(|tree| tree.lookup(path))
    }

    /// Writes the commit's tree and then the commit itself.
    pub(crate) fn write(&mut self, store: &ObjectStore) -> Result<ObjectId, WriterError> {
        assert!(self.oid.is_none(), "commit already written");
        let tree = self.tree.as_mut().expect("commit without tree");
        let tree_oid = tree.write(store)?.expect("commit with an empty tree");

        let author = self
            .author
            .clone()
            .expect("commit author must be set before writing");
        let commit = gix_object::Commit {
            tree: tree_oid,
            parents: self.parent.into_iter().collect(),
            author: author.clone(),
            committer: author,
            encoding: None,
            message: self.message.as_slice().into(),
            extra_headers: Vec::new(),
        };
        let oid = store.put(&commit)?;
        self.oid = Some(oid);
        Ok(oid)
    }
}
